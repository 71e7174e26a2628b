//! HTTP front end.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        GET /image/deepzoom/?GAM=&CNT=&DeepZoom=<path>           │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (tiles, DZI, random)     │  │  (router, CORS, tracing)    │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    deepzoom_handler, error_status, health_handler, random_handler, AppState,
    DeepZoomQueryParams, ErrorResponse, HandlerError, HealthResponse, DEFAULT_CACHE_MAX_AGE,
};
pub use routes::{create_router, RouterConfig};
