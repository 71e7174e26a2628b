//! Router configuration for the mosaic server.
//!
//! # Route Structure
//!
//! ```text
//! /health                                    - Health check
//! /image/deepzoom/?GAM=&CNT=&DeepZoom=       - Tile or DZI descriptor
//! /image/random/                             - Random reference image path
//! ```
//!
//! # Example
//!
//! ```ignore
//! use nrt_mosaic::server::{create_router, RouterConfig};
//!
//! let router = create_router(coordinator, RouterConfig::new().with_cache_max_age(600));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8234").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    deepzoom_handler, health_handler, random_handler, AppState, DEFAULT_CACHE_MAX_AGE,
};
use crate::deepzoom::DeepZoomCoordinator;
use crate::source::ImageSource;
use crate::tile::{JpegTileEncoder, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// JPEG quality of served tiles
    pub jpeg_quality: u8,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Any CORS origin, one hour max-age, default quality, tracing on.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Build the application router around a coordinator.
pub fn create_router<S>(coordinator: DeepZoomCoordinator<S>, config: RouterConfig) -> Router
where
    S: ImageSource + 'static,
{
    let app_state = AppState::new(coordinator)
        .with_encoder(JpegTileEncoder::new(config.jpeg_quality))
        .with_cache_max_age(config.cache_max_age);

    let cors = build_cors_layer(&config);

    // Viewers call the endpoints both with and without the trailing slash
    let router = Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/image/deepzoom/", get(deepzoom_handler::<S>))
        .route("/image/deepzoom", get(deepzoom_handler::<S>))
        .route("/image/random/", get(random_handler::<S>))
        .route("/image/random", get(random_handler::<S>))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}
