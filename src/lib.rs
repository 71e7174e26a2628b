//! # NRT Mosaic
//!
//! A Deep Zoom tile server for scanned greyscale pages. Zoom far enough into
//! a page and it dissolves into a photomosaic of thousands of small reference
//! images, each chosen to match the grey of the pixel it replaces. Zoom into
//! one of those and you are inside that reference image's own page.
//!
//! ## Features
//!
//! - **Compact pyramids**: each reference image is stored at every power-of-two
//!   resolution in one fixed-size record, memory-mapped from shard files
//! - **Fast matching**: records are bucketed by grey so the closest match is a
//!   short outward scan away
//! - **Stable mosaics**: mappings use a seeded generator and are cached, so the
//!   same tile always shows the same references
//! - **Endless zoom**: requests below the mosaic levels are redirected into the
//!   reference images themselves
//!
//! ## Architecture
//!
//! - [`pyramid`] - Binary pyramid records, IDs and shard files
//! - [`index`] - Bucketed record index and parallel shard loader
//! - [`tile`] - Mosaic mapping, rendering, caching and JPEG encoding
//! - [`source`] - External image sources (HTTP image server, local directory)
//! - [`deepzoom`] - Path parsing, regimes and redirects
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nrt_mosaic::{
//!     create_router, DeepZoomCoordinator, DeepZoomSettings, HttpImageSource, IndexConfig,
//!     MosaicCache, MosaicSettings, PyramidIndex, RouterConfig, DEFAULT_IMAGE_SERVER_TEMPLATE,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let index = PyramidIndex::load("/data/shards".as_ref(), IndexConfig::default()).unwrap();
//!     let source = HttpImageSource::new(DEFAULT_IMAGE_SERVER_TEMPLATE);
//!     let cache = MosaicCache::new(Arc::new(source), Arc::new(index), MosaicSettings::default());
//!     let coordinator = DeepZoomCoordinator::new(cache, DeepZoomSettings::default(), None);
//!
//!     let router = create_router(coordinator, RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod deepzoom;
pub mod error;
pub mod index;
pub mod pyramid;
pub mod server;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, ConcatConfig, PyramidArgs, ServeConfig};
pub use deepzoom::{
    DeepZoomCoordinator, DeepZoomPath, DeepZoomSettings, LevelThresholds, PathTemplate, Regime,
};
pub use error::{DeepZoomError, IndexError, MosaicError, PyramidError, SourceError};
pub use index::{BucketTable, CollapseThreshold, IndexConfig, PyramidIndex};
pub use pyramid::{
    concatenate_tree, ConcatSummary, PyramidId, PyramidRecord, PyramidSettings, ShardArena,
    ShardWriter,
};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use source::{
    Adjustments, FileImageSource, HttpImageSource, ImageSource, DEFAULT_IMAGE_SERVER_TEMPLATE,
};
pub use tile::{
    FillPolicy, FillStyle, JpegTileEncoder, MosaicCache, MosaicSettings, RowKind, TileMosaic,
};
