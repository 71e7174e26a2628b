//! Mosaic layer.
//!
//! This module turns source tiles into photomosaics of reference pyramids.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           DeepZoomCoordinator           │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              MosaicCache                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  LRU of      │  │  ImageSource    │  │
//! │  │  TileMosaic  │  │  (fetch, pad)   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             PyramidIndex                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileMosaic`]: mapping of one source tile onto pyramids, and its renderer
//! - [`RowKind`]: role of a source row in the three-row cycle
//! - [`MosaicCache`]: single-flight LRU cache of mapped mosaics
//! - [`FillPolicy`]: greys used for padding and missing pixels
//! - [`JpegTileEncoder`]: JPEG output for rendered tiles

mod cache;
mod encoder;
mod fill;
mod mosaic;

pub use cache::{MosaicCache, MosaicKey, MosaicSettings, DEFAULT_MOSAIC_CACHE_CAPACITY};
pub use encoder::{
    clamp_quality, decode_grey, JpegTileEncoder, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use fill::{blank_tile, draw_border, pad_tile, FillPolicy, FillStyle, DEFAULT_FILL_GREY};
pub use mosaic::{MosaicCell, RowKind, TileMosaic, DEFAULT_MAPPING_SEED, DEFAULT_TILE_EDGE};
