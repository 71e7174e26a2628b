//! External image sources.
//!
//! The mosaic server never stores the scanned pages it zooms into. Basic-level
//! tiles and DZI descriptors come from an image server that speaks the same
//! deep zoom path syntax; this module abstracts over it.
//!
//! - [`ImageSource`]: trait implemented by every backend
//! - [`HttpImageSource`]: a remote image server addressed by a URL template
//! - [`FileImageSource`]: a directory of pre-cut deep zoom tiles

mod file;
mod http;

use async_trait::async_trait;
use image::GrayImage;

use crate::error::SourceError;

pub use file::FileImageSource;
pub use http::{HttpImageSource, DEFAULT_IMAGE_SERVER_TEMPLATE};

/// Default gamma passed to the image server.
pub const DEFAULT_GAMMA: f64 = 1.0;

/// Default contrast passed to the image server.
pub const DEFAULT_CONTRAST: f64 = 0.0;

/// Tonal adjustments requested by the viewer and forwarded to the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustments {
    pub gamma: f64,
    pub contrast: f64,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            gamma: DEFAULT_GAMMA,
            contrast: DEFAULT_CONTRAST,
        }
    }
}

impl Adjustments {
    pub fn new(gamma: f64, contrast: f64) -> Self {
        Self { gamma, contrast }
    }

    /// Stable textual form used in cache keys and URLs.
    pub fn key(&self) -> String {
        format!("{}_{}", self.gamma, self.contrast)
    }
}

/// A provider of deep zoom tiles and descriptors.
///
/// `path` is a deep zoom path such as `/a/b/<uuid>.jp2_files/8/0_0.jpg` or
/// `/a/b/<uuid>.jp2.dzi`.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch one tile and convert it to greyscale.
    async fn fetch_tile(
        &self,
        path: &str,
        adjustments: Adjustments,
    ) -> Result<GrayImage, SourceError>;

    /// Fetch a DZI descriptor as XML text.
    async fn fetch_descriptor(&self, path: &str) -> Result<String, SourceError>;
}

#[async_trait]
impl<S: ImageSource + ?Sized> ImageSource for std::sync::Arc<S> {
    async fn fetch_tile(
        &self,
        path: &str,
        adjustments: Adjustments,
    ) -> Result<GrayImage, SourceError> {
        (**self).fetch_tile(path, adjustments).await
    }

    async fn fetch_descriptor(&self, path: &str) -> Result<String, SourceError> {
        (**self).fetch_descriptor(path).await
    }
}
