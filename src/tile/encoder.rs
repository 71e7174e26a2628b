//! Greyscale tile codec.
//!
//! Tiles fetched from the image server are decoded into 8-bit greyscale
//! before mapping; rendered tiles are encoded as JPEG for the viewer.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageReader};

use crate::error::{DeepZoomError, SourceError};

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// JPEG Encoder
// =============================================================================

/// Encodes greyscale tiles as JPEG at a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct JpegTileEncoder {
    quality: u8,
}

impl Default for JpegTileEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl JpegTileEncoder {
    /// Create an encoder; quality is clamped to 1-100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a greyscale tile.
    pub fn encode(&self, tile: &GrayImage) -> Result<Bytes, DeepZoomError> {
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);
        encoder
            .encode_image(tile)
            .map_err(|e| DeepZoomError::Encode(e.to_string()))?;
        Ok(Bytes::from(output))
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode any supported image format and convert it to 8-bit greyscale.
pub fn decode_grey(data: &[u8]) -> Result<GrayImage, SourceError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| SourceError::Decode(e.to_string()))?;
    let image = reader
        .decode()
        .map_err(|e| SourceError::Decode(e.to_string()))?;
    Ok(image.into_luma8())
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
