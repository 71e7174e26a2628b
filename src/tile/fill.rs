//! Fill greys for absent pixels.

use clap::ValueEnum;
use image::{imageops, GrayImage, Luma};

use crate::pyramid::{PyramidRecord, DEFAULT_MISSING_GREY};

/// Default grey used for padding and blank tiles.
pub const DEFAULT_FILL_GREY: u8 = DEFAULT_MISSING_GREY;

/// How missing pixels and padding are painted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FillStyle {
    /// Always the configured fill grey
    Fixed,

    /// The average grey of the pyramid being padded
    Average,

    /// A per-cell grey that pulls each reference image toward the source pixel
    #[default]
    Dynamic,
}

/// Fill style plus the greys it works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillPolicy {
    pub style: FillStyle,

    /// Grey for padding, blank tiles and unresolvable pyramids
    pub fixed_grey: u8,

    /// Grey marking "pixel absent from source" inside record data
    pub missing_grey: u8,
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self {
            style: FillStyle::default(),
            fixed_grey: DEFAULT_FILL_GREY,
            missing_grey: DEFAULT_MISSING_GREY,
        }
    }
}

impl FillPolicy {
    pub fn new(style: FillStyle, fixed_grey: u8, missing_grey: u8) -> Self {
        Self {
            style,
            fixed_grey,
            missing_grey,
        }
    }

    /// Replacement for the missing pixels of one record inside a mosaic.
    ///
    /// `dynamic` is the grey computed for the cell when it was mapped.
    pub fn cell_fill(&self, record: &PyramidRecord, dynamic: u8) -> u8 {
        match self.style {
            FillStyle::Fixed => self.fixed_grey,
            FillStyle::Average => record.average_grey(),
            FillStyle::Dynamic => dynamic,
        }
    }

    /// Grey a finished tile must never contain.
    ///
    /// Pixels equal to the missing grey are nudged to this neighbour value.
    pub fn scrubbed_missing(&self) -> u8 {
        self.missing_grey ^ 1
    }
}

// =============================================================================
// Tile Helpers
// =============================================================================

/// A square tile of one grey.
pub fn blank_tile(edge: u32, grey: u8) -> GrayImage {
    GrayImage::from_pixel(edge, edge, Luma([grey]))
}

/// Fit `image` into an `edge x edge` canvas anchored top-left.
///
/// Smaller images are padded with `grey`; larger ones are cropped.
pub fn pad_tile(image: GrayImage, edge: u32, grey: u8) -> GrayImage {
    if image.dimensions() == (edge, edge) {
        return image;
    }
    let mut canvas = blank_tile(edge, grey);
    imageops::replace(&mut canvas, &image, 0, 0);
    canvas
}

/// Draw a one pixel frame around the tile.
pub fn draw_border(image: &mut GrayImage, grey: u8) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    for x in 0..width {
        image.put_pixel(x, 0, Luma([grey]));
        image.put_pixel(x, height - 1, Luma([grey]));
    }
    for y in 0..height {
        image.put_pixel(0, y, Luma([grey]));
        image.put_pixel(width - 1, y, Luma([grey]));
    }
}
