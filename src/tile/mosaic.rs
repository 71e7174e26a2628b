//! Mapping of one source tile onto reference pyramids, and rendering of the
//! resulting mosaic at finer levels.
//!
//! Pyramids are 2 fractions wide and 3 high, so two of them stacked span
//! three source rows of 2x2-fraction squares:
//!
//! ```text
//! source row   kind        drawn from
//! y % 3 == 0   top-down    pyramid A, fraction rows 0 and 1
//! y % 3 == 1   seam        pyramid A row 2 over pyramid B row 0
//! y % 3 == 2   bottom-up   pyramid B, fraction rows 1 and 2
//! ```
//!
//! Only top-down and bottom-up rows are matched against the index; seam rows
//! are stitched from their neighbours when rendering.

use std::sync::Arc;
use std::time::Instant;

use image::{GrayImage, ImageBuffer};
use rand::Rng;
use tracing::debug;

use crate::error::MosaicError;
use crate::index::PyramidIndex;
use crate::pyramid::{PyramidRecord, FRACTION_WIDTH};

use super::fill::FillPolicy;

/// Default source tile edge in pixels.
pub const DEFAULT_TILE_EDGE: u32 = 256;

/// Default seed for mapping. Every mapping of the same source must pick the
/// same pyramids, so one fixed seed is used unless configured otherwise.
pub const DEFAULT_MAPPING_SEED: u64 = 87;

/// Role of a source row in the three-row cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// Matched on a pyramid's top 2x2 block
    TopDown,

    /// Stitched from the rows above and below
    Seam,

    /// Matched on a pyramid's bottom 2x2 block
    BottomUp,
}

impl RowKind {
    /// Classify source row `y` by `y*2 mod 3`.
    pub fn classify(y: u32) -> Self {
        match (y * 2) % 3 {
            0 => RowKind::TopDown,
            1 => RowKind::BottomUp,
            _ => RowKind::Seam,
        }
    }
}

/// A mapped source pixel.
#[derive(Debug, Clone)]
pub struct MosaicCell {
    pub record: Arc<PyramidRecord>,

    /// Fill that pulls the record's average toward the source pixel
    pub dynamic_fill: u8,
}

/// One `edge x edge` source tile mapped onto pyramids.
pub struct TileMosaic {
    edge: u32,
    max_level: u32,
    cells: Vec<Option<MosaicCell>>,
}

impl TileMosaic {
    /// Map every top-down and bottom-up source pixel to its closest pyramid.
    ///
    /// A top-down row without a row below it stays empty.
    pub fn build_mapping<R: Rng + ?Sized>(
        source: &GrayImage,
        index: &PyramidIndex,
        rng: &mut R,
    ) -> Result<Self, MosaicError> {
        let (width, height) = source.dimensions();
        if width != height || width == 0 {
            return Err(MosaicError::InvalidSource {
                edge: width.max(height),
                width,
                height,
            });
        }
        let start = Instant::now();
        let edge = width;
        let mut cells = vec![None; (edge * edge) as usize];
        let pixel = |x: u32, y: u32| source.get_pixel(x, y)[0];

        for y in 0..edge {
            match RowKind::classify(y) {
                RowKind::Seam => continue,
                RowKind::TopDown if y + 1 >= edge => continue,
                RowKind::TopDown => {
                    for x in 0..edge {
                        let primary = pixel(x, y);
                        let record = index.get_closest_top(primary, pixel(x, y + 1), rng)?;
                        cells[(y * edge + x) as usize] = Some(MosaicCell {
                            dynamic_fill: record.dynamic_fill_grey(primary),
                            record,
                        });
                    }
                }
                RowKind::BottomUp => {
                    for x in 0..edge {
                        let primary = pixel(x, y);
                        let record = index.get_closest_bottom(primary, pixel(x, y - 1), rng)?;
                        cells[(y * edge + x) as usize] = Some(MosaicCell {
                            dynamic_fill: record.dynamic_fill_grey(primary),
                            record,
                        });
                    }
                }
            }
        }
        debug!(
            "Mapped {}x{} tile in {}ms",
            edge,
            edge,
            start.elapsed().as_millis()
        );
        Ok(Self {
            edge,
            max_level: index.settings().max_level,
            cells,
        })
    }

    pub fn edge(&self) -> u32 {
        self.edge
    }

    /// Cell for source pixel `(x, y)`; `None` for seam and skipped rows.
    pub fn cell(&self, x: u32, y: u32) -> Option<&MosaicCell> {
        if x >= self.edge || y >= self.edge {
            return None;
        }
        self.cells[(y * self.edge + x) as usize].as_ref()
    }

    /// Number of source pixels holding a pyramid.
    pub fn mapped_cells(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    /// Highest render level: one source pixel per output tile, or the finest
    /// stored pyramid level, whichever is reached first.
    pub fn max_render_level(&self) -> u32 {
        (self.edge.trailing_zeros() + 1).min(self.max_level + 1)
    }

    /// The two half-height contributions making up source cell `(x, y)`.
    fn halves(&self, x: u32, y: u32) -> [(Option<&MosaicCell>, u32); 2] {
        match RowKind::classify(y) {
            RowKind::TopDown => [(self.cell(x, y), 0), (self.cell(x, y), 1)],
            RowKind::BottomUp => [(self.cell(x, y), 1), (self.cell(x, y), 2)],
            RowKind::Seam => {
                let above = y.checked_sub(1).and_then(|above| self.cell(x, above));
                [(above, 2), (self.cell(x, y + 1), 0)]
            }
        }
    }

    /// Render sub-tile `(sub_x, sub_y)` of the `2^(level-1)` grid covering
    /// the source, as an `edge x edge` image.
    ///
    /// Each source pixel becomes a `2^(level-1)` square drawn from pyramid
    /// level `level-1`. Level 1 paints one pixel per source pixel.
    pub fn render(
        &self,
        sub_x: u32,
        sub_y: u32,
        level: u32,
        policy: &FillPolicy,
    ) -> Result<GrayImage, MosaicError> {
        let invalid = MosaicError::InvalidRenderLevel {
            level,
            x: sub_x,
            y: sub_y,
        };
        if level == 0 || level > self.max_render_level() {
            return Err(invalid);
        }
        let zoom = 1u32 << (level - 1);
        if sub_x >= zoom || sub_y >= zoom {
            return Err(invalid);
        }

        let start = Instant::now();
        let edge = self.edge as usize;
        let span = self.edge / zoom;
        let pyramid_level = level - 1;
        let half = (zoom / 2) as usize;
        let mut canvas = vec![policy.fixed_grey; edge * edge];

        for cy in 0..span {
            let y = sub_y * span + cy;
            for cx in 0..span {
                let x = sub_x * span + cx;
                let origin_x = (cx * zoom) as usize;
                let origin_y = (cy * zoom) as usize;
                let halves = self.halves(x, y);

                if pyramid_level == 0 {
                    if let Some(grey) = Self::pixel_pair_mean(&halves, policy) {
                        canvas[origin_y * edge + origin_x] = grey;
                    }
                    continue;
                }

                for (row, (cell, fy)) in halves.iter().enumerate() {
                    let Some(cell) = cell else {
                        continue;
                    };
                    let fill = policy.cell_fill(&cell.record, cell.dynamic_fill);
                    for fx in 0..FRACTION_WIDTH {
                        cell.record
                            .copy_pixels_into(
                                pyramid_level,
                                fx,
                                *fy,
                                &mut canvas,
                                origin_x + fx as usize * half,
                                origin_y + row * half,
                                edge,
                                fill,
                            )
                            .map_err(|_| MosaicError::InvalidRenderLevel {
                                level,
                                x: sub_x,
                                y: sub_y,
                            })?;
                    }
                }
            }
        }

        let scrubbed = policy.scrubbed_missing();
        for pixel in canvas.iter_mut().filter(|p| **p == policy.missing_grey) {
            *pixel = scrubbed;
        }

        debug!(
            "Rendered sub-tile ({}, {}) at level {} in {}ms",
            sub_x,
            sub_y,
            level,
            start.elapsed().as_millis()
        );
        ImageBuffer::from_raw(self.edge, self.edge, canvas).ok_or(invalid)
    }

    /// Level-1 grey of a single-pixel cell: the mean of the two halves'
    /// leftmost level-1 bytes, each with its own missing replacement.
    ///
    /// Only fraction column 0 is read. The right column of each reference
    /// image never contributes at this level, which keeps one byte per half.
    fn pixel_pair_mean(halves: &[(Option<&MosaicCell>, u32); 2], policy: &FillPolicy) -> Option<u8> {
        let (sum, count) = halves
            .iter()
            .filter_map(|(cell, fy)| cell.map(|cell| (cell, *fy)))
            .map(|(cell, fy)| {
                let grey = cell.record.level_one(0, fy);
                if grey == cell.record.settings().missing_grey {
                    policy.cell_fill(&cell.record, cell.dynamic_fill)
                } else {
                    grey
                }
            })
            .fold((0u32, 0u32), |(sum, count), grey| (sum + u32::from(grey), count + 1));
        (count > 0).then(|| (sum / count) as u8)
    }
}

impl std::fmt::Debug for TileMosaic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileMosaic")
            .field("edge", &self.edge)
            .field("mapped", &self.mapped_cells())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
