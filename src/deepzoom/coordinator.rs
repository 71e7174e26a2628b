//! Request dispatch across the deep zoom regimes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use image::{GrayImage, Luma};
use tracing::{debug, trace};

use crate::error::{DeepZoomError, SourceError};
use crate::index::PyramidIndex;
use crate::source::{Adjustments, ImageSource};
use crate::tile::{blank_tile, draw_border, pad_tile, MosaicCache, RowKind};

use super::dzi::{generate_dzi_xml, scale_descriptor, scale_dimension, tile_in_bounds};
use super::path::DeepZoomPath;
use super::{LevelThresholds, PathTemplate, Regime, DEFAULT_DZI_ZOOM_EXPONENT};

/// Grey of the debug border on redirected tiles.
pub const BORDER_GREY: u8 = 0;

type TileFuture<'a> = Pin<Box<dyn Future<Output = Result<GrayImage, DeepZoomError>> + Send + 'a>>;

/// Settings for [`DeepZoomCoordinator`].
#[derive(Debug, Clone)]
pub struct DeepZoomSettings {
    pub thresholds: LevelThresholds,

    /// DZI sizes are announced `2^dzi_exponent` times larger than the source
    pub dzi_exponent: u32,

    /// Maps pyramid IDs to the paths of their own images
    pub path_template: PathTemplate,

    /// Reject paths whose pyramid is not in the index
    pub only_known_ids: bool,

    /// Frame redirected tiles
    pub border: bool,
}

impl Default for DeepZoomSettings {
    fn default() -> Self {
        Self {
            thresholds: LevelThresholds::default(),
            dzi_exponent: DEFAULT_DZI_ZOOM_EXPONENT,
            path_template: PathTemplate::default(),
            only_known_ids: false,
            border: false,
        }
    }
}

/// Options carried along one dispatch.
#[derive(Debug, Clone, Copy, Default)]
struct Dispatch {
    /// Substitute blank tiles for missing source tiles, pad small ones
    pad: bool,

    border: bool,

    /// Dynamic grey of the mosaic cell that led here
    fill_hint: Option<u8>,
}

/// Placeholder served above the turtle level.
pub fn turtle_tile(edge: u32) -> GrayImage {
    let center = edge as f64 / 2.0;
    let radius = edge as f64 * 0.4;
    GrayImage::from_fn(edge, edge, |x, y| {
        let dx = x as f64 + 0.5 - center;
        let dy = y as f64 + 0.5 - center;
        let distance = (dx * dx + dy * dy).sqrt();
        let grey = if distance > radius {
            230
        } else if (distance / radius * 4.0) as u32 % 2 == 0 {
            90
        } else {
            140
        };
        Luma([grey])
    })
}

/// Translates deep zoom requests into source fetches, mosaic renders and
/// redirects into reference pyramids.
pub struct DeepZoomCoordinator<S: ImageSource> {
    cache: MosaicCache<S>,
    settings: DeepZoomSettings,
    turtle: GrayImage,
}

impl<S: ImageSource> DeepZoomCoordinator<S> {
    /// Create a coordinator. Without a `turtle` image a drawn placeholder is used.
    pub fn new(cache: MosaicCache<S>, settings: DeepZoomSettings, turtle: Option<GrayImage>) -> Self {
        let edge = cache.settings().edge;
        let fill = cache.settings().fill.fixed_grey;
        let turtle = match turtle {
            Some(image) => pad_tile(image, edge, fill),
            None => turtle_tile(edge),
        };
        Self {
            cache,
            settings,
            turtle,
        }
    }

    pub fn cache(&self) -> &MosaicCache<S> {
        &self.cache
    }

    pub fn index(&self) -> &Arc<PyramidIndex> {
        self.cache.index()
    }

    pub fn settings(&self) -> &DeepZoomSettings {
        &self.settings
    }

    pub fn edge(&self) -> u32 {
        self.cache.settings().edge
    }

    pub fn regime(&self, level: u32) -> Regime {
        self.settings.thresholds.regime(level)
    }

    // =========================================================================
    // Front End Operations
    // =========================================================================

    /// Tile for a deep zoom path such as `/a/<uuid>.jp2_files/14/3_5.jpg`.
    pub async fn deepzoom(
        &self,
        path: &str,
        adjustments: Adjustments,
    ) -> Result<GrayImage, DeepZoomError> {
        self.dispatch(path.to_string(), adjustments, Dispatch::default())
            .await
    }

    /// DZI descriptor for `path`, with its size scaled up so viewers zoom
    /// past the source resolution.
    ///
    /// When the source has no descriptor, one is generated from the
    /// dimensions stored in the pyramid record, if the path names one.
    pub async fn get_dzi(&self, path: &str) -> Result<String, DeepZoomError> {
        self.check_known(path)?;
        let exponent = self.settings.dzi_exponent;
        match self.cache.source().fetch_descriptor(path).await {
            Ok(xml) => scale_descriptor(&xml, exponent),
            Err(e) => {
                let Some(record) = self.index().get_by_origin(path) else {
                    return Err(e.into());
                };
                let (width, height) = (record.source_width(), record.source_height());
                if width == 0 || height == 0 {
                    return Err(e.into());
                }
                debug!(
                    "No descriptor for '{}' ({}), generating one for {}x{}",
                    path, e, width, height
                );
                Ok(generate_dzi_xml(
                    scale_dimension(width as u64, exponent),
                    scale_dimension(height as u64, exponent),
                    self.edge(),
                ))
            }
        }
    }

    /// DZI path of a random reference pyramid.
    pub fn random_image(&self) -> Result<String, DeepZoomError> {
        let record = self.index().get_random(&mut rand::thread_rng())?;
        Ok(format!(
            "{}.dzi",
            self.settings.path_template.image_path(&record.id())
        ))
    }

    // =========================================================================
    // Regimes
    // =========================================================================

    fn dispatch(&self, path: String, adjustments: Adjustments, options: Dispatch) -> TileFuture<'_> {
        Box::pin(async move {
            let request = DeepZoomPath::parse(&path)?;
            let regime = self.regime(request.level);
            trace!("{:?} regime for {}", regime, path);

            let mut tile = match regime {
                Regime::Turtle => return Ok(self.turtle.clone()),
                Regime::Redirect => return self.redirect(&path, &request, adjustments, options).await,
                Regime::Basic => {
                    self.check_known(&path)?;
                    self.basic(&path, &request, adjustments, options).await?
                }
                Regime::Render => {
                    self.check_known(&path)?;
                    self.render(&request, adjustments, options).await?
                }
            };
            if options.border {
                draw_border(&mut tile, BORDER_GREY);
            }
            Ok(tile)
        })
    }

    fn check_known(&self, path: &str) -> Result<(), DeepZoomError> {
        if self.settings.only_known_ids && self.index().get_by_origin(path).is_none() {
            return Err(DeepZoomError::UnknownPyramid(path.to_string()));
        }
        Ok(())
    }

    fn fill_grey(&self, path: &str, options: Dispatch) -> u8 {
        self.index()
            .fill_grey(path, &self.cache.settings().fill, options.fill_hint)
    }

    /// Pass the request through to the source.
    async fn basic(
        &self,
        path: &str,
        request: &DeepZoomPath,
        adjustments: Adjustments,
        options: Dispatch,
    ) -> Result<GrayImage, DeepZoomError> {
        let edge = self.edge();
        if let Some(record) = self.index().get_by_origin(path) {
            let (width, height) = (record.source_width() as u32, record.source_height() as u32);
            if width > 0
                && height > 0
                && !tile_in_bounds(width, height, request.level, request.x, request.y, edge)
            {
                debug!("'{}' lies outside the {}x{} source", path, width, height);
                return Ok(blank_tile(edge, self.fill_grey(path, options)));
            }
        }

        let image = match self.cache.source().fetch_tile(path, adjustments).await {
            Ok(image) => image,
            Err(SourceError::NotFound(_)) if options.pad => {
                debug!("No tile at '{}', serving blank tile", path);
                return Ok(blank_tile(edge, self.fill_grey(path, options)));
            }
            Err(e) => return Err(e.into()),
        };
        if options.pad && image.dimensions() != (edge, edge) {
            return Ok(pad_tile(image, edge, self.fill_grey(path, options)));
        }
        Ok(image)
    }

    /// Render a sub-tile of the mosaic of the covering basic tile.
    async fn render(
        &self,
        request: &DeepZoomPath,
        adjustments: Adjustments,
        options: Dispatch,
    ) -> Result<GrayImage, DeepZoomError> {
        let last_basic = self.settings.thresholds.last_basic;
        let depth = request.level - last_basic;
        let zoom = 1u32 << depth;
        let basic = request.with_tile(last_basic, request.x / zoom, request.y / zoom);
        let image = self
            .cache
            .render(
                &basic.to_string(),
                adjustments,
                request.x % zoom,
                request.y % zoom,
                depth + 1,
                options.pad,
            )
            .await?;
        Ok(image)
    }

    /// Re-address the request into the reference pyramid under it.
    ///
    /// At level `L` one source pixel of the basic tile covers `cell` output
    /// pixels per side, showing one pyramid's 2x2 block. Top-down rows show
    /// fraction rows 0-1, bottom-up rows 1-2, and seam rows the last third of
    /// the pyramid above followed by the first third of the one below.
    async fn redirect(
        &self,
        path: &str,
        request: &DeepZoomPath,
        adjustments: Adjustments,
        options: Dispatch,
    ) -> Result<GrayImage, DeepZoomError> {
        let thresholds = self.settings.thresholds;
        let edge = self.edge() as u64;
        let depth = request.level - thresholds.last_basic;
        if depth >= 48 {
            return Err(DeepZoomError::InvalidPath(path.to_string()));
        }
        let cell = 1u64 << depth;
        let half = cell / 2;

        let px = request.x as u64 * edge;
        let py = request.y as u64 * edge;
        let sx = px / cell;
        let sy = py / cell;
        let (local_x, local_y) = ((sx % edge) as u32, (sy % edge) as u32);
        let basic = request.with_tile(
            thresholds.last_basic,
            (sx / edge) as u32,
            (sy / edge) as u32,
        );

        let mosaic = self
            .cache
            .get_mosaic(&basic.to_string(), adjustments, options.pad)
            .await?;

        let (row, top) = match RowKind::classify(local_y) {
            RowKind::TopDown => (Some(local_y), sy * cell),
            RowKind::BottomUp => (Some(local_y), (sy * cell).saturating_sub(half)),
            RowKind::Seam if py - sy * cell < half => {
                (local_y.checked_sub(1), (sy * cell).saturating_sub(cell))
            }
            RowKind::Seam => (Some(local_y + 1), sy * cell + half),
        };
        let Some(target) = row.and_then(|row| mosaic.cell(local_x, row)) else {
            debug!(
                "No pyramid under {} (cell {},{} of {}), serving blank tile",
                path, local_x, local_y, basic
            );
            return Ok(blank_tile(self.edge(), self.fill_grey(path, options)));
        };

        let target_path = DeepZoomPath {
            prefix: format!(
                "{}_files",
                self.settings.path_template.image_path(&target.record.id())
            ),
            level: request.level - thresholds.last_render + thresholds.first_basic,
            x: ((px - sx * cell) / edge) as u32,
            y: (py.saturating_sub(top) / edge) as u32,
            suffix: request.suffix.clone(),
        };
        debug!("Redirecting {} to {}", path, target_path);

        let forwarded = Dispatch {
            pad: true,
            border: self.settings.border,
            fill_hint: Some(target.dynamic_fill),
        };
        self.dispatch(target_path.to_string(), adjustments, forwarded)
            .await
    }
}

impl<S: ImageSource> std::fmt::Debug for DeepZoomCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepZoomCoordinator")
            .field("settings", &self.settings)
            .field("edge", &self.edge())
            .field("index", self.index())
            .finish()
    }
}
