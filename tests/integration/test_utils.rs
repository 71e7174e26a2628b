//! Test utilities for integration tests.
//!
//! This module provides a mock image source that records every request, and
//! helpers that build a tiny but complete corpus: two uniform pyramids, a
//! 4x4 source page split into a dark and a light half, and a coordinator
//! whose regime levels fit that page.

use async_trait::async_trait;
use image::{GrayImage, Luma};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use nrt_mosaic::error::SourceError;
use nrt_mosaic::pyramid::{tile_edge, FRACTION_HEIGHT, FRACTION_WIDTH};
use nrt_mosaic::tile::DEFAULT_MAPPING_SEED;
use nrt_mosaic::{
    Adjustments, DeepZoomCoordinator, DeepZoomSettings, FillPolicy, FillStyle, ImageSource,
    IndexConfig, LevelThresholds, MosaicCache, MosaicSettings, PathTemplate, PyramidId,
    PyramidIndex, PyramidRecord, PyramidSettings,
};

// =============================================================================
// Corpus Constants
// =============================================================================

/// Source tile edge used throughout the tests.
pub const EDGE: u32 = 4;

/// Grey of the dark pyramid and the left half of the page.
pub const DARK: u8 = 40;

/// Grey of the light pyramid and the right half of the page.
pub const LIGHT: u8 = 200;

/// Fixed fill grey, distinct from both pyramids and the missing grey.
pub const FILL: u8 = 128;

/// Source dimensions stored in the dark pyramid's header.
pub const DARK_SOURCE_SIZE: (u16, u16) = (600, 400);

/// The page being zoomed into. Not itself a pyramid.
pub const PAGE_ID: &str = "0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0";

pub fn dark_id() -> PyramidId {
    PyramidId::from_hex("9c05d958b61647c19e4f63ec2dd9429e").unwrap()
}

pub fn light_id() -> PyramidId {
    PyramidId::from_hex("1b2e3f40a5b64c7d8e9fa0b1c2d3e4f5").unwrap()
}

/// Deep zoom path of a tile of the page.
pub fn page_tile(level: u32, x: u32, y: u32) -> String {
    format!("/pages/{}.jp2_files/{}/{}_{}.jpg", PAGE_ID, level, x, y)
}

/// Deep zoom path of a tile inside the image of `id`.
pub fn pyramid_tile(id: &PyramidId, level: u32, x: u32, y: u32) -> String {
    format!(
        "{}_files/{}/{}_{}.jpg",
        PathTemplate::default().image_path(id),
        level,
        x,
        y
    )
}

// =============================================================================
// Mock Image Source with Request Tracking
// =============================================================================

/// An in-memory image source that tracks every tile request.
///
/// Tiles and descriptors not registered return `SourceError::NotFound`.
pub struct MockImageSource {
    tiles: HashMap<String, GrayImage>,
    failures: HashMap<String, SourceError>,
    descriptors: HashMap<String, String>,
    fetch_count: AtomicUsize,
    requests: RwLock<Vec<String>>,
}

impl Default for MockImageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockImageSource {
    pub fn new() -> Self {
        Self {
            tiles: HashMap::new(),
            failures: HashMap::new(),
            descriptors: HashMap::new(),
            fetch_count: AtomicUsize::new(0),
            requests: RwLock::new(Vec::new()),
        }
    }

    pub fn with_tile(mut self, path: impl Into<String>, tile: GrayImage) -> Self {
        self.tiles.insert(path.into(), tile);
        self
    }

    /// Make requests for `path` fail with `error`.
    pub fn with_failure(mut self, path: impl Into<String>, error: SourceError) -> Self {
        self.failures.insert(path.into(), error);
        self
    }

    pub fn with_descriptor(mut self, path: impl Into<String>, xml: impl Into<String>) -> Self {
        self.descriptors.insert(path.into(), xml.into());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Paths of every tile request, in order.
    pub async fn requested_paths(&self) -> Vec<String> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    async fn fetch_tile(
        &self,
        path: &str,
        _adjustments: Adjustments,
    ) -> Result<GrayImage, SourceError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.requests.write().await.push(path.to_string());
        if let Some(error) = self.failures.get(path) {
            return Err(error.clone());
        }
        self.tiles
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }

    async fn fetch_descriptor(&self, path: &str) -> Result<String, SourceError> {
        self.descriptors
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }
}

// =============================================================================
// Pyramids and Index
// =============================================================================

pub fn small_settings() -> PyramidSettings {
    PyramidSettings::with_max_level(3)
}

/// A pyramid whose every pixel at every level is `grey`.
pub fn uniform_record(id: PyramidId, grey: u8, settings: PyramidSettings) -> PyramidRecord {
    let mut record = PyramidRecord::create(id, settings);
    for level in 1..=settings.max_level {
        let edge = tile_edge(level) as usize;
        for fy in 0..FRACTION_HEIGHT {
            for fx in 0..FRACTION_WIDTH {
                record
                    .set_level(level, fx, fy, &vec![grey; edge * edge])
                    .unwrap();
            }
        }
    }
    record.set_average_grey(grey).unwrap();
    record
}

pub fn index_config() -> IndexConfig {
    IndexConfig {
        settings: small_settings(),
        ..IndexConfig::default()
    }
}

/// The dark pyramid, with source dimensions, and the light one without.
pub fn corpus() -> Vec<PyramidRecord> {
    let mut dark = uniform_record(dark_id(), DARK, small_settings());
    dark.set_source_size(DARK_SOURCE_SIZE.0, DARK_SOURCE_SIZE.1)
        .unwrap();
    let light = uniform_record(light_id(), LIGHT, small_settings());
    vec![dark, light]
}

pub fn create_index() -> Arc<PyramidIndex> {
    Arc::new(PyramidIndex::build(corpus(), index_config()).unwrap())
}

// =============================================================================
// Source Tiles
// =============================================================================

/// A 4x4 page tile: columns 0-1 dark, columns 2-3 light.
pub fn split_tile() -> GrayImage {
    GrayImage::from_fn(EDGE, EDGE, |x, _| {
        if x < EDGE / 2 {
            Luma([DARK])
        } else {
            Luma([LIGHT])
        }
    })
}

/// Mock source holding the page's last basic tile.
pub fn page_source() -> MockImageSource {
    MockImageSource::new().with_tile(page_tile(4, 0, 0), split_tile())
}

// =============================================================================
// Coordinator
// =============================================================================

/// Levels fitting a 4 pixel tile: basic up to 4, render up to 6, redirect up
/// to 9, redirects landing on level 2.
pub fn small_thresholds() -> LevelThresholds {
    LevelThresholds {
        first_basic: 2,
        last_basic: 4,
        last_render: 6,
        turtle: 9,
    }
}

pub fn mosaic_settings(style: FillStyle) -> MosaicSettings {
    MosaicSettings {
        edge: EDGE,
        capacity: 8,
        seed: DEFAULT_MAPPING_SEED,
        fill: FillPolicy::new(style, FILL, small_settings().missing_grey),
    }
}

pub fn deepzoom_settings() -> DeepZoomSettings {
    DeepZoomSettings {
        thresholds: small_thresholds(),
        ..DeepZoomSettings::default()
    }
}

pub fn create_coordinator(
    source: Arc<MockImageSource>,
    settings: DeepZoomSettings,
    style: FillStyle,
) -> DeepZoomCoordinator<MockImageSource> {
    let cache = MosaicCache::new(source, create_index(), mosaic_settings(style));
    DeepZoomCoordinator::new(cache, settings, None)
}

/// Every pixel of `image` equals `grey`.
pub fn is_uniform(image: &GrayImage, grey: u8) -> bool {
    image.pixels().all(|pixel| pixel[0] == grey)
}

/// Check if data looks like a valid JPEG (starts with SOI marker, ends with EOI).
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4
        && data[0] == 0xFF
        && data[1] == 0xD8
        && data[data.len() - 2] == 0xFF
        && data[data.len() - 1] == 0xD9
}
