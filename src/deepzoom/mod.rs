//! Deep zoom address space.
//!
//! A request for `<prefix>/<level>/<x>_<y><suffix>` is served in one of four
//! regimes, decided by its level alone:
//!
//! ```text
//!  level:   0 ..= last_basic | ..= last_render | ..= turtle | above
//!  regime:  Basic            | Render          | Redirect   | Turtle
//! ```
//!
//! - **Basic**: the source tile, passed through (optionally padded).
//! - **Render**: a sub-tile of the photomosaic built from one basic tile.
//! - **Redirect**: a tile of one reference pyramid's own image, addressed by
//!   a rewritten path and dispatched again.
//! - **Turtle**: a fixed placeholder, cutting off runaway redirects.

mod coordinator;
mod dzi;
mod path;

use std::sync::Arc;

use regex::Regex;

use crate::pyramid::PyramidId;

pub use coordinator::{turtle_tile, DeepZoomCoordinator, DeepZoomSettings, BORDER_GREY};
pub use dzi::{
    calculate_max_dzi_level, dzi_level_dimensions, dzi_tile_count, generate_dzi_xml,
    scale_descriptor, scale_dimension, tile_in_bounds, DEFAULT_DZI_ZOOM_EXPONENT,
    MAX_SAFE_DIMENSION,
};
pub use path::DeepZoomPath;

/// Default level at which a redirect enters a reference pyramid's image.
pub const DEFAULT_FIRST_BASIC_LEVEL: u32 = 8;

/// Default deepest pass-through level.
pub const DEFAULT_LAST_BASIC_LEVEL: u32 = 13;

/// Default deepest mosaic level.
pub const DEFAULT_LAST_RENDER_LEVEL: u32 = 21;

/// Default level above which only the placeholder is served.
pub const DEFAULT_TURTLE_LEVEL: u32 = 30;

/// Default pyramid path regex, applied to the dashed UUID.
pub const DEFAULT_PATH_REGEX: &str = "^(.)(.)(.)(.)(.*)$";

/// Default pyramid path replacement.
pub const DEFAULT_PATH_REPLACEMENT: &str = "/avis-show/symlinks/$1/$2/$3/$4/$1$2$3$4$5.jp2";

// =============================================================================
// Regimes
// =============================================================================

/// How a request at a given level is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Basic,
    Render,
    Redirect,
    Turtle,
}

/// Level boundaries between the regimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelThresholds {
    /// Level a redirected request lands on inside the reference image
    pub first_basic: u32,

    /// Deepest level passed through to the source
    pub last_basic: u32,

    /// Deepest level rendered as a mosaic
    pub last_render: u32,

    /// Deepest level served at all
    pub turtle: u32,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            first_basic: DEFAULT_FIRST_BASIC_LEVEL,
            last_basic: DEFAULT_LAST_BASIC_LEVEL,
            last_render: DEFAULT_LAST_RENDER_LEVEL,
            turtle: DEFAULT_TURTLE_LEVEL,
        }
    }
}

impl LevelThresholds {
    pub fn regime(&self, level: u32) -> Regime {
        if level > self.turtle {
            Regime::Turtle
        } else if level <= self.last_basic {
            Regime::Basic
        } else if level <= self.last_render {
            Regime::Render
        } else {
            Regime::Redirect
        }
    }

    /// Mosaic zoom factor between the last basic and the last render level.
    pub fn render_span(&self) -> u32 {
        self.last_render - self.last_basic
    }

    /// Check ordering, and that render and redirect tiles align with `edge`.
    pub fn validate(&self, edge: u32, max_level: u32) -> Result<(), String> {
        if self.first_basic > self.last_basic {
            return Err(format!(
                "first basic level {} is above last basic level {}",
                self.first_basic, self.last_basic
            ));
        }
        if self.last_basic >= self.last_render {
            return Err(format!(
                "last basic level {} must be below last render level {}",
                self.last_basic, self.last_render
            ));
        }
        if self.last_render >= self.turtle {
            return Err(format!(
                "last render level {} must be below turtle level {}",
                self.last_render, self.turtle
            ));
        }
        if !edge.is_power_of_two() {
            return Err(format!("tile edge {} is not a power of two", edge));
        }
        let span = self.render_span();
        if span > max_level {
            return Err(format!(
                "render span {} exceeds pyramid max level {}",
                span, max_level
            ));
        }
        // Redirected tiles must stay inside one reference pyramid, and the
        // deepest render must still show at least one source pixel.
        let zoom = 1u64 << span.min(63);
        if zoom != edge as u64 {
            return Err(format!(
                "2^(last render - last basic) = {} must equal tile edge {}",
                zoom, edge
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Pyramid Paths
// =============================================================================

/// Deep zoom path of a reference pyramid's own image, from its ID.
///
/// The regex is applied to the dashed UUID form of the ID and replaced with
/// `replacement` (`$1`-style group references).
#[derive(Debug, Clone)]
pub struct PathTemplate {
    regex: Arc<Regex>,
    replacement: String,
}

impl PathTemplate {
    pub fn new(regex: &str, replacement: impl Into<String>) -> Result<Self, String> {
        let regex = Regex::new(regex).map_err(|e| format!("invalid path regex: {}", e))?;
        Ok(Self {
            regex: Arc::new(regex),
            replacement: replacement.into(),
        })
    }

    /// Image path for `id`, without the `_files` or `.dzi` suffix.
    pub fn image_path(&self, id: &PyramidId) -> String {
        self.regex
            .replace(&id.to_dashed(), self.replacement.as_str())
            .into_owned()
    }
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self {
            regex: Arc::new(Regex::new(DEFAULT_PATH_REGEX).expect("static regex is valid")),
            replacement: DEFAULT_PATH_REPLACEMENT.to_string(),
        }
    }
}
