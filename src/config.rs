//! Configuration management for the mosaic server.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `MOSAIC_` prefix.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use nrt_mosaic::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("Serving on {}", config.bind_address()),
//!     Command::Concat(config) => println!("Shards go to {}", config.shard_root.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `MOSAIC_HOST` / `MOSAIC_PORT` - Bind address (default: 0.0.0.0:3000)
//! - `MOSAIC_SHARD_ROOT` - Directory of `<n>.dat` shard files (required)
//! - `MOSAIC_IMAGE_SERVER` - Image server URL template
//! - `MOSAIC_TILE_ROOT` - Local tile directory, replaces the image server
//! - `MOSAIC_FILL_STYLE` - `fixed`, `average` or `dynamic` (default: dynamic)
//! - `MOSAIC_LAST_BASIC_LEVEL` / `MOSAIC_LAST_RENDER_LEVEL` - Regime bounds

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::deepzoom::{
    DeepZoomSettings, LevelThresholds, PathTemplate, DEFAULT_DZI_ZOOM_EXPONENT,
    DEFAULT_FIRST_BASIC_LEVEL, DEFAULT_LAST_BASIC_LEVEL, DEFAULT_LAST_RENDER_LEVEL,
    DEFAULT_PATH_REGEX, DEFAULT_PATH_REPLACEMENT, DEFAULT_TURTLE_LEVEL,
};
use crate::index::{CollapseThreshold, IndexConfig, DEFAULT_BUCKET_SIZE, DEFAULT_LOAD_THREADS};
use crate::pyramid::{
    PyramidSettings, DEFAULT_HOT_LEVEL, DEFAULT_MAX_DYNAMIC_DISTANCE, DEFAULT_MAX_LEVEL,
};
use crate::server::DEFAULT_CACHE_MAX_AGE;
use crate::source::DEFAULT_IMAGE_SERVER_TEMPLATE;
use crate::tile::{
    FillPolicy, FillStyle, MosaicSettings, DEFAULT_FILL_GREY, DEFAULT_JPEG_QUALITY,
    DEFAULT_MAPPING_SEED, DEFAULT_MOSAIC_CACHE_CAPACITY, DEFAULT_TILE_EDGE,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

// =============================================================================
// CLI Arguments
// =============================================================================

/// NRT Mosaic - deep zoom tiles that dissolve into photomosaics.
#[derive(Parser, Debug, Clone)]
#[command(name = "nrt-mosaic")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve deep zoom tiles over HTTP.
    Serve(Box<ServeConfig>),

    /// Pack individual record files into per-bucket shard files.
    Concat(ConcatConfig),
}

/// Options shared by every command that reads or writes records.
#[derive(Args, Debug, Clone)]
pub struct PyramidArgs {
    /// Highest level stored in each record.
    #[arg(long, default_value_t = DEFAULT_MAX_LEVEL, env = "MOSAIC_MAX_LEVEL")]
    pub max_level: u32,

    /// Levels up to this one are mirrored in owned memory.
    #[arg(long, default_value_t = DEFAULT_HOT_LEVEL, env = "MOSAIC_HOT_LEVEL")]
    pub hot_level: u32,

    /// Grey marking pixels absent from a reference image. Defaults to the fill grey.
    #[arg(long, env = "MOSAIC_MISSING_GREY")]
    pub missing_grey: Option<u8>,

    /// Grey used for padding, blank tiles and fixed fills.
    #[arg(long, default_value_t = DEFAULT_FILL_GREY, env = "MOSAIC_FILL_GREY")]
    pub fill_grey: u8,

    /// Maximum distance between a dynamic fill and a record's average grey.
    #[arg(long, default_value_t = DEFAULT_MAX_DYNAMIC_DISTANCE, env = "MOSAIC_MAX_DYNAMIC_DISTANCE")]
    pub max_dynamic_distance: u8,

    /// Grey values per index bucket and per shard file.
    #[arg(long, default_value_t = DEFAULT_BUCKET_SIZE, env = "MOSAIC_BUCKET_SIZE")]
    pub bucket_size: u32,
}

impl PyramidArgs {
    pub fn settings(&self) -> PyramidSettings {
        PyramidSettings {
            max_level: self.max_level,
            hot_level: self.hot_level,
            missing_grey: self.missing_grey(),
            max_dynamic_distance: self.max_dynamic_distance,
        }
    }

    pub fn missing_grey(&self) -> u8 {
        self.missing_grey.unwrap_or(self.fill_grey)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.settings().validate()?;
        if self.hot_level > self.max_level {
            return Err(format!(
                "hot level {} must not exceed max level {}",
                self.hot_level, self.max_level
            ));
        }
        if self.bucket_size == 0 || self.bucket_size > 256 {
            return Err("bucket_size must be between 1 and 256".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Serve Command
// =============================================================================

/// Configuration for the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "MOSAIC_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "MOSAIC_PORT")]
    pub port: u16,

    // =========================================================================
    // Index Configuration
    // =========================================================================
    /// Directory holding the `<n>.dat` shard files.
    #[arg(long, env = "MOSAIC_SHARD_ROOT")]
    pub shard_root: PathBuf,

    #[command(flatten)]
    pub pyramid: PyramidArgs,

    /// Minimum records in the lightest bucket, as a count or `N%`.
    #[arg(long, default_value = "0", env = "MOSAIC_COLLAPSE_UP")]
    pub collapse_up: CollapseThreshold,

    /// Minimum records in the darkest bucket, as a count or `N%`.
    #[arg(long, default_value = "0", env = "MOSAIC_COLLAPSE_DOWN")]
    pub collapse_down: CollapseThreshold,

    /// Threads used to load shard files.
    #[arg(long, default_value_t = DEFAULT_LOAD_THREADS, env = "MOSAIC_LOAD_THREADS")]
    pub load_threads: usize,

    // =========================================================================
    // Mosaic Configuration
    // =========================================================================
    /// Edge of source and output tiles in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_EDGE, env = "MOSAIC_TILE_EDGE")]
    pub tile_edge: u32,

    /// Maximum number of mapped mosaics to cache.
    #[arg(long, default_value_t = DEFAULT_MOSAIC_CACHE_CAPACITY, env = "MOSAIC_CACHE_MOSAICS")]
    pub cache_mosaics: usize,

    /// Seed for choosing among equally close reference images.
    #[arg(long, default_value_t = DEFAULT_MAPPING_SEED, env = "MOSAIC_MAPPING_SEED")]
    pub mapping_seed: u64,

    /// How missing pixels are painted.
    #[arg(long, value_enum, default_value_t = FillStyle::Dynamic, env = "MOSAIC_FILL_STYLE")]
    pub fill_style: FillStyle,

    // =========================================================================
    // Deep Zoom Configuration
    // =========================================================================
    /// Level a redirect lands on inside a reference image.
    #[arg(long, default_value_t = DEFAULT_FIRST_BASIC_LEVEL, env = "MOSAIC_FIRST_BASIC_LEVEL")]
    pub first_basic_level: u32,

    /// Deepest level passed through to the image source.
    #[arg(long, default_value_t = DEFAULT_LAST_BASIC_LEVEL, env = "MOSAIC_LAST_BASIC_LEVEL")]
    pub last_basic_level: u32,

    /// Deepest level rendered as a mosaic.
    #[arg(long, default_value_t = DEFAULT_LAST_RENDER_LEVEL, env = "MOSAIC_LAST_RENDER_LEVEL")]
    pub last_render_level: u32,

    /// Levels above this one are served the placeholder image.
    #[arg(long, default_value_t = DEFAULT_TURTLE_LEVEL, env = "MOSAIC_TURTLE_LEVEL")]
    pub turtle_level: u32,

    /// PNG or JPEG used as the placeholder image.
    #[arg(long, env = "MOSAIC_TURTLE_IMAGE")]
    pub turtle_image: Option<PathBuf>,

    /// DZI sizes are announced 2^N times larger than the source.
    #[arg(long, default_value_t = DEFAULT_DZI_ZOOM_EXPONENT, env = "MOSAIC_DZI_ZOOM_EXPONENT")]
    pub dzi_zoom_exponent: u32,

    /// Regex applied to the dashed UUID of a reference image.
    #[arg(long, default_value = DEFAULT_PATH_REGEX, env = "MOSAIC_PATH_REGEX")]
    pub path_regex: String,

    /// Replacement producing the reference image path from the regex groups.
    #[arg(long, default_value = DEFAULT_PATH_REPLACEMENT, env = "MOSAIC_PATH_REPLACEMENT")]
    pub path_replacement: String,

    /// Reject paths whose pyramid is not in the index.
    #[arg(long, default_value_t = false, env = "MOSAIC_ONLY_KNOWN_IDS")]
    pub only_known_ids: bool,

    /// Draw a frame around redirected tiles.
    #[arg(long, default_value_t = false, env = "MOSAIC_BORDER")]
    pub border: bool,

    // =========================================================================
    // Image Source Configuration
    // =========================================================================
    /// Image server URL with `{gamma}`, `{contrast}` and `{path}` placeholders.
    #[arg(long, default_value = DEFAULT_IMAGE_SERVER_TEMPLATE, env = "MOSAIC_IMAGE_SERVER")]
    pub image_server: String,

    /// Serve basic tiles from this directory instead of the image server.
    #[arg(long, env = "MOSAIC_TILE_ROOT")]
    pub tile_root: Option<PathBuf>,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "MOSAIC_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "MOSAIC_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated). Any origin if not specified.
    #[arg(long, env = "MOSAIC_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.pyramid.validate()?;

        if self.load_threads == 0 {
            return Err("load_threads must be greater than 0".to_string());
        }
        if self.cache_mosaics == 0 {
            return Err("cache_mosaics must be greater than 0".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.tile_edge < 2 || !self.tile_edge.is_power_of_two() {
            return Err(format!(
                "tile_edge must be a power of two of at least 2, got {}",
                self.tile_edge
            ));
        }
        if self.dzi_zoom_exponent > 53 {
            return Err("dzi_zoom_exponent must be at most 53".to_string());
        }
        self.thresholds()
            .validate(self.tile_edge, self.pyramid.max_level)?;
        self.path_template()?;

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            settings: self.pyramid.settings(),
            bucket_size: self.pyramid.bucket_size,
            collapse_up: self.collapse_up,
            collapse_down: self.collapse_down,
            threads: self.load_threads,
        }
    }

    pub fn fill_policy(&self) -> FillPolicy {
        FillPolicy::new(
            self.fill_style,
            self.pyramid.fill_grey,
            self.pyramid.missing_grey(),
        )
    }

    pub fn mosaic_settings(&self) -> MosaicSettings {
        MosaicSettings {
            edge: self.tile_edge,
            capacity: self.cache_mosaics,
            seed: self.mapping_seed,
            fill: self.fill_policy(),
        }
    }

    pub fn thresholds(&self) -> LevelThresholds {
        LevelThresholds {
            first_basic: self.first_basic_level,
            last_basic: self.last_basic_level,
            last_render: self.last_render_level,
            turtle: self.turtle_level,
        }
    }

    pub fn path_template(&self) -> Result<PathTemplate, String> {
        PathTemplate::new(&self.path_regex, self.path_replacement.as_str())
    }

    pub fn deepzoom_settings(&self) -> Result<DeepZoomSettings, String> {
        Ok(DeepZoomSettings {
            thresholds: self.thresholds(),
            dzi_exponent: self.dzi_zoom_exponent,
            path_template: self.path_template()?,
            only_known_ids: self.only_known_ids,
            border: self.border,
        })
    }
}

// =============================================================================
// Concat Command
// =============================================================================

/// Configuration for the `concat` command.
#[derive(Args, Debug, Clone)]
pub struct ConcatConfig {
    /// Root of the `aa/bb/<hex>.dat` record tree.
    #[arg(long, env = "MOSAIC_TREE_ROOT")]
    pub tree_root: PathBuf,

    /// Directory receiving the `<n>.dat` shard files.
    #[arg(long, env = "MOSAIC_SHARD_ROOT")]
    pub shard_root: PathBuf,

    #[command(flatten)]
    pub pyramid: PyramidArgs,

    /// Replace existing shard files instead of refusing to run.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ConcatConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.pyramid.validate()?;
        if self.tree_root == self.shard_root {
            return Err("tree_root and shard_root must differ".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
