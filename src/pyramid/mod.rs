//! Reference image pyramids.
//!
//! - [`id`] - 128-bit identifiers parsed from origin strings
//! - [`record`] - the fixed-layout binary record and its grey metrics
//! - [`shard`] - concatenated shard files and the offline consolidation step

pub mod id;
pub mod record;
pub mod shard;

pub use id::{PyramidId, ID_BYTES};
pub use record::{
    byte_count, level_offset, tile_edge, GreyRange, PyramidRecord, PyramidSettings, ShardArena,
    DEFAULT_HOT_LEVEL, DEFAULT_MAX_DYNAMIC_DISTANCE, DEFAULT_MAX_LEVEL, DEFAULT_MISSING_GREY,
    FRACTION_HEIGHT, FRACTION_WIDTH, IRRELEVANT_DYNAMIC_GREY, MAX_SUPPORTED_LEVEL,
};
pub use shard::{
    concatenate_tree, list_shards, record_files, ConcatSummary, ShardFile, ShardWriter,
    SHARD_EXTENSION,
};
