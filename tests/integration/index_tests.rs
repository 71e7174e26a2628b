//! Shard round trips and index lookups.
//!
//! Tests verify:
//! - Records stored in the fan-out tree survive concatenation and loading
//! - Shard loading skips corrupt data and refuses an empty directory
//! - Lookups by grey, origin and at random on a loaded index

use std::fs;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use nrt_mosaic::error::IndexError;
use nrt_mosaic::{
    concatenate_tree, BucketTable, CollapseThreshold, FillPolicy, FillStyle, IndexConfig,
    PathTemplate, PyramidIndex, PyramidRecord, ShardWriter,
};

use super::test_utils::{
    corpus, dark_id, index_config, light_id, small_settings, uniform_record, DARK,
    DARK_SOURCE_SIZE, FILL, LIGHT,
};

// =============================================================================
// Shard Round Trip
// =============================================================================

#[test]
fn test_tree_concatenation_round_trip() {
    let tree = TempDir::new().unwrap();
    let shards = tree.path().join("shards");

    for record in corpus() {
        assert!(record.store_to_tree(tree.path(), false).unwrap());
    }

    let summary = concatenate_tree(tree.path(), &shards, small_settings(), 64, false).unwrap();
    assert_eq!(summary.records, 2);
    assert_eq!(summary.skipped, 0);
    // Greys 40 and 200 fall in different 64-grey buckets
    assert_eq!(summary.shards, 2);

    let index = PyramidIndex::load(&shards, index_config()).unwrap();
    assert_eq!(index.len(), 2);

    let dark = index.get_by_id(&dark_id()).unwrap();
    assert_eq!(dark.top_primary(), DARK);
    assert_eq!(
        (dark.source_width(), dark.source_height()),
        DARK_SOURCE_SIZE
    );
    assert_eq!(index.get_by_id(&light_id()).unwrap().top_primary(), LIGHT);
}

#[test]
fn test_concatenation_skips_truncated_records() {
    let tree = TempDir::new().unwrap();
    let shards = tree.path().join("shards");

    for record in corpus() {
        record.store_to_tree(tree.path(), false).unwrap();
    }
    let broken = PyramidRecord::tree_path(tree.path(), &dark_id());
    let bytes = fs::read(&broken).unwrap();
    fs::write(&broken, &bytes[..bytes.len() / 2]).unwrap();

    let summary = concatenate_tree(tree.path(), &shards, small_settings(), 1, false).unwrap();
    assert_eq!(summary.records, 1);
    assert_eq!(summary.skipped, 1);

    let index = PyramidIndex::load(&shards, index_config()).unwrap();
    assert!(index.get_by_id(&dark_id()).is_none());
    assert!(index.get_by_id(&light_id()).is_some());
}

#[test]
fn test_concatenation_refuses_existing_shards() {
    let tree = TempDir::new().unwrap();
    let shards = tree.path().join("shards");
    for record in corpus() {
        record.store_to_tree(tree.path(), false).unwrap();
    }

    concatenate_tree(tree.path(), &shards, small_settings(), 1, false).unwrap();
    assert!(concatenate_tree(tree.path(), &shards, small_settings(), 1, false).is_err());

    let summary = concatenate_tree(tree.path(), &shards, small_settings(), 1, true).unwrap();
    assert_eq!(summary.records, 2);
}

#[test]
fn test_load_ignores_duplicates_across_shards() {
    let dir = TempDir::new().unwrap();
    let records = corpus();

    let mut writer = ShardWriter::create(dir.path(), 1, false).unwrap();
    for record in records.iter().chain(records.iter()) {
        writer.append(record).unwrap();
    }
    let summary = writer.finish().unwrap();
    assert_eq!(summary.records, 4);

    let index = PyramidIndex::load(dir.path(), index_config()).unwrap();
    assert_eq!(index.len(), 2);
}

#[test]
fn test_load_trailing_garbage_keeps_whole_records() {
    let dir = TempDir::new().unwrap();
    let mut writer = ShardWriter::create(dir.path(), 1, false).unwrap();
    for record in corpus() {
        writer.append(&record).unwrap();
    }
    writer.finish().unwrap();

    // Append half a record to the dark shard
    let shard = dir.path().join(format!("{}.dat", DARK));
    let mut bytes = fs::read(&shard).unwrap();
    bytes.extend(vec![7u8; small_settings().byte_count() / 2]);
    fs::write(&shard, bytes).unwrap();

    let index = PyramidIndex::load(dir.path(), index_config()).unwrap();
    assert_eq!(index.len(), 2);
}

#[test]
fn test_load_empty_or_missing_root() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        PyramidIndex::load(dir.path(), index_config()),
        Err(IndexError::Empty(_))
    ));
    assert!(matches!(
        PyramidIndex::load(&dir.path().join("absent"), index_config()),
        Err(IndexError::MissingShardRoot(_))
    ));
}

// =============================================================================
// Lookups
// =============================================================================

#[test]
fn test_closest_bucket_searches_outward() {
    let index = PyramidIndex::build(corpus(), index_config()).unwrap();
    let mut rng = StdRng::seed_from_u64(3);

    assert_eq!(index.get_closest_top(DARK, 0, &mut rng).unwrap().id(), dark_id());
    assert_eq!(index.get_closest_top(90, 0, &mut rng).unwrap().id(), dark_id());
    assert_eq!(index.get_closest_top(150, 0, &mut rng).unwrap().id(), light_id());
    assert_eq!(index.get_closest_bottom(255, 0, &mut rng).unwrap().id(), light_id());
    assert_eq!(index.find_closest(BucketTable::Top, 0).unwrap().len(), 1);
}

#[test]
fn test_collapse_merges_sparse_ends() {
    let mut records = corpus();
    records.push(uniform_record(
        nrt_mosaic::PyramidId::new(7, 7),
        DARK + 5,
        small_settings(),
    ));
    let config = IndexConfig {
        collapse_down: CollapseThreshold::Count(2),
        ..index_config()
    };
    let index = PyramidIndex::build(records, config).unwrap();

    // The darkest bucket now holds both dark pyramids
    let darkest = index.find_closest(BucketTable::Top, 0).unwrap();
    assert_eq!(darkest.len(), 2);
    assert_eq!(index.len(), 3);
}

#[test]
fn test_lookup_by_origin_and_fill() {
    let index = PyramidIndex::build(corpus(), index_config()).unwrap();
    let origin = format!("{}.dzi", PathTemplate::default().image_path(&dark_id()));

    assert_eq!(index.get_by_origin(&origin).unwrap().id(), dark_id());
    assert!(index.get_by_origin("/no/uuid/here.jpg").is_none());

    let average = FillPolicy::new(FillStyle::Average, FILL, 0xCC);
    assert_eq!(index.fill_grey(&origin, &average, None), DARK);
    assert_eq!(index.fill_grey("/no/uuid/here.jpg", &average, None), FILL);

    let dynamic = FillPolicy::new(FillStyle::Dynamic, FILL, 0xCC);
    assert_eq!(index.fill_grey(&origin, &dynamic, Some(17)), 17);
    assert_eq!(index.fill_grey(&origin, &dynamic, None), FILL);
}

#[test]
fn test_random_covers_corpus() {
    let index = PyramidIndex::build(corpus(), index_config()).unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..64 {
        seen.insert(index.get_random(&mut rng).unwrap().id());
    }
    assert_eq!(seen.len(), 2);
}
