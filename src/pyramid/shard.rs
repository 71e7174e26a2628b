//! Shard files: raw concatenations of fixed-size records.
//!
//! Shards are named `<n>.dat` where `n` is the top-primary bucket of every
//! record inside. They are produced offline from the individual record tree
//! (`aa/bb/<hex>.dat`) and memory-mapped by the index at startup.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::error::PyramidError;

use super::record::{PyramidRecord, PyramidSettings, ShardArena};

/// Extension used for both shard files and individual record files.
pub const SHARD_EXTENSION: &str = "dat";

/// One `<n>.dat` shard on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFile {
    /// Bucket number taken from the file name
    pub bucket: u32,

    /// Full path
    pub path: PathBuf,
}

impl ShardFile {
    /// Map the shard into memory.
    pub fn map(&self) -> Result<Arc<ShardArena>, PyramidError> {
        ShardArena::map(&self.path)
    }
}

/// Numerically named shard files in `root`, sorted by bucket.
pub fn list_shards(root: &Path) -> Result<Vec<ShardFile>, PyramidError> {
    let mut shards = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION) {
            continue;
        }
        let bucket = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u32>().ok());
        match bucket {
            Some(bucket) => shards.push(ShardFile { bucket, path }),
            None => trace!("Ignoring non-shard file {}", path.display()),
        }
    }
    shards.sort_by_key(|shard| shard.bucket);
    Ok(shards)
}

// =============================================================================
// Shard Writer
// =============================================================================

/// Totals reported after writing shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConcatSummary {
    pub records: usize,
    pub skipped: usize,
    pub shards: usize,
}

/// Appends records to per-bucket shard files.
pub struct ShardWriter {
    root: PathBuf,
    bucket_size: u32,
    writers: BTreeMap<u32, BufWriter<File>>,
    summary: ConcatSummary,
}

impl ShardWriter {
    /// Create the shard directory.
    ///
    /// Existing shards are removed when `overwrite` is set; otherwise their
    /// presence is an error so two corpora are never mixed.
    pub fn create(root: &Path, bucket_size: u32, overwrite: bool) -> Result<Self, PyramidError> {
        if root.exists() {
            let existing = list_shards(root)?;
            if !existing.is_empty() {
                if !overwrite {
                    return Err(PyramidError::Io(format!(
                        "{} already holds {} shard(s)",
                        root.display(),
                        existing.len()
                    )));
                }
                info!(
                    "Removing {} old shard(s) from {}",
                    existing.len(),
                    root.display()
                );
                for shard in existing {
                    fs::remove_file(&shard.path)?;
                }
            }
        } else {
            fs::create_dir_all(root)?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            bucket_size: bucket_size.max(1),
            writers: BTreeMap::new(),
            summary: ConcatSummary::default(),
        })
    }

    /// Shard bucket a record belongs to.
    pub fn bucket_of(&self, record: &PyramidRecord) -> u32 {
        u32::from(record.top_primary()) / self.bucket_size
    }

    /// Append one record to its bucket's shard.
    pub fn append(&mut self, record: &PyramidRecord) -> Result<usize, PyramidError> {
        let bucket = self.bucket_of(record);
        let writer = match self.writers.entry(bucket) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => {
                let path = self.root.join(format!("{}.{}", bucket, SHARD_EXTENSION));
                debug!("Creating shard {}", path.display());
                entry.insert(BufWriter::new(File::create(path)?))
            }
        };
        let written = record.store(writer)?;
        self.summary.records += 1;
        trace!("Added {:?} to shard {}", record, bucket);
        Ok(written)
    }

    /// Flush every shard and report totals.
    pub fn finish(mut self) -> Result<ConcatSummary, PyramidError> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        self.summary.shards = self.writers.len();
        Ok(self.summary)
    }
}

// =============================================================================
// Tree Concatenation
// =============================================================================

fn two_char_dirs(root: &Path) -> Result<Vec<PathBuf>, PyramidError> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.len() == 2)
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Individual record files in the `aa/bb/<hex>.dat` tree under `root`.
pub fn record_files(root: &Path) -> Result<Vec<PathBuf>, PyramidError> {
    let mut files = Vec::new();
    for first in two_char_dirs(root)? {
        for second in two_char_dirs(&first)? {
            let mut dats: Vec<PathBuf> = fs::read_dir(&second)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path.extension().and_then(|e| e.to_str()) == Some(SHARD_EXTENSION)
                })
                .collect();
            dats.sort();
            files.append(&mut dats);
        }
    }
    Ok(files)
}

/// Consolidate the individual record tree at `tree_root` into shards.
///
/// Unreadable or truncated record files are skipped with a warning.
pub fn concatenate_tree(
    tree_root: &Path,
    shard_root: &Path,
    settings: PyramidSettings,
    bucket_size: u32,
    overwrite: bool,
) -> Result<ConcatSummary, PyramidError> {
    let start = Instant::now();
    let files = record_files(tree_root)?;
    info!(
        "Concatenating {} record file(s) from {} into {}",
        files.len(),
        tree_root.display(),
        shard_root.display()
    );

    let mut writer = ShardWriter::create(shard_root, bucket_size, overwrite)?;
    let mut skipped = 0;
    for file in &files {
        match PyramidRecord::load_file(file, settings) {
            Ok(record) => {
                writer.append(&record)?;
            }
            Err(e) => {
                warn!("Unable to load pyramid from {}: {}", file.display(), e);
                skipped += 1;
            }
        }
    }
    let mut summary = writer.finish()?;
    summary.skipped = skipped;

    info!(
        "Finished {} pyramid concatenation(s) into {} shard(s) in {}ms ({} skipped)",
        summary.records,
        summary.shards,
        start.elapsed().as_millis(),
        summary.skipped
    );
    Ok(summary)
}
