//! Parallel loading of shard files into a [`PyramidIndex`].

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::IndexError;
use crate::pyramid::{list_shards, PyramidRecord, ShardFile};

use super::{Buckets, IndexConfig, PyramidIndex, Tables};

/// Tables shared between loader threads, one lock per structure.
struct SharedTables {
    by_top: Mutex<Buckets>,
    by_bottom: Mutex<Buckets>,
    by_id: Mutex<std::collections::HashMap<crate::pyramid::PyramidId, Arc<PyramidRecord>>>,
}

impl SharedTables {
    fn new(config: &IndexConfig) -> Self {
        let Tables {
            by_top,
            by_bottom,
            by_id,
        } = Tables::new(config);
        Self {
            by_top: Mutex::new(by_top),
            by_bottom: Mutex::new(by_bottom),
            by_id: Mutex::new(by_id),
        }
    }

    fn insert(&self, record: PyramidRecord, bucket_size: u32) -> bool {
        let record = Arc::new(record);
        let id = record.id();
        {
            let mut by_id = self.by_id.lock();
            if by_id.contains_key(&id) {
                debug!("Skipping duplicate pyramid {}", id);
                return false;
            }
            by_id.insert(id, Arc::clone(&record));
        }
        let top = (u32::from(record.top_primary()) / bucket_size) as usize;
        let bottom = (u32::from(record.bottom_primary()) / bucket_size) as usize;
        self.by_top.lock()[top].push(Arc::clone(&record));
        self.by_bottom.lock()[bottom].push(record);
        true
    }

    fn into_tables(self) -> Tables {
        Tables {
            by_top: self.by_top.into_inner(),
            by_bottom: self.by_bottom.into_inner(),
            by_id: self.by_id.into_inner(),
        }
    }
}

/// Map one shard and insert every complete record it holds.
fn load_shard(shard: &ShardFile, tables: &SharedTables, config: &IndexConfig) -> usize {
    let arena = match shard.map() {
        Ok(arena) => arena,
        Err(e) => {
            warn!("Unable to map shard {}: {}", shard.path.display(), e);
            return 0;
        }
    };
    if arena.is_empty() {
        trace!("Skipping empty shard {}", shard.path.display());
        return 0;
    }

    let mut loaded = 0;
    for result in arena.records(config.settings) {
        match result {
            Ok(record) => {
                if tables.insert(record, config.bucket_size.max(1)) {
                    loaded += 1;
                }
            }
            Err(e) => warn!("Skipping record in {}: {}", shard.path.display(), e),
        }
    }
    debug!("Mapped {} pyramids from {}", loaded, shard.path.display());
    loaded
}

impl PyramidIndex {
    /// Load every `<n>.dat` shard under `root` using `config.threads` workers.
    ///
    /// Corrupt records and unreadable shards are skipped. Loading fails only
    /// when the directory is missing or nothing could be loaded.
    pub fn load(root: &Path, config: IndexConfig) -> Result<Self, IndexError> {
        let start = Instant::now();
        if !root.is_dir() {
            return Err(IndexError::MissingShardRoot(root.display().to_string()));
        }
        let shards = list_shards(root).map_err(|e| IndexError::Io(e.to_string()))?;
        let workers = config.threads.max(1).min(shards.len().max(1));
        info!(
            "Loading {} shard(s) from {} with {} thread(s)",
            shards.len(),
            root.display(),
            workers
        );

        let tables = SharedTables::new(&config);
        let next = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(shard) = shards.get(index) else {
                        break;
                    };
                    load_shard(shard, &tables, &config);
                });
            }
        });

        let index = Self::finish(tables.into_tables(), config, &root.display().to_string())?;
        info!(
            "Finished loading {} pyramids in {}ms",
            index.len(),
            start.elapsed().as_millis()
        );
        Ok(index)
    }
}
