//! Bucketed in-memory index of reference pyramids.
//!
//! Every record is filed twice: under its top-primary grey in the `top` table
//! and under its bottom-primary grey in the `bottom` table. Each table is a
//! list of buckets of `bucket_size` consecutive grey values, ordered
//! descending by the matching secondary grey. A third map gives exact lookup
//! by [`PyramidId`].
//!
//! The index is built once at startup ([`PyramidIndex::build`] for records
//! already in memory, [`PyramidIndex::load`] for a directory of shard files)
//! and is read-only afterwards.

mod collapse;
mod load;

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::pyramid::{PyramidId, PyramidRecord, PyramidSettings};
use crate::tile::{FillPolicy, FillStyle};

pub use collapse::{collapse_end, CollapseEnd, CollapseThreshold};

/// Default bucket width in grey values.
pub const DEFAULT_BUCKET_SIZE: u32 = 1;

/// Default number of shard loader threads.
pub const DEFAULT_LOAD_THREADS: usize = 4;

/// Which of the two bucket tables to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketTable {
    /// Keyed by top-primary, sorted by top-secondary
    Top,

    /// Keyed by bottom-primary, sorted by bottom-secondary
    Bottom,
}

/// Parameters for building an index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexConfig {
    /// Record layout shared by every record
    pub settings: PyramidSettings,

    /// Grey values per bucket
    pub bucket_size: u32,

    /// Minimum population of the lightest bucket
    pub collapse_up: CollapseThreshold,

    /// Minimum population of the darkest bucket
    pub collapse_down: CollapseThreshold,

    /// Shard loader threads
    pub threads: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            settings: PyramidSettings::default(),
            bucket_size: DEFAULT_BUCKET_SIZE,
            collapse_up: CollapseThreshold::Disabled,
            collapse_down: CollapseThreshold::Disabled,
            threads: DEFAULT_LOAD_THREADS,
        }
    }
}

impl IndexConfig {
    /// Number of buckets per table.
    pub fn bucket_count(&self) -> usize {
        256usize.div_ceil(self.bucket_size.max(1) as usize)
    }
}

type Buckets = Vec<Vec<Arc<PyramidRecord>>>;

/// Read-only lookup structure over every loaded pyramid.
pub struct PyramidIndex {
    by_top: Buckets,
    by_bottom: Buckets,
    by_id: HashMap<PyramidId, Arc<PyramidRecord>>,
    config: IndexConfig,
}

impl PyramidIndex {
    /// Build an index from records already in memory.
    ///
    /// Records whose ID is already present are ignored.
    pub fn build<I>(records: I, config: IndexConfig) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = PyramidRecord>,
    {
        let mut tables = Tables::new(&config);
        for record in records {
            tables.insert(Arc::new(record), &config);
        }
        Self::finish(tables, config, "memory")
    }

    /// Apply collapsing and the secondary-grey ordering to freshly filled tables.
    fn finish(tables: Tables, config: IndexConfig, origin: &str) -> Result<Self, IndexError> {
        let Tables {
            mut by_top,
            mut by_bottom,
            by_id,
        } = tables;
        if by_id.is_empty() {
            return Err(IndexError::Empty(origin.to_string()));
        }

        let total = by_id.len();
        for (buckets, name) in [(&mut by_top, "top"), (&mut by_bottom, "bottom")] {
            for (end, threshold) in [
                (CollapseEnd::Dark, config.collapse_down),
                (CollapseEnd::Light, config.collapse_up),
            ] {
                let required = threshold.resolve(total);
                if required == 0 {
                    continue;
                }
                match collapse_end(buckets, end, required) {
                    Some(receiver) => debug!(
                        "Collapsed {:?} end of {} table into bucket {} ({} records)",
                        end,
                        name,
                        receiver,
                        buckets[receiver].len()
                    ),
                    None => warn!(
                        "Cannot collapse {:?} end of {} table to {} records: only {} loaded",
                        end, name, required, total
                    ),
                }
            }
        }

        for bucket in &mut by_top {
            bucket.sort_by_key(|record| std::cmp::Reverse(record.top_secondary()));
        }
        for bucket in &mut by_bottom {
            bucket.sort_by_key(|record| std::cmp::Reverse(record.bottom_secondary()));
        }

        info!("Indexed {} pyramids from {}", total, origin);
        Ok(Self {
            by_top,
            by_bottom,
            by_id,
            config,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of distinct records.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn settings(&self) -> &PyramidSettings {
        &self.config.settings
    }

    pub fn bucket_count(&self) -> usize {
        self.by_top.len()
    }

    /// Bucket index for a primary grey.
    pub fn bucket_for(&self, grey: u8) -> usize {
        (u32::from(grey) / self.config.bucket_size.max(1)) as usize
    }

    fn table(&self, table: BucketTable) -> &Buckets {
        match table {
            BucketTable::Top => &self.by_top,
            BucketTable::Bottom => &self.by_bottom,
        }
    }

    /// Records of one bucket, ordered descending by secondary grey.
    pub fn bucket(&self, table: BucketTable, index: usize) -> &[Arc<PyramidRecord>] {
        self.table(table)
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Index of the nearest non-empty bucket, scanning `+0, +1, -1, +2, -2, ...`
    /// outward from the bucket holding `ideal`.
    pub fn closest_bucket(&self, table: BucketTable, ideal: u8) -> Result<usize, IndexError> {
        let buckets = self.table(table);
        let origin = self.bucket_for(ideal) as isize;
        let count = buckets.len() as isize;
        for distance in 0..count {
            for candidate in [origin + distance, origin - distance] {
                if (0..count).contains(&candidate) && !buckets[candidate as usize].is_empty() {
                    return Ok(candidate as usize);
                }
            }
        }
        Err(IndexError::NoCandidates { ideal })
    }

    /// Nearest non-empty bucket for `ideal`.
    pub fn find_closest(
        &self,
        table: BucketTable,
        ideal: u8,
    ) -> Result<&[Arc<PyramidRecord>], IndexError> {
        let index = self.closest_bucket(table, ideal)?;
        Ok(&self.table(table)[index])
    }

    fn pick<R: Rng + ?Sized>(
        &self,
        table: BucketTable,
        primary: u8,
        rng: &mut R,
    ) -> Result<Arc<PyramidRecord>, IndexError> {
        let candidates = self.find_closest(table, primary)?;
        Ok(Arc::clone(&candidates[rng.gen_range(0..candidates.len())]))
    }

    /// A record whose top 2x2 block is close to `primary`.
    ///
    /// The choice within the bucket is uniform; `secondary` does not rank
    /// candidates.
    pub fn get_closest_top<R: Rng + ?Sized>(
        &self,
        primary: u8,
        _secondary: u8,
        rng: &mut R,
    ) -> Result<Arc<PyramidRecord>, IndexError> {
        self.pick(BucketTable::Top, primary, rng)
    }

    /// A record whose bottom 2x2 block is close to `primary`.
    pub fn get_closest_bottom<R: Rng + ?Sized>(
        &self,
        primary: u8,
        _secondary: u8,
        rng: &mut R,
    ) -> Result<Arc<PyramidRecord>, IndexError> {
        self.pick(BucketTable::Bottom, primary, rng)
    }

    pub fn get_by_id(&self, id: &PyramidId) -> Option<&Arc<PyramidRecord>> {
        self.by_id.get(id)
    }

    /// Lookup by any string holding a pyramid ID.
    pub fn get_by_origin(&self, origin: &str) -> Option<&Arc<PyramidRecord>> {
        PyramidId::from_origin(origin).and_then(|id| self.by_id.get(&id))
    }

    /// A random record: uniform over non-empty top buckets, then within the bucket.
    pub fn get_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Arc<PyramidRecord>, IndexError> {
        let populated: Vec<&Vec<Arc<PyramidRecord>>> =
            self.by_top.iter().filter(|bucket| !bucket.is_empty()).collect();
        if populated.is_empty() {
            return Err(IndexError::NoCandidates { ideal: 0 });
        }
        let bucket = populated[rng.gen_range(0..populated.len())];
        Ok(Arc::clone(&bucket[rng.gen_range(0..bucket.len())]))
    }

    // =========================================================================
    // Fill Grey
    // =========================================================================

    /// Padding grey for the pyramid with the given ID.
    pub fn fill_grey_for_id(&self, id: &PyramidId, policy: &FillPolicy, dynamic: Option<u8>) -> u8 {
        match policy.style {
            FillStyle::Fixed => policy.fixed_grey,
            FillStyle::Average => match self.by_id.get(id) {
                Some(record) => record.average_grey(),
                None => {
                    debug!(
                        "Could not resolve pyramid {}, using fill grey {}",
                        id, policy.fixed_grey
                    );
                    policy.fixed_grey
                }
            },
            FillStyle::Dynamic => dynamic.unwrap_or(policy.fixed_grey),
        }
    }

    /// Padding grey for the pyramid referenced by `origin`.
    pub fn fill_grey(&self, origin: &str, policy: &FillPolicy, dynamic: Option<u8>) -> u8 {
        if policy.style == FillStyle::Fixed {
            return policy.fixed_grey;
        }
        match PyramidId::from_origin(origin) {
            Some(id) => self.fill_grey_for_id(&id, policy, dynamic),
            None if policy.style == FillStyle::Dynamic => dynamic.unwrap_or(policy.fixed_grey),
            None => {
                warn!(
                    "Unable to extract pyramid ID from '{}', using fill grey {}",
                    origin, policy.fixed_grey
                );
                policy.fixed_grey
            }
        }
    }
}

impl std::fmt::Debug for PyramidIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PyramidIndex")
            .field("records", &self.by_id.len())
            .field("buckets", &self.by_top.len())
            .field("bucket_size", &self.config.bucket_size)
            .finish()
    }
}

// =============================================================================
// Insertion
// =============================================================================

/// Unsorted tables filled during construction.
struct Tables {
    by_top: Buckets,
    by_bottom: Buckets,
    by_id: HashMap<PyramidId, Arc<PyramidRecord>>,
}

impl Tables {
    fn new(config: &IndexConfig) -> Self {
        let count = config.bucket_count();
        Self {
            by_top: vec![Vec::new(); count],
            by_bottom: vec![Vec::new(); count],
            by_id: HashMap::new(),
        }
    }

    fn insert(&mut self, record: Arc<PyramidRecord>, config: &IndexConfig) -> bool {
        let id = record.id();
        if self.by_id.contains_key(&id) {
            debug!("Skipping duplicate pyramid {}", id);
            return false;
        }
        let size = config.bucket_size.max(1);
        self.by_top[(u32::from(record.top_primary()) / size) as usize].push(Arc::clone(&record));
        self.by_bottom[(u32::from(record.bottom_primary()) / size) as usize]
            .push(Arc::clone(&record));
        self.by_id.insert(id, record);
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
