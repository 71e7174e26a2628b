//! Fixed-layout binary pyramid records.
//!
//! A record holds one greyscale reference image with aspect ratio 2:3 at
//! levels `1..=max_level`. Each level is split into a 2-wide, 3-high grid of
//! square sub-tiles ("fractions") of edge `2^(level-1)`:
//!
//! ```text
//! offset  size  field
//! 0       16    ID (two big-endian u64)
//! 16      1     average grey
//! 17      2     source width (big-endian u16)
//! 19      2     source height (big-endian u16)
//! 21      1     missing pixel fraction * 256
//! 22      6     level 1: fractions (0,0) (1,0) (0,1) (1,1) (0,2) (1,2), 1x1 each
//! 28      24    level 2: same order, 2x2 each
//! ...
//! ```
//!
//! Records are either owned (being built, or loaded from an individual file)
//! or views into a shared [`ShardArena`] holding many concatenated records.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use tracing::{debug, info, trace};

use crate::error::PyramidError;

use super::id::{PyramidId, ID_BYTES};

/// Fractions per row.
pub const FRACTION_WIDTH: u32 = 2;

/// Fraction rows.
pub const FRACTION_HEIGHT: u32 = 3;

/// Highest level the static offset table covers.
pub const MAX_SUPPORTED_LEVEL: u32 = 16;

/// Default highest stored level (128x128 sub-tiles, 256x384 pixels).
pub const DEFAULT_MAX_LEVEL: u32 = 8;

/// Default hot-prefix level: levels 0..=2 are mirrored in owned memory.
pub const DEFAULT_HOT_LEVEL: u32 = 2;

/// Default grey for "pixel absent from source".
pub const DEFAULT_MISSING_GREY: u8 = 0xCC;

/// Default cap on how far a dynamic fill may stray from the record average.
pub const DEFAULT_MAX_DYNAMIC_DISTANCE: u8 = 100;

/// Fill returned when the missing fraction is too small to matter.
pub const IRRELEVANT_DYNAMIC_GREY: u8 = 255;

const AVERAGE_GREY_INDEX: usize = ID_BYTES;
const WIDTH_INDEX: usize = AVERAGE_GREY_INDEX + 1;
const HEIGHT_INDEX: usize = WIDTH_INDEX + 2;
const MISSING_FRACTION_INDEX: usize = HEIGHT_INDEX + 2;
const TILE_START_INDEX: usize = MISSING_FRACTION_INDEX + 1;

const OFFSET_TABLE_SIZE: usize = MAX_SUPPORTED_LEVEL as usize + 2;

/// Byte offset of each level. Level 0 is the header.
static TILE_OFFSETS: [usize; OFFSET_TABLE_SIZE] = compute_offsets();

const fn compute_offsets() -> [usize; OFFSET_TABLE_SIZE] {
    let mut offsets = [0usize; OFFSET_TABLE_SIZE];
    offsets[1] = TILE_START_INDEX;
    let mut level = 2;
    while level < OFFSET_TABLE_SIZE {
        let edge = 1usize << (level - 2);
        offsets[level] = offsets[level - 1] + 6 * edge * edge;
        level += 1;
    }
    offsets
}

/// Edge of one sub-tile at `level`. Level 0 has no tile data.
#[inline]
pub fn tile_edge(level: u32) -> u32 {
    if level == 0 {
        0
    } else {
        1 << (level - 1)
    }
}

/// Byte offset of the first sub-tile at `level`.
#[inline]
pub fn level_offset(level: u32) -> usize {
    TILE_OFFSETS[level as usize]
}

/// Total significant bytes of a record with the given max level.
#[inline]
pub fn byte_count(max_level: u32) -> usize {
    TILE_OFFSETS[max_level as usize + 1]
}

// =============================================================================
// Settings
// =============================================================================

/// Parameters shared by every record in a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidSettings {
    /// Highest stored level
    pub max_level: u32,

    /// Levels `0..=hot_level` are mirrored in owned memory
    pub hot_level: u32,

    /// Grey that marks a pixel absent from the source image
    pub missing_grey: u8,

    /// Maximum distance between a dynamic fill and the record average
    pub max_dynamic_distance: u8,
}

impl Default for PyramidSettings {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
            hot_level: DEFAULT_HOT_LEVEL,
            missing_grey: DEFAULT_MISSING_GREY,
            max_dynamic_distance: DEFAULT_MAX_DYNAMIC_DISTANCE,
        }
    }
}

impl PyramidSettings {
    /// Settings with the given max level and defaults elsewhere.
    pub fn with_max_level(max_level: u32) -> Self {
        Self {
            max_level,
            ..Self::default()
        }
    }

    /// Validate the level bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_level == 0 || self.max_level > MAX_SUPPORTED_LEVEL {
            return Err(format!(
                "pyramid max level must be between 1 and {}, got {}",
                MAX_SUPPORTED_LEVEL, self.max_level
            ));
        }
        Ok(())
    }

    /// Size in bytes of one record.
    pub fn byte_count(&self) -> usize {
        byte_count(self.max_level)
    }

    fn hot_size(&self) -> usize {
        byte_count(self.hot_level.min(self.max_level))
    }
}

/// Inclusive grey range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreyRange {
    pub from: u8,
    pub to: u8,
}

impl GreyRange {
    pub fn contains(&self, grey: u8) -> bool {
        self.from <= grey && grey <= self.to
    }

    pub fn width(&self) -> u8 {
        self.to - self.from
    }
}

// =============================================================================
// Shard Arena
// =============================================================================

/// Shared read-only storage for concatenated records.
///
/// Records carved from an arena hold an `Arc` to it plus their byte offset.
pub struct ShardArena {
    origin: String,
    data: ArenaData,
}

enum ArenaData {
    Mapped(Mmap),
    Heap(Vec<u8>),
}

impl ShardArena {
    /// Memory-map a shard file.
    pub fn map(path: &Path) -> Result<Arc<Self>, PyramidError> {
        let file = File::open(path)?;
        // SAFETY: shard files are immutable snapshots; they are never written
        // while the process holds the mapping.
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(Arc::new(Self {
            origin: path.display().to_string(),
            data: ArenaData::Mapped(mmap),
        }))
    }

    /// Wrap bytes already in memory.
    pub fn from_vec(origin: impl Into<String>, data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            origin: origin.into(),
            data: ArenaData::Heap(data),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            ArenaData::Mapped(mmap) => mmap,
            ArenaData::Heap(vec) => vec,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Carve every complete record out of the arena.
    ///
    /// A trailing partial record yields one `CorruptRecord` error at the end.
    pub fn records(
        self: &Arc<Self>,
        settings: PyramidSettings,
    ) -> impl Iterator<Item = Result<PyramidRecord, PyramidError>> + '_ {
        let size = settings.byte_count();
        let len = self.len();
        (0..len.div_ceil(size)).map(move |i| PyramidRecord::load(Arc::clone(self), i * size, settings))
    }
}

// =============================================================================
// Pyramid Record
// =============================================================================

enum Storage {
    Owned(Vec<u8>),
    Shared { arena: Arc<ShardArena>, offset: usize },
}

/// One reference image at every level from 1 to `max_level`.
pub struct PyramidRecord {
    storage: Storage,
    settings: PyramidSettings,
    hot: Box<[u8]>,
}

impl PyramidRecord {
    /// Zero-filled record with the ID written into its header.
    pub fn create(id: PyramidId, settings: PyramidSettings) -> Self {
        let mut data = vec![0u8; settings.byte_count()];
        data[..ID_BYTES].copy_from_slice(&id.to_bytes());
        let mut record = Self {
            storage: Storage::Owned(data),
            settings,
            hot: vec![0u8; settings.hot_size()].into_boxed_slice(),
        };
        record.sync_hot();
        record
    }

    /// View a record inside shared storage without copying it.
    pub fn load(
        arena: Arc<ShardArena>,
        offset: usize,
        settings: PyramidSettings,
    ) -> Result<Self, PyramidError> {
        let expected = settings.byte_count();
        let available = arena.len().saturating_sub(offset);
        if available < expected {
            return Err(PyramidError::CorruptRecord {
                origin: format!("{}@{}", arena.origin(), offset),
                expected,
                actual: available,
            });
        }
        let mut record = Self {
            storage: Storage::Shared { arena, offset },
            settings,
            hot: vec![0u8; settings.hot_size()].into_boxed_slice(),
        };
        record.sync_hot();
        Ok(record)
    }

    /// Take ownership of the bytes of one record.
    pub fn from_bytes(
        origin: &str,
        mut data: Vec<u8>,
        settings: PyramidSettings,
    ) -> Result<Self, PyramidError> {
        let expected = settings.byte_count();
        if data.len() < expected {
            return Err(PyramidError::CorruptRecord {
                origin: origin.to_string(),
                expected,
                actual: data.len(),
            });
        }
        data.truncate(expected);
        let mut record = Self {
            storage: Storage::Owned(data),
            settings,
            hot: vec![0u8; settings.hot_size()].into_boxed_slice(),
        };
        record.sync_hot();
        Ok(record)
    }

    /// Read an individual record file into owned memory.
    pub fn load_file(path: &Path, settings: PyramidSettings) -> Result<Self, PyramidError> {
        let expected = settings.byte_count();
        let mut data = Vec::with_capacity(expected);
        File::open(path)?
            .take(expected as u64)
            .read_to_end(&mut data)?;
        Self::from_bytes(&path.display().to_string(), data, settings)
    }

    // -------------------------------------------------------------------------
    // Raw access
    // -------------------------------------------------------------------------

    /// All significant bytes of the record.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(data) => data,
            Storage::Shared { arena, offset } => {
                &arena.bytes()[*offset..*offset + self.settings.byte_count()]
            }
        }
    }

    /// Bytes `start..start+len`, served from the hot prefix when it covers them.
    #[inline]
    fn slice(&self, start: usize, len: usize) -> &[u8] {
        if start + len <= self.hot.len() {
            &self.hot[start..start + len]
        } else {
            &self.as_bytes()[start..start + len]
        }
    }

    #[inline]
    fn byte(&self, index: usize) -> u8 {
        if index < self.hot.len() {
            self.hot[index]
        } else {
            self.as_bytes()[index]
        }
    }

    fn sync_hot(&mut self) {
        let len = self.hot.len();
        let mut hot = std::mem::take(&mut self.hot);
        hot.copy_from_slice(&self.as_bytes()[..len]);
        self.hot = hot;
    }

    fn write(&mut self, index: usize, bytes: &[u8]) -> Result<(), PyramidError> {
        let id = self.id();
        let Storage::Owned(data) = &mut self.storage else {
            return Err(PyramidError::ReadOnly(id.to_hex()));
        };
        data[index..index + bytes.len()].copy_from_slice(bytes);
        if index < self.hot.len() {
            let end = (index + bytes.len()).min(self.hot.len());
            self.hot[index..end].copy_from_slice(&data[index..end]);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Header
    // -------------------------------------------------------------------------

    pub fn id(&self) -> PyramidId {
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(self.slice(0, ID_BYTES));
        PyramidId::from_bytes(bytes)
    }

    pub fn settings(&self) -> &PyramidSettings {
        &self.settings
    }

    pub fn max_level(&self) -> u32 {
        self.settings.max_level
    }

    pub fn byte_count(&self) -> usize {
        self.settings.byte_count()
    }

    pub fn average_grey(&self) -> u8 {
        self.byte(AVERAGE_GREY_INDEX)
    }

    pub fn set_average_grey(&mut self, grey: u8) -> Result<(), PyramidError> {
        self.write(AVERAGE_GREY_INDEX, &[grey])
    }

    pub fn source_width(&self) -> u16 {
        u16::from_be_bytes([self.byte(WIDTH_INDEX), self.byte(WIDTH_INDEX + 1)])
    }

    pub fn source_height(&self) -> u16 {
        u16::from_be_bytes([self.byte(HEIGHT_INDEX), self.byte(HEIGHT_INDEX + 1)])
    }

    pub fn set_source_size(&mut self, width: u16, height: u16) -> Result<(), PyramidError> {
        trace!("Setting source size {}x{}", width, height);
        self.write(WIDTH_INDEX, &width.to_be_bytes())?;
        self.write(HEIGHT_INDEX, &height.to_be_bytes())
    }

    /// Fraction of the padded canvas that was absent from the source.
    pub fn missing_fraction(&self) -> f64 {
        f64::from(self.byte(MISSING_FRACTION_INDEX)) / 256.0
    }

    /// Stored as `round(fraction * 256)`, saturating at 255.
    pub fn set_missing_fraction(&mut self, fraction: f64) -> Result<(), PyramidError> {
        let stored = (fraction.clamp(0.0, 1.0) * 256.0).round().min(255.0) as u8;
        self.write(MISSING_FRACTION_INDEX, &[stored])
    }

    // -------------------------------------------------------------------------
    // Tile addressing
    // -------------------------------------------------------------------------

    fn check_tile(&self, level: u32, fx: u32, fy: u32) -> Result<(), PyramidError> {
        if level == 0 || level > self.settings.max_level {
            return Err(PyramidError::InvalidLevel {
                level,
                max_level: self.settings.max_level,
            });
        }
        if fx >= FRACTION_WIDTH || fy >= FRACTION_HEIGHT {
            return Err(PyramidError::InvalidFraction { fx, fy });
        }
        Ok(())
    }

    /// Byte offset of sub-tile `(fx, fy)` at `level`.
    #[inline]
    pub fn tile_offset(level: u32, fx: u32, fy: u32) -> usize {
        let edge = tile_edge(level) as usize;
        let block = edge * edge;
        level_offset(level) + fx as usize * block + fy as usize * FRACTION_WIDTH as usize * block
    }

    /// Raw bytes of one sub-tile, row-major.
    pub fn tile(&self, level: u32, fx: u32, fy: u32) -> Result<&[u8], PyramidError> {
        self.check_tile(level, fx, fy)?;
        let edge = tile_edge(level) as usize;
        Ok(self.slice(Self::tile_offset(level, fx, fy), edge * edge))
    }

    /// Write one `edge(level)^2` sub-tile. Only owned records are writable.
    pub fn set_level(
        &mut self,
        level: u32,
        fx: u32,
        fy: u32,
        bytes: &[u8],
    ) -> Result<(), PyramidError> {
        self.check_tile(level, fx, fy)?;
        let edge = tile_edge(level) as usize;
        if bytes.len() != edge * edge {
            return Err(PyramidError::InvalidTileSize {
                level,
                expected: edge * edge,
                actual: bytes.len(),
            });
        }
        self.write(Self::tile_offset(level, fx, fy), bytes)
    }

    /// Level-1 byte of fraction `(fx, fy)`.
    #[inline]
    pub fn level_one(&self, fx: u32, fy: u32) -> u8 {
        self.byte(Self::tile_offset(1, fx, fy))
    }

    // -------------------------------------------------------------------------
    // Grey metrics
    // -------------------------------------------------------------------------

    /// Mean of `(0,0) (1,0) (0,1) (1,1)`.
    pub fn top_primary(&self) -> u8 {
        self.missing_aware_average(level_offset(1), 4)
    }

    /// Mean of `(0,2) (1,2)`.
    pub fn top_secondary(&self) -> u8 {
        self.missing_aware_average(level_offset(1) + 4, 2)
    }

    /// Mean of `(0,1) (1,1) (0,2) (1,2)`.
    pub fn bottom_primary(&self) -> u8 {
        self.missing_aware_average(level_offset(1) + 2, 4)
    }

    /// Mean of `(0,0) (1,0)`.
    pub fn bottom_secondary(&self) -> u8 {
        self.missing_aware_average(level_offset(1), 2)
    }

    /// Mean of all six level-1 bytes.
    pub fn level_one_average(&self) -> u8 {
        self.missing_aware_average(level_offset(1), 6)
    }

    /// Integer mean ignoring missing bytes; all-missing yields the missing grey.
    fn missing_aware_average(&self, offset: usize, length: usize) -> u8 {
        let missing = self.settings.missing_grey;
        let (sum, count) = self
            .slice(offset, length)
            .iter()
            .filter(|&&grey| grey != missing)
            .fold((0u32, 0u32), |(sum, count), &grey| (sum + u32::from(grey), count + 1));
        if count == 0 {
            missing
        } else {
            (sum / count) as u8
        }
    }

    /// Fill greys the dynamic fill may use: the record average +- max distance.
    fn dynamic_bounds(&self, average: u8) -> (f64, f64) {
        let distance = self.settings.max_dynamic_distance;
        (
            f64::from(average.saturating_sub(distance)),
            f64::from(average.saturating_add(distance)),
        )
    }

    /// Overall averages reachable by repainting the missing pixels.
    ///
    /// The present pixels contribute `average * (1 - f)`; the missing ones
    /// contribute `f * fill` for a fill within the dynamic bounds.
    pub fn possible_average_range(&self) -> GreyRange {
        let average = self.level_one_average();
        if average == self.settings.missing_grey {
            return GreyRange { from: 0, to: 255 };
        }
        let f = self.missing_fraction();
        let fixed = f64::from(average) * (1.0 - f);
        let (low_fill, high_fill) = self.dynamic_bounds(average);
        GreyRange {
            from: (fixed + f * low_fill).ceil().clamp(0.0, 255.0) as u8,
            to: (fixed + f * high_fill).floor().clamp(0.0, 255.0) as u8,
        }
    }

    /// Grey that, painted into the missing pixels, yields `wanted` on average.
    pub fn dynamic_fill_grey(&self, wanted: u8) -> u8 {
        let average = self.level_one_average();
        if average == self.settings.missing_grey {
            return wanted;
        }
        let f = self.missing_fraction();
        if f * f < 0.001 {
            return IRRELEVANT_DYNAMIC_GREY;
        }
        let dynamic = (f64::from(wanted) - f64::from(average) * (1.0 - f)) / f;
        let (low_fill, high_fill) = self.dynamic_bounds(average);
        dynamic.clamp(low_fill, high_fill).round() as u8
    }

    // -------------------------------------------------------------------------
    // Pixel copying
    // -------------------------------------------------------------------------

    /// Copy sub-tile `(fx, fy)` at `level` onto a flat canvas.
    ///
    /// Pixels that fall outside the canvas are clipped. Missing pixels become
    /// `missing_replacement`.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_pixels_into(
        &self,
        level: u32,
        fx: u32,
        fy: u32,
        canvas: &mut [u8],
        origin_x: usize,
        origin_y: usize,
        canvas_width: usize,
        missing_replacement: u8,
    ) -> Result<(), PyramidError> {
        self.check_tile(level, fx, fy)?;
        if canvas_width == 0 || origin_x >= canvas_width {
            return Ok(());
        }
        let canvas_height = canvas.len() / canvas_width;
        let edge = tile_edge(level) as usize;
        let row_len = edge.min(canvas_width - origin_x);
        let rows = edge.min(canvas_height.saturating_sub(origin_y));
        let offset = Self::tile_offset(level, fx, fy);
        let missing = self.settings.missing_grey;

        for ty in 0..rows {
            let source = self.slice(offset + ty * edge, row_len);
            let start = (origin_y + ty) * canvas_width + origin_x;
            for (target, &grey) in canvas[start..start + row_len].iter_mut().zip(source) {
                *target = if grey == missing { missing_replacement } else { grey };
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Write exactly `byte_count` bytes.
    pub fn store<W: Write>(&self, writer: &mut W) -> Result<usize, PyramidError> {
        let bytes = self.as_bytes();
        writer.write_all(bytes)?;
        Ok(bytes.len())
    }

    /// Location of an individual record file: `root/aa/bb/<hex>.dat`.
    pub fn tree_path(root: &Path, id: &PyramidId) -> PathBuf {
        let hex = id.to_hex();
        root.join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{}.dat", hex))
    }

    /// Store as an individual file in the fan-out tree.
    ///
    /// Returns `false` when the file exists and `overwrite` is off.
    pub fn store_to_tree(&self, root: &Path, overwrite: bool) -> Result<bool, PyramidError> {
        let path = Self::tree_path(root, &self.id());
        if path.exists() {
            if !overwrite {
                info!("Pyramid {} was already stored. Leaving untouched", self.id());
                return Ok(false);
            }
            info!("Overwriting pyramid {} with new version", self.id());
        } else {
            debug!("Storing {:?} as {}", self, path.display());
        }
        if let Some(folder) = path.parent() {
            fs::create_dir_all(folder)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        self.store(&mut writer)?;
        writer.flush()?;
        Ok(true)
    }
}

impl Clone for PyramidRecord {
    fn clone(&self) -> Self {
        let storage = match &self.storage {
            Storage::Owned(data) => Storage::Owned(data.clone()),
            Storage::Shared { arena, offset } => Storage::Shared {
                arena: Arc::clone(arena),
                offset: *offset,
            },
        };
        Self {
            storage,
            settings: self.settings,
            hot: self.hot.clone(),
        }
    }
}

impl PartialEq for PyramidRecord {
    fn eq(&self, other: &Self) -> bool {
        self.settings.max_level == other.settings.max_level && self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for PyramidRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PyramidRecord(id={}, primary={})",
            self.id(),
            self.top_primary()
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
