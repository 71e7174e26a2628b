use thiserror::Error;

/// Errors raised while creating, loading or storing a pyramid record
#[derive(Debug, Clone, Error)]
pub enum PyramidError {
    /// Backing data is shorter than the fixed record size
    #[error("Corrupt record from {origin}: expected {expected} bytes, got {actual}")]
    CorruptRecord {
        origin: String,
        expected: usize,
        actual: usize,
    },

    /// Level outside 1..=max_level (or above the static offset table)
    #[error("Invalid pyramid level {level} (max level is {max_level})")]
    InvalidLevel { level: u32, max_level: u32 },

    /// Fraction coordinates outside the 2x3 grid
    #[error("Invalid fraction ({fx}, {fy}): must be within 2x3")]
    InvalidFraction { fx: u32, fy: u32 },

    /// Sub-tile payload does not match edge(level)^2
    #[error("Invalid sub-tile size at level {level}: expected {expected} bytes, got {actual}")]
    InvalidTileSize {
        level: u32,
        expected: usize,
        actual: usize,
    },

    /// Attempt to write into a record that is a view into shared storage
    #[error("Record {0} is backed by shared read-only storage")]
    ReadOnly(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PyramidError {
    fn from(err: std::io::Error) -> Self {
        PyramidError::Io(err.to_string())
    }
}

/// Errors from building or querying the pyramid index
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// No records could be loaded; the index cannot serve
    #[error("No pyramids loaded from {0}")]
    Empty(String),

    /// Every bucket was empty during a nearest-bucket search.
    ///
    /// Construction rejects empty indexes, so this marks a broken invariant.
    #[error("Invariant violation: no candidate bucket for grey {ideal}")]
    NoCandidates { ideal: u8 },

    /// The directory holding shard files does not exist
    #[error("Shard root does not exist: {0}")]
    MissingShardRoot(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        IndexError::Io(err.to_string())
    }
}

/// Errors from the external image source
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The image server has no image at this address
    #[error("Image not found: {0}")]
    NotFound(String),

    /// Network or filesystem failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The payload could not be decoded as an image or descriptor
    #[error("Decode error: {0}")]
    Decode(String),

    /// The request could not be turned into a source address
    #[error("Invalid source request: {0}")]
    InvalidRequest(String),
}

/// Errors from mapping or rendering a mosaic tile
#[derive(Debug, Clone, Error)]
pub enum MosaicError {
    /// Source bitmap does not have the mosaic edge
    #[error("Source must be {edge}x{edge} pixels, got {width}x{height}")]
    InvalidSource { edge: u32, width: u32, height: u32 },

    /// Render level or sub-tile coordinates outside the mosaic
    #[error("Invalid render request: level {level}, sub-tile ({x}, {y})")]
    InvalidRenderLevel { level: u32, x: u32, y: u32 },

    /// Fetching the source bitmap failed
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Pyramid lookup failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// Errors surfaced by the deep zoom coordinator
#[derive(Debug, Clone, Error)]
pub enum DeepZoomError {
    /// Path does not follow `<prefix>/<level>/<x>_<y><suffix>`
    #[error("Unparseable deep zoom path: {0}")]
    InvalidPath(String),

    /// Path refers to a pyramid that is not loaded while only known IDs are allowed
    #[error("Unknown pyramid referenced by {0}")]
    UnknownPyramid(String),

    /// DZI descriptor lacked a usable size
    #[error("Invalid DZI descriptor: {0}")]
    InvalidDescriptor(String),

    /// Mosaic mapping or rendering failed
    #[error("Mosaic error: {0}")]
    Mosaic(#[from] MosaicError),

    /// External image fetch failed
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Pyramid lookup failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Output encoding failed
    #[error("Encode error: {0}")]
    Encode(String),
}
