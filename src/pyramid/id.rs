//! 128-bit pyramid identifiers.
//!
//! Reference images are named after a UUID that is embedded somewhere in
//! their source URL or path, e.g.
//! `/avis-show/symlinks/9/c/0/5/9c05d958-b616-47c1-9e4f-63ec2dd9429e.jp2`.
//! The ID is stored as two big-endian 64-bit words in the record header.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Number of bytes an ID occupies in a record header.
pub const ID_BYTES: usize = 16;

/// Opaque 128-bit identifier of a reference pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PyramidId {
    first: u64,
    second: u64,
}

fn hex32() -> &'static Regex {
    static HEX32: OnceLock<Regex> = OnceLock::new();
    HEX32.get_or_init(|| Regex::new(r"([a-f0-9]{32})\.").expect("static regex is valid"))
}

impl PyramidId {
    /// Create an ID from its two 64-bit halves.
    pub const fn new(first: u64, second: u64) -> Self {
        Self { first, second }
    }

    /// Extract an ID from an origin string (URL, path or file name).
    ///
    /// The origin is lower-cased and stripped of dashes; the last run of 32 hex
    /// digits directly followed by a `.` is used.
    pub fn from_origin(origin: &str) -> Option<Self> {
        let normalised = origin.to_lowercase().replace('-', "");
        let captures = hex32().captures_iter(&normalised).last()?;
        Self::from_hex(&captures[1])
    }

    /// Parse exactly 32 hex digits.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let mut bytes = [0u8; ID_BYTES];
        hex::decode_to_slice(hex_str, &mut bytes).ok()?;
        Some(Self::from_bytes(bytes))
    }

    /// Decode the big-endian header representation.
    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&bytes[..8]);
        second.copy_from_slice(&bytes[8..]);
        Self {
            first: u64::from_be_bytes(first),
            second: u64::from_be_bytes(second),
        }
    }

    /// Encode as the big-endian header representation.
    pub fn to_bytes(self) -> [u8; ID_BYTES] {
        let mut bytes = [0u8; ID_BYTES];
        bytes[..8].copy_from_slice(&self.first.to_be_bytes());
        bytes[8..].copy_from_slice(&self.second.to_be_bytes());
        bytes
    }

    pub fn first64(&self) -> u64 {
        self.first
    }

    pub fn second64(&self) -> u64 {
        self.second
    }

    /// 32 lower-case hex digits.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Canonical 8-4-4-4-12 UUID form.
    pub fn to_dashed(&self) -> String {
        let hex = self.to_hex();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl fmt::Display for PyramidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
