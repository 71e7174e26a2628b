//! Deep zoom tile paths: `<prefix>/<level>/<x>_<y><suffix>`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::DeepZoomError;

fn tile_path() -> &'static Regex {
    static TILE_PATH: OnceLock<Regex> = OnceLock::new();
    TILE_PATH.get_or_init(|| {
        Regex::new(r"^(.*)/([0-9]+)/([0-9]+)_([0-9]+)(.*)$").expect("static regex is valid")
    })
}

/// A parsed deep zoom tile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepZoomPath {
    /// Everything before `/<level>/`, e.g. `/a/b/<uuid>.jp2_files`
    pub prefix: String,
    pub level: u32,
    pub x: u32,
    pub y: u32,
    /// Everything after `<x>_<y>`, usually an extension such as `.jpg`
    pub suffix: String,
}

impl DeepZoomPath {
    pub fn parse(path: &str) -> Result<Self, DeepZoomError> {
        let invalid = || DeepZoomError::InvalidPath(path.to_string());
        let captures = tile_path().captures(path).ok_or_else(invalid)?;
        let number = |i: usize| captures[i].parse::<u32>().map_err(|_| invalid());
        Ok(Self {
            prefix: captures[1].to_string(),
            level: number(2)?,
            x: number(3)?,
            y: number(4)?,
            suffix: captures[5].to_string(),
        })
    }

    /// Same prefix and suffix, different tile.
    pub fn with_tile(&self, level: u32, x: u32, y: u32) -> Self {
        Self {
            prefix: self.prefix.clone(),
            level,
            x,
            y,
            suffix: self.suffix.clone(),
        }
    }
}

impl FromStr for DeepZoomPath {
    type Err = DeepZoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeepZoomPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}_{}{}",
            self.prefix, self.level, self.x, self.y, self.suffix
        )
    }
}
