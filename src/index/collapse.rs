//! Merging of sparse buckets at the dark and light extremes.

use std::fmt;
use std::str::FromStr;

/// Minimum population requested for an extreme bucket.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CollapseThreshold {
    /// No collapsing
    #[default]
    Disabled,

    /// Absolute record count
    Count(usize),

    /// Percentage of all records
    Percent(f64),
}

impl CollapseThreshold {
    /// Required record count for an index holding `total` records.
    pub fn resolve(&self, total: usize) -> usize {
        match *self {
            CollapseThreshold::Disabled => 0,
            CollapseThreshold::Count(count) => count,
            CollapseThreshold::Percent(percent) => {
                (total as f64 * percent / 100.0).ceil().max(0.0) as usize
            }
        }
    }
}

impl FromStr for CollapseThreshold {
    type Err = String;

    /// Accepts `N` or `N%`; `0` disables collapsing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(percent) = s.strip_suffix('%') {
            let percent: f64 = percent
                .trim()
                .parse()
                .map_err(|_| format!("invalid collapse percentage '{}'", s))?;
            if !(0.0..=100.0).contains(&percent) {
                return Err(format!("collapse percentage must be 0-100, got '{}'", s));
            }
            return Ok(if percent == 0.0 {
                CollapseThreshold::Disabled
            } else {
                CollapseThreshold::Percent(percent)
            });
        }
        let count: usize = s
            .parse()
            .map_err(|_| format!("invalid collapse count '{}'", s))?;
        Ok(if count == 0 {
            CollapseThreshold::Disabled
        } else {
            CollapseThreshold::Count(count)
        })
    }
}

impl fmt::Display for CollapseThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollapseThreshold::Disabled => write!(f, "0"),
            CollapseThreshold::Count(count) => write!(f, "{}", count),
            CollapseThreshold::Percent(percent) => write!(f, "{}%", percent),
        }
    }
}

/// Which end of the grey scale to collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseEnd {
    /// Bucket 0 upward (dark)
    Dark,

    /// Last bucket downward (light)
    Light,
}

/// Merge the outermost buckets at one end until the merged bucket holds at
/// least `required` entries.
///
/// Entries move into the innermost bucket of the merged run; the buckets they
/// came from are left empty. Returns the receiving bucket, or `None` when
/// nothing was merged.
pub fn collapse_end<T>(buckets: &mut [Vec<T>], end: CollapseEnd, required: usize) -> Option<usize> {
    if required == 0 || buckets.is_empty() {
        return None;
    }
    let order: Vec<usize> = match end {
        CollapseEnd::Dark => (0..buckets.len()).collect(),
        CollapseEnd::Light => (0..buckets.len()).rev().collect(),
    };

    let mut accumulated = 0;
    let mut target = None;
    for (position, &bucket) in order.iter().enumerate() {
        accumulated += buckets[bucket].len();
        if accumulated >= required {
            target = Some(position);
            break;
        }
    }
    let position = target?;
    let receiver = order[position];
    for &bucket in &order[..position] {
        let mut moved = std::mem::take(&mut buckets[bucket]);
        buckets[receiver].append(&mut moved);
    }
    Some(receiver)
}
