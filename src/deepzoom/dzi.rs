//! Deep Zoom Image (DZI) descriptors and level geometry.
//!
//! DZI levels run from 0 (1x1 pixel) up to the full resolution at
//! `ceil(log2(max(width, height)))`. A mosaic image is announced larger than
//! its source by a power-of-two factor, so viewers keep requesting tiles past
//! the source's own resolution.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::DeepZoomError;

/// Largest integer a JavaScript viewer can represent exactly (2^53 - 1).
pub const MAX_SAFE_DIMENSION: u64 = 9_007_199_254_740_991;

/// Default power-of-two factor applied to announced DZI sizes.
pub const DEFAULT_DZI_ZOOM_EXPONENT: u32 = 17;

/// Generate a DZI XML descriptor.
///
/// # Example Output
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
///        TileSize="256"
///        Overlap="0"
///        Format="jpg">
///   <Size Width="46920" Height="33600" />
/// </Image>
/// ```
pub fn generate_dzi_xml(width: u64, height: u64, tile_size: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       TileSize="{tile_size}"
       Overlap="0"
       Format="jpg">
  <Size Width="{width}" Height="{height}" />
</Image>"#
    )
}

/// Maximum DZI level for an image: `ceil(log2(max(width, height)))`.
pub fn calculate_max_dzi_level(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height);
    if max_dim <= 1 {
        return 0;
    }
    u32::BITS - (max_dim - 1).leading_zeros()
}

/// Dimensions at a DZI level, `(0, 0)` above the maximum level.
pub fn dzi_level_dimensions(width: u32, height: u32, level: u32, max_level: u32) -> (u32, u32) {
    if level > max_level {
        return (0, 0);
    }
    let shift = max_level - level;
    let scale = 1u64 << shift.min(63);
    let level_width = (width as u64).div_ceil(scale) as u32;
    let level_height = (height as u64).div_ceil(scale) as u32;
    (level_width.max(1), level_height.max(1))
}

/// Tile count at a DZI level.
pub fn dzi_tile_count(level_width: u32, level_height: u32, tile_size: u32) -> (u32, u32) {
    let tiles_x = level_width.div_ceil(tile_size);
    let tiles_y = level_height.div_ceil(tile_size);
    (tiles_x.max(1), tiles_y.max(1))
}

/// Whether tile `(x, y)` at `level` lies inside an image of the given size.
pub fn tile_in_bounds(width: u32, height: u32, level: u32, x: u32, y: u32, tile_size: u32) -> bool {
    let max_level = calculate_max_dzi_level(width, height);
    if level > max_level {
        return false;
    }
    let (level_width, level_height) = dzi_level_dimensions(width, height, level, max_level);
    let (tiles_x, tiles_y) = dzi_tile_count(level_width, level_height, tile_size);
    x < tiles_x && y < tiles_y
}

/// Multiply a dimension by `2^exponent`, clamped to [`MAX_SAFE_DIMENSION`].
pub fn scale_dimension(value: u64, exponent: u32) -> u64 {
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    value.saturating_mul(factor).min(MAX_SAFE_DIMENSION)
}

fn size_attribute() -> &'static Regex {
    static SIZE_ATTRIBUTE: OnceLock<Regex> = OnceLock::new();
    SIZE_ATTRIBUTE.get_or_init(|| {
        Regex::new(r#"\b(Width|Height)\s*=\s*"([0-9]+)""#).expect("static regex is valid")
    })
}

/// Rewrite the `Width` and `Height` attributes of a descriptor, scaled by
/// `2^exponent`. Everything else is kept as delivered.
pub fn scale_descriptor(xml: &str, exponent: u32) -> Result<String, DeepZoomError> {
    let attributes = size_attribute();
    let found: Vec<&str> = attributes
        .captures_iter(xml)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if !found.contains(&"Width") || !found.contains(&"Height") {
        return Err(DeepZoomError::InvalidDescriptor(
            "missing Width or Height".to_string(),
        ));
    }

    let mut overflow = None;
    let scaled = attributes.replace_all(xml, |c: &Captures<'_>| {
        let value = match c[2].parse::<u64>() {
            Ok(value) => value,
            Err(_) => {
                overflow = Some(c[2].to_string());
                MAX_SAFE_DIMENSION
            }
        };
        format!(r#"{}="{}""#, &c[1], scale_dimension(value, exponent))
    });
    if let Some(value) = overflow {
        return Err(DeepZoomError::InvalidDescriptor(format!(
            "size out of range: {}",
            value
        )));
    }
    Ok(scaled.into_owned())
}
