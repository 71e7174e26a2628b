//! End-to-end request dispatch through the coordinator.
//!
//! Levels used here: basic up to 4, render 5-6, redirect 7-9, turtle above.
//!
//! Tests verify:
//! - Each regime serves what it should at its boundaries
//! - Redirects land on the right tile of the right pyramid
//! - Missing and out-of-bounds tiles fall back to blanks only when redirected
//! - Unknown pyramids, DZI scaling and fallback, random images

use std::sync::Arc;

use image::{GrayImage, Luma};

use nrt_mosaic::deepzoom::BORDER_GREY;
use nrt_mosaic::error::{MosaicError, SourceError};
use nrt_mosaic::{
    Adjustments, DeepZoomCoordinator, DeepZoomError, DeepZoomSettings, FillStyle, MosaicCache,
    PathTemplate, Regime,
};

use super::test_utils::{
    create_coordinator, create_index, dark_id, deepzoom_settings, is_uniform, light_id,
    mosaic_settings, page_source, page_tile, pyramid_tile, split_tile, MockImageSource, DARK, EDGE,
    FILL, LIGHT, PAGE_ID,
};

fn coordinator(
    source: MockImageSource,
) -> (Arc<MockImageSource>, DeepZoomCoordinator<MockImageSource>) {
    let source = Arc::new(source);
    let coordinator = create_coordinator(source.clone(), deepzoom_settings(), FillStyle::Fixed);
    (source, coordinator)
}

// =============================================================================
// Regimes
// =============================================================================

#[test]
fn test_regime_boundaries() {
    let (_, coordinator) = coordinator(page_source());
    assert_eq!(coordinator.regime(0), Regime::Basic);
    assert_eq!(coordinator.regime(4), Regime::Basic);
    assert_eq!(coordinator.regime(5), Regime::Render);
    assert_eq!(coordinator.regime(6), Regime::Render);
    assert_eq!(coordinator.regime(7), Regime::Redirect);
    assert_eq!(coordinator.regime(9), Regime::Redirect);
    assert_eq!(coordinator.regime(10), Regime::Turtle);
}

#[tokio::test]
async fn test_basic_passes_through() {
    let (source, coordinator) = coordinator(page_source());
    let tile = coordinator
        .deepzoom(&page_tile(4, 0, 0), Adjustments::default())
        .await
        .unwrap();

    assert_eq!(tile, split_tile());
    assert_eq!(source.requested_paths().await, vec![page_tile(4, 0, 0)]);
}

#[tokio::test]
async fn test_basic_missing_tile_is_an_error() {
    let (_, coordinator) = coordinator(page_source());
    let err = coordinator
        .deepzoom(&page_tile(3, 0, 0), Adjustments::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DeepZoomError::Source(SourceError::NotFound(_))));
}

#[tokio::test]
async fn test_render_first_and_last_levels() {
    let (source, coordinator) = coordinator(page_source());

    let first = coordinator
        .deepzoom(&page_tile(5, 1, 0), Adjustments::default())
        .await
        .unwrap();
    assert_eq!(first.dimensions(), (EDGE, EDGE));
    assert!(is_uniform(&first, LIGHT));

    let last = coordinator
        .deepzoom(&page_tile(6, 0, 2), Adjustments::default())
        .await
        .unwrap();
    assert!(is_uniform(&last, DARK));

    // Both render from the one basic tile above them
    assert_eq!(source.requested_paths().await, vec![page_tile(4, 0, 0)]);
}

#[tokio::test]
async fn test_render_without_basic_tile_is_an_error() {
    let (_, coordinator) = coordinator(page_source());
    let err = coordinator
        .deepzoom(&page_tile(5, 2, 0), Adjustments::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeepZoomError::Mosaic(MosaicError::Source(SourceError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_turtle_above_last_level() {
    let (source, coordinator) = coordinator(page_source());
    let tile = coordinator
        .deepzoom(&page_tile(10, 123, 456), Adjustments::default())
        .await
        .unwrap();

    assert_eq!(tile.dimensions(), (EDGE, EDGE));
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn test_supplied_turtle_is_padded() {
    let source = Arc::new(page_source());
    let cache = MosaicCache::new(source, create_index(), mosaic_settings(FillStyle::Fixed));
    let coordinator = DeepZoomCoordinator::new(
        cache,
        deepzoom_settings(),
        Some(GrayImage::from_pixel(2, 2, Luma([7]))),
    );

    let tile = coordinator
        .deepzoom(&page_tile(12, 0, 0), Adjustments::default())
        .await
        .unwrap();
    assert_eq!(tile.dimensions(), (EDGE, EDGE));
    assert_eq!(tile.get_pixel(0, 0)[0], 7);
    assert_eq!(tile.get_pixel(3, 3)[0], FILL);
}

#[tokio::test]
async fn test_invalid_path() {
    let (_, coordinator) = coordinator(page_source());
    let err = coordinator
        .deepzoom("/pages/no-level-here.jpg", Adjustments::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DeepZoomError::InvalidPath(_)));
}

// =============================================================================
// Redirects
// =============================================================================

#[tokio::test]
async fn test_redirect_rewrites_into_pyramid() {
    let target = pyramid_tile(&light_id(), 3, 0, 0);
    let (source, coordinator) = coordinator(
        page_source().with_tile(target.clone(), GrayImage::from_pixel(EDGE, EDGE, Luma([99]))),
    );

    // Level 7, x=4: source pixel (2, 0) of the basic tile, the light pyramid
    let tile = coordinator
        .deepzoom(&page_tile(7, 4, 0), Adjustments::default())
        .await
        .unwrap();
    assert!(is_uniform(&tile, 99));
    assert_eq!(
        source.requested_paths().await,
        vec![page_tile(4, 0, 0), target]
    );
}

#[tokio::test]
async fn test_redirect_row_offsets() {
    let (source, coordinator) = coordinator(page_source());

    // x=5: second output column inside the light pyramid's cell
    for y in [0, 1, 2, 3, 4, 5] {
        coordinator
            .deepzoom(&page_tile(7, 5, y), Adjustments::default())
            .await
            .unwrap();
    }

    let redirected: Vec<String> = source
        .requested_paths()
        .await
        .into_iter()
        .filter(|path| *path != page_tile(4, 0, 0))
        .collect();
    assert_eq!(
        redirected,
        vec![
            // Top-down row 0
            pyramid_tile(&light_id(), 3, 1, 0),
            pyramid_tile(&light_id(), 3, 1, 1),
            // Seam row 1, upper half: third fraction row of the pyramid above
            pyramid_tile(&light_id(), 3, 1, 2),
            // Seam row 1, lower half: first fraction row of the pyramid below
            pyramid_tile(&light_id(), 3, 1, 0),
            // Bottom-up row 2
            pyramid_tile(&light_id(), 3, 1, 1),
            pyramid_tile(&light_id(), 3, 1, 2),
        ]
    );
}

#[tokio::test]
async fn test_redirect_missing_tile_is_blank() {
    let (_, coordinator) = coordinator(page_source());

    let tile = coordinator
        .deepzoom(&page_tile(7, 4, 0), Adjustments::default())
        .await
        .unwrap();
    assert!(is_uniform(&tile, FILL));

    // Row 3 of the basic tile is never mapped
    let tile = coordinator
        .deepzoom(&page_tile(7, 4, 6), Adjustments::default())
        .await
        .unwrap();
    assert!(is_uniform(&tile, FILL));
}

#[tokio::test]
async fn test_redirect_connection_error_is_not_blanked() {
    let target = pyramid_tile(&light_id(), 3, 0, 0);
    let (_, coordinator) = coordinator(page_source().with_failure(
        target,
        SourceError::Connection("connection reset".to_string()),
    ));

    let err = coordinator
        .deepzoom(&page_tile(7, 4, 0), Adjustments::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeepZoomError::Source(SourceError::Connection(_))
    ));
}

#[tokio::test]
async fn test_missing_basic_tile_is_not_cached_as_blank() {
    let (source, coordinator) = coordinator(page_source());

    // A redirect under an absent basic tile maps a blank in its place
    coordinator
        .deepzoom(&page_tile(7, 8, 0), Adjustments::default())
        .await
        .unwrap();

    // Rendering from the same basic tile still reports it missing
    let err = coordinator
        .deepzoom(&page_tile(5, 2, 0), Adjustments::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeepZoomError::Mosaic(MosaicError::Source(SourceError::NotFound(_)))
    ));
    assert_eq!(
        source
            .requested_paths()
            .await
            .iter()
            .filter(|path| **path == page_tile(4, 1, 0))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_redirect_pads_small_tiles() {
    let target = pyramid_tile(&light_id(), 3, 0, 0);
    let (_, coordinator) = coordinator(
        page_source().with_tile(target, GrayImage::from_pixel(2, 3, Luma([99]))),
    );

    let tile = coordinator
        .deepzoom(&page_tile(7, 4, 0), Adjustments::default())
        .await
        .unwrap();
    assert_eq!(tile.dimensions(), (EDGE, EDGE));
    assert_eq!(tile.get_pixel(1, 2)[0], 99);
    assert_eq!(tile.get_pixel(2, 0)[0], FILL);
    assert_eq!(tile.get_pixel(0, 3)[0], FILL);
}

#[tokio::test]
async fn test_redirect_skips_tiles_outside_known_source() {
    let (source, coordinator) = coordinator(page_source());

    // The dark pyramid is 600x400: level 3 holds 2x1 tiles of 4 pixels
    let tile = coordinator
        .deepzoom(&page_tile(7, 0, 1), Adjustments::default())
        .await
        .unwrap();
    assert!(is_uniform(&tile, FILL));
    assert_eq!(source.requested_paths().await, vec![page_tile(4, 0, 0)]);
}

#[tokio::test]
async fn test_redirect_blank_uses_pyramid_average() {
    let source = Arc::new(page_source());
    let coordinator = create_coordinator(source, deepzoom_settings(), FillStyle::Average);

    let tile = coordinator
        .deepzoom(&page_tile(7, 0, 0), Adjustments::default())
        .await
        .unwrap();
    assert!(is_uniform(&tile, DARK));
}

#[tokio::test]
async fn test_redirect_border() {
    let target = pyramid_tile(&light_id(), 3, 0, 0);
    let source = Arc::new(
        page_source().with_tile(target, GrayImage::from_pixel(EDGE, EDGE, Luma([99]))),
    );
    let settings = DeepZoomSettings {
        border: true,
        ..deepzoom_settings()
    };
    let coordinator = create_coordinator(source, settings, FillStyle::Fixed);

    let tile = coordinator
        .deepzoom(&page_tile(7, 4, 0), Adjustments::default())
        .await
        .unwrap();
    assert_eq!(tile.get_pixel(0, 0)[0], BORDER_GREY);
    assert_eq!(tile.get_pixel(3, 2)[0], BORDER_GREY);
    assert_eq!(tile.get_pixel(1, 1)[0], 99);

    // Tiles served directly are never framed
    let basic = coordinator
        .deepzoom(&page_tile(4, 0, 0), Adjustments::default())
        .await
        .unwrap();
    assert_eq!(basic, split_tile());
}

// =============================================================================
// Known IDs
// =============================================================================

#[tokio::test]
async fn test_only_known_ids() {
    let dark_tile = pyramid_tile(&dark_id(), 4, 0, 0);
    let source = Arc::new(
        page_source().with_tile(dark_tile.clone(), GrayImage::from_pixel(EDGE, EDGE, Luma([5]))),
    );
    let settings = DeepZoomSettings {
        only_known_ids: true,
        ..deepzoom_settings()
    };
    let coordinator = create_coordinator(source, settings, FillStyle::Fixed);

    let err = coordinator
        .deepzoom(&page_tile(4, 0, 0), Adjustments::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DeepZoomError::UnknownPyramid(_)));

    let err = coordinator
        .get_dzi(&format!("/pages/{}.jp2.dzi", PAGE_ID))
        .await
        .unwrap_err();
    assert!(matches!(err, DeepZoomError::UnknownPyramid(_)));

    let tile = coordinator
        .deepzoom(&dark_tile, Adjustments::default())
        .await
        .unwrap();
    assert!(is_uniform(&tile, 5));
}

// =============================================================================
// Descriptors and Random Images
// =============================================================================

const PAGE_DZI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Image TileSize="256" Overlap="0" Format="jpg" xmlns="http://schemas.microsoft.com/deepzoom/2008">
  <Size Width="1000" Height="800"/>
</Image>"#;

#[tokio::test]
async fn test_dzi_is_scaled() {
    let path = format!("/pages/{}.jp2.dzi", PAGE_ID);
    let (_, coordinator) = coordinator(page_source().with_descriptor(path.clone(), PAGE_DZI));

    let xml = coordinator.get_dzi(&path).await.unwrap();
    assert!(xml.contains(r#"Width="131072000""#));
    assert!(xml.contains(r#"Height="104857600""#));
    assert!(xml.contains(r#"TileSize="256""#));
}

#[tokio::test]
async fn test_dzi_generated_from_record() {
    let (_, coordinator) = coordinator(page_source());
    let path = format!("{}.dzi", PathTemplate::default().image_path(&dark_id()));

    let xml = coordinator.get_dzi(&path).await.unwrap();
    assert!(xml.contains(&format!(r#"Width="{}""#, 600u64 << 17)));
    assert!(xml.contains(&format!(r#"Height="{}""#, 400u64 << 17)));
    assert!(xml.contains(&format!(r#"TileSize="{}""#, EDGE)));

    // The light pyramid has no stored dimensions
    let path = format!("{}.dzi", PathTemplate::default().image_path(&light_id()));
    assert!(matches!(
        coordinator.get_dzi(&path).await,
        Err(DeepZoomError::Source(SourceError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_dzi_without_size_is_invalid() {
    let path = "/pages/broken.dzi";
    let (_, coordinator) =
        coordinator(page_source().with_descriptor(path, r#"<Image TileSize="256"/>"#));
    assert!(matches!(
        coordinator.get_dzi(path).await,
        Err(DeepZoomError::InvalidDescriptor(_))
    ));
}

#[test]
fn test_random_image_is_a_pyramid_descriptor() {
    let (_, coordinator) = coordinator(page_source());
    let template = PathTemplate::default();
    let candidates = [
        format!("{}.dzi", template.image_path(&dark_id())),
        format!("{}.dzi", template.image_path(&light_id())),
    ];

    for _ in 0..16 {
        let path = coordinator.random_image().unwrap();
        assert!(path.starts_with("/avis-show/symlinks/"));
        assert!(candidates.contains(&path), "unexpected {}", path);
    }
}
