//! API integration tests for the deep zoom endpoints.
//!
//! Tests verify:
//! - Tiles in every regime, with content type, cache and regime headers
//! - DZI descriptors served as scaled XML
//! - HTTP status codes and JSON bodies for each error class
//! - Random image and health endpoints, CORS headers

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use nrt_mosaic::{create_router, DeepZoomSettings, FillStyle, PathTemplate, RouterConfig};

use super::test_utils::{
    create_coordinator, dark_id, deepzoom_settings, is_valid_jpeg, light_id, page_source,
    page_tile, MockImageSource, PAGE_ID,
};

const PAGE_DZI: &str = r#"<Image TileSize="4" Overlap="0" Format="jpg"><Size Width="8" Height="4"/></Image>"#;

fn router_with(source: MockImageSource, settings: DeepZoomSettings) -> Router {
    let coordinator = create_coordinator(Arc::new(source), settings, FillStyle::Fixed);
    create_router(coordinator, RouterConfig::new().with_tracing(false))
}

fn router() -> Router {
    router_with(
        page_source().with_descriptor(format!("/pages/{}.jp2.dzi", PAGE_ID), PAGE_DZI),
        deepzoom_settings(),
    )
}

fn deepzoom_uri(path: &str) -> String {
    format!(
        "/image/deepzoom/?GAM=1.0&CNT=0.0&DeepZoom={}",
        urlencoding::encode(path)
    )
}

async fn get(router: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// =============================================================================
// Tile Retrieval
// =============================================================================

#[tokio::test]
async fn test_basic_tile_success() {
    let response = get(router(), &deepzoom_uri(&page_tile(4, 0, 0))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/jpeg"
    );
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=3600"
    );
    assert_eq!(response.headers().get("x-deepzoom-regime").unwrap(), "basic");

    let body = body_bytes(response).await;
    assert!(is_valid_jpeg(&body), "Response should be a valid JPEG");
}

#[tokio::test]
async fn test_regime_header_per_level() {
    let cases = [
        (page_tile(5, 0, 0), "render"),
        (page_tile(6, 3, 3), "render"),
        (page_tile(7, 0, 0), "redirect"),
        (page_tile(10, 0, 0), "turtle"),
    ];
    for (path, regime) in cases {
        let response = get(router(), &deepzoom_uri(&path)).await;
        assert_eq!(response.status(), StatusCode::OK, "{}", path);
        assert_eq!(
            response.headers().get("x-deepzoom-regime").unwrap(),
            regime,
            "{}",
            path
        );
        assert!(is_valid_jpeg(&body_bytes(response).await));
    }
}

#[tokio::test]
async fn test_route_without_trailing_slash() {
    let uri = format!(
        "/image/deepzoom?DeepZoom={}",
        urlencoding::encode(&page_tile(4, 0, 0))
    );
    let response = get(router(), &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_custom_cache_max_age() {
    let coordinator = create_coordinator(
        Arc::new(page_source()),
        deepzoom_settings(),
        FillStyle::Fixed,
    );
    let router = create_router(
        coordinator,
        RouterConfig::new()
            .with_cache_max_age(60)
            .with_jpeg_quality(50)
            .with_tracing(false),
    );

    let response = get(router, &deepzoom_uri(&page_tile(4, 0, 0))).await;
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=60"
    );
}

// =============================================================================
// Descriptors
// =============================================================================

#[tokio::test]
async fn test_descriptor_is_scaled_xml() {
    let response = get(
        router(),
        &deepzoom_uri(&format!("/pages/{}.jp2.dzi", PAGE_ID)),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/xml"
    );
    assert!(response.headers().get("x-deepzoom-regime").is_none());

    let xml = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(xml.contains(&format!(r#"Width="{}""#, 8u64 << 17)));
    assert!(xml.contains(&format!(r#"Height="{}""#, 4u64 << 17)));
}

#[tokio::test]
async fn test_missing_descriptor_returns_404() {
    let path = format!("{}.dzi", PathTemplate::default().image_path(&light_id()));
    let response = get(router(), &deepzoom_uri(&path)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generated_descriptor_for_known_pyramid() {
    let path = format!("{}.dzi", PathTemplate::default().image_path(&dark_id()));
    let response = get(router(), &deepzoom_uri(&path)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let xml = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(xml.contains(&format!(r#"Width="{}""#, 600u64 << 17)));
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_invalid_path_returns_400() {
    let response = get(router(), &deepzoom_uri("/pages/not-a-tile.jpg")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_path");
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn test_missing_query_parameter_returns_400() {
    let response = get(router(), "/image/deepzoom/").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(
        router(),
        &format!("{}&GAM=bright", deepzoom_uri(&page_tile(4, 0, 0))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_source_tile_returns_404() {
    let response = get(router(), &deepzoom_uri(&page_tile(3, 0, 0))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");

    // A render level without its basic tile
    let response = get(router(), &deepzoom_uri(&page_tile(5, 4, 4))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_pyramid_returns_404() {
    let settings = DeepZoomSettings {
        only_known_ids: true,
        ..deepzoom_settings()
    };
    let response = get(
        router_with(page_source(), settings),
        &deepzoom_uri(&page_tile(4, 0, 0)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "unknown_pyramid");
}

// =============================================================================
// Random, Health, CORS
// =============================================================================

#[tokio::test]
async fn test_random_image() {
    for uri in ["/image/random/", "/image/random"] {
        let response = get(router(), uri).await;
        assert_eq!(response.status(), StatusCode::OK);

        let path = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(path.starts_with("/avis-show/symlinks/"));
        assert!(path.ends_with(".jp2.dzi"));
    }
}

#[tokio::test]
async fn test_health() {
    let response = get(router(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["pyramids"], 2);
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_cors_any_origin() {
    let request = Request::builder()
        .uri("/health")
        .header("origin", "https://viewer.example.com")
        .body(Body::empty())
        .unwrap();
    let response = router().oneshot(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let response = get(router(), "/tiles/anything").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
