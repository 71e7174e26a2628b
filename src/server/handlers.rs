//! HTTP request handlers for the mosaic API.
//!
//! # Endpoints
//!
//! - `GET /image/deepzoom/?GAM=&CNT=&DeepZoom=` - Tile or DZI descriptor
//! - `GET /image/random/` - DZI path of a random reference image
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::deepzoom::{DeepZoomCoordinator, DeepZoomPath};
use crate::error::{DeepZoomError, IndexError, MosaicError, SourceError};
use crate::source::{Adjustments, ImageSource, DEFAULT_CONTRAST, DEFAULT_GAMMA};
use crate::tile::JpegTileEncoder;

/// Default Cache-Control max-age in seconds.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's State extractor.
pub struct AppState<S: ImageSource> {
    pub coordinator: Arc<DeepZoomCoordinator<S>>,

    pub encoder: JpegTileEncoder,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,
}

impl<S: ImageSource> AppState<S> {
    pub fn new(coordinator: DeepZoomCoordinator<S>) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            encoder: JpegTileEncoder::default(),
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
        }
    }

    pub fn with_encoder(mut self, encoder: JpegTileEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_cache_max_age(mut self, cache_max_age: u32) -> Self {
        self.cache_max_age = cache_max_age;
        self
    }

    fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_max_age)
    }
}

impl<S: ImageSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            encoder: self.encoder,
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters of the deep zoom endpoint, named as image servers name them.
#[derive(Debug, Deserialize)]
pub struct DeepZoomQueryParams {
    /// Gamma forwarded to the image source
    #[serde(rename = "GAM", default)]
    pub gamma: Option<f64>,

    /// Contrast forwarded to the image source
    #[serde(rename = "CNT", default)]
    pub contrast: Option<f64>,

    /// Deep zoom path, either a tile or a `.dzi` descriptor
    #[serde(rename = "DeepZoom")]
    pub deep_zoom: String,
}

impl DeepZoomQueryParams {
    pub fn adjustments(&self) -> Adjustments {
        Adjustments::new(
            self.gamma.unwrap_or(DEFAULT_GAMMA),
            self.contrast.unwrap_or(DEFAULT_CONTRAST),
        )
    }

    pub fn is_descriptor(&self) -> bool {
        self.deep_zoom.contains(".dzi")
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_path")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,

    pub version: String,

    /// Number of reference pyramids in the index
    pub pyramids: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn source_status(err: &SourceError) -> (StatusCode, &'static str) {
    match err {
        SourceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        SourceError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        SourceError::Connection(_) => (StatusCode::BAD_GATEWAY, "connection_error"),
        SourceError::Decode(_) => (StatusCode::BAD_GATEWAY, "decode_error"),
    }
}

fn index_status(err: &IndexError) -> (StatusCode, &'static str) {
    match err {
        IndexError::Empty(_) | IndexError::NoCandidates { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable")
        }
        IndexError::MissingShardRoot(_) | IndexError::Io(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "index_error")
        }
    }
}

/// Status and error type for a failed request.
pub fn error_status(err: &DeepZoomError) -> (StatusCode, &'static str) {
    match err {
        DeepZoomError::InvalidPath(_) => (StatusCode::BAD_REQUEST, "invalid_path"),
        DeepZoomError::UnknownPyramid(_) => (StatusCode::NOT_FOUND, "unknown_pyramid"),
        DeepZoomError::InvalidDescriptor(_) => (StatusCode::BAD_GATEWAY, "invalid_descriptor"),
        DeepZoomError::Source(e) | DeepZoomError::Mosaic(MosaicError::Source(e)) => {
            source_status(e)
        }
        DeepZoomError::Index(e) | DeepZoomError::Mosaic(MosaicError::Index(e)) => index_status(e),
        DeepZoomError::Mosaic(MosaicError::InvalidRenderLevel { .. }) => {
            (StatusCode::BAD_REQUEST, "invalid_level")
        }
        DeepZoomError::Mosaic(MosaicError::InvalidSource { .. }) => {
            (StatusCode::BAD_GATEWAY, "invalid_source")
        }
        DeepZoomError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
    }
}

/// Wrapper for handler errors to implement IntoResponse.
///
/// 4xx errors are logged at WARN (404 at DEBUG), 5xx errors at ERROR.
pub struct HandlerError(pub DeepZoomError);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let (status, error_type) = error_status(&self.0);
        let message = self.0.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let body = ErrorResponse::with_status(error_type, message, status);
        (status, Json(body)).into_response()
    }
}

impl From<DeepZoomError> for HandlerError {
    fn from(err: DeepZoomError) -> Self {
        HandlerError(err)
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Serve a deep zoom tile or descriptor.
///
/// # Endpoint
///
/// `GET /image/deepzoom/?GAM=2.0&CNT=1.1&DeepZoom=/a/<uuid>.jp2_files/14/3_5.jpg`
///
/// A `DeepZoom` path containing `.dzi` returns the scaled DZI descriptor as
/// XML; anything else returns a JPEG tile.
///
/// # Headers
///
/// - `Content-Type: image/jpeg` or `application/xml`
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Deepzoom-Regime: basic|render|redirect|turtle` (tiles only)
pub async fn deepzoom_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Query(query): Query<DeepZoomQueryParams>,
) -> Result<Response, HandlerError> {
    if query.is_descriptor() {
        let xml = state.coordinator.get_dzi(&query.deep_zoom).await?;
        return Ok((
            [
                (header::CONTENT_TYPE, "application/xml".to_string()),
                (header::CACHE_CONTROL, state.cache_control()),
            ],
            xml,
        )
            .into_response());
    }

    let level = DeepZoomPath::parse(&query.deep_zoom)?.level;
    let regime = format!("{:?}", state.coordinator.regime(level)).to_lowercase();
    let tile = state
        .coordinator
        .deepzoom(&query.deep_zoom, query.adjustments())
        .await?;
    let jpeg = state.encoder.encode(&tile)?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CACHE_CONTROL, state.cache_control()),
        ],
        [("X-Deepzoom-Regime", regime)],
        jpeg,
    )
        .into_response())
}

/// Path of a random reference image's descriptor, as plain text.
///
/// # Endpoint
///
/// `GET /image/random/`
pub async fn random_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
) -> Result<String, HandlerError> {
    Ok(state.coordinator.random_image()?)
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "pyramids": 12345
/// }
/// ```
pub async fn health_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pyramids: state.coordinator.index().len(),
    })
}
