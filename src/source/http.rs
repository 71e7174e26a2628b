//! Image server reached over HTTP.

use async_trait::async_trait;
use image::GrayImage;
use reqwest::{Client, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::error::SourceError;
use crate::tile::decode_grey;

use super::{Adjustments, ImageSource};

/// IIP-style deep zoom endpoint.
pub const DEFAULT_IMAGE_SERVER_TEMPLATE: &str =
    "http://achernar/iipsrv/?GAM={gamma}&CNT={contrast}&DeepZoom={path}";

/// Fetches tiles from a remote image server.
///
/// The URL is produced from a template holding `{gamma}`, `{contrast}` and
/// `{path}` placeholders; the path is percent-encoded.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: Client,
    template: String,
}

impl HttpImageSource {
    pub fn new(template: impl Into<String>) -> Self {
        Self::with_client(Client::new(), template)
    }

    pub fn with_client(client: Client, template: impl Into<String>) -> Self {
        Self {
            client,
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Expand the template for one request.
    pub fn url_for(&self, path: &str, adjustments: Adjustments) -> Result<Url, SourceError> {
        let expanded = self
            .template
            .replace("{gamma}", &adjustments.gamma.to_string())
            .replace("{contrast}", &adjustments.contrast.to_string())
            .replace("{path}", &urlencoding::encode(path));
        Url::parse(&expanded).map_err(|e| SourceError::InvalidRequest(format!("{}: {}", expanded, e)))
    }

    async fn get(&self, url: Url) -> Result<bytes::Bytes, SourceError> {
        trace!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map_err(|e| SourceError::Connection(e.to_string())),
            StatusCode::NOT_FOUND => Err(SourceError::NotFound(url.to_string())),
            status => Err(SourceError::Connection(format!("{} returned {}", url, status))),
        }
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch_tile(
        &self,
        path: &str,
        adjustments: Adjustments,
    ) -> Result<GrayImage, SourceError> {
        let url = self.url_for(path, adjustments)?;
        let body = self.get(url).await?;
        let image = decode_grey(&body)?;
        debug!(
            "Fetched {}x{} tile for {}",
            image.width(),
            image.height(),
            path
        );
        Ok(image)
    }

    async fn fetch_descriptor(&self, path: &str) -> Result<String, SourceError> {
        let url = self.url_for(path, Adjustments::default())?;
        let body = self.get(url).await?;
        String::from_utf8(body.to_vec()).map_err(|e| SourceError::Decode(e.to_string()))
    }
}
