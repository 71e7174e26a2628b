//! Deep zoom tiles served from a local directory.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use image::GrayImage;

use crate::error::SourceError;
use crate::tile::decode_grey;

use super::{Adjustments, ImageSource};

/// Reads tiles below a root directory.
///
/// Deep zoom paths map directly onto the file system; adjustments are ignored.
#[derive(Debug, Clone)]
pub struct FileImageSource {
    root: PathBuf,
}

impl FileImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing a deep zoom path. Parent directory components are rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(SourceError::InvalidRequest(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        let file = self.resolve(path)?;
        tokio::fs::read(&file).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => SourceError::NotFound(file.display().to_string()),
            _ => SourceError::Connection(format!("{}: {}", file.display(), e)),
        })
    }
}

#[async_trait]
impl ImageSource for FileImageSource {
    async fn fetch_tile(
        &self,
        path: &str,
        _adjustments: Adjustments,
    ) -> Result<GrayImage, SourceError> {
        decode_grey(&self.read(path).await?)
    }

    async fn fetch_descriptor(&self, path: &str) -> Result<String, SourceError> {
        String::from_utf8(self.read(path).await?).map_err(|e| SourceError::Decode(e.to_string()))
    }
}
