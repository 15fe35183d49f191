//! Receipt image access behind a trait so the engine never touches the
//! filesystem directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Error type for image access.
#[derive(Debug, thiserror::Error)]
pub enum ImageSourceError {
    #[error("Image file not found: {0}")]
    NotFound(String),

    #[error("Image too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("I/O error: {0}")]
    Io(String),
}

/// Provides the raw bytes for a receipt image path.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn load(&self, path: &str) -> Result<Vec<u8>, ImageSourceError>;
}

/// MIME type for an image path, by extension. Unknown extensions fall
/// back to JPEG, the dominant receipt upload format.
pub fn media_type_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Configuration for the filesystem image source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Directory that relative image paths are resolved against.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Upper bound on image size; larger files are rejected before reading.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_bytes: default_max_bytes(),
        }
    }
}

/// Filesystem-backed image source.
pub struct FsImageSource {
    config: ImagesConfig,
}

impl FsImageSource {
    pub fn new(config: ImagesConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ImagesConfig::default())
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.config.root.join(p)
        }
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    async fn load(&self, path: &str) -> Result<Vec<u8>, ImageSourceError> {
        let resolved = self.resolve(path);

        let metadata = fs::metadata(&resolved).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ImageSourceError::NotFound(path.to_string())
            } else {
                ImageSourceError::Io(e.to_string())
            }
        })?;

        if metadata.len() > self.config.max_bytes {
            return Err(ImageSourceError::TooLarge {
                size: metadata.len(),
                max: self.config.max_bytes,
            });
        }

        fs::read(&resolved).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ImageSourceError::NotFound(path.to_string())
            } else {
                ImageSourceError::Io(e.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_reads_file_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("receipt.jpg"), b"jpeg bytes").unwrap();

        let source = FsImageSource::new(ImagesConfig {
            root: dir.path().to_path_buf(),
            max_bytes: 1024,
        });

        let bytes = source.load("receipt.jpg").await.unwrap();
        assert_eq!(bytes, b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_load_absolute_path_ignores_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("r.png");
        std::fs::write(&file, b"png").unwrap();

        let source = FsImageSource::with_defaults();
        let bytes = source.load(file.to_str().unwrap()).await.unwrap();
        assert_eq!(bytes, b"png");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsImageSource::new(ImagesConfig {
            root: dir.path().to_path_buf(),
            max_bytes: 1024,
        });

        let err = source.load("nope.jpg").await.unwrap_err();
        assert!(matches!(err, ImageSourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.jpg"), vec![0u8; 64]).unwrap();

        let source = FsImageSource::new(ImagesConfig {
            root: dir.path().to_path_buf(),
            max_bytes: 16,
        });

        let err = source.load("big.jpg").await.unwrap_err();
        assert!(matches!(err, ImageSourceError::TooLarge { size: 64, .. }));
    }

    #[test]
    fn test_media_type_from_extension() {
        assert_eq!(media_type_for("receipts/r1.jpg"), "image/jpeg");
        assert_eq!(media_type_for("receipts/r1.JPEG"), "image/jpeg");
        assert_eq!(media_type_for("scan.PNG"), "image/png");
        assert_eq!(media_type_for("anim.webp"), "image/webp");
        assert_eq!(media_type_for("no_extension"), "image/jpeg");
    }
}
