//! Mock image source for testing.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::images::{ImageSource, ImageSourceError};

/// In-memory implementation of the ImageSource trait.
///
/// Paths that were never inserted resolve to
/// [`ImageSourceError::NotFound`], which is how tests exercise the
/// missing-file path of the pipeline.
#[derive(Default)]
pub struct MockImageSource {
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register image bytes under a path.
    pub fn insert(&self, path: impl Into<String>, bytes: Vec<u8>) {
        self.images.lock().unwrap().insert(path.into(), bytes);
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    async fn load(&self, path: &str) -> Result<Vec<u8>, ImageSourceError> {
        self.images
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ImageSourceError::NotFound(path.to_string()))
    }
}
