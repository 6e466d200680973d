//! Image classifier trait

use async_trait::async_trait;
use std::path::Path;
use streetsight_core::{ClassificationResult, ClassificationSource, Error, Result};

/// Trait for image classifiers
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Classify an encoded image
    async fn classify(&self, image: &[u8]) -> Result<ClassificationResult>;

    /// Get the classifier name
    fn name(&self) -> &str;

    /// Path calls will take, or `None` before the classifier is ready
    fn source(&self) -> Option<ClassificationSource>;

    /// Read an image file and classify it
    async fn classify_file(&self, path: &Path) -> Result<ClassificationResult> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            Error::preprocess(format!("failed to read image {}: {}", path.display(), e))
        })?;
        self.classify(&bytes).await
    }
}
