//! Mock image classifiers
//!
//! Exercises the provided methods of [`ImageClassifier`] without loading an
//! engine, and checks that trait objects of different implementations can be
//! used interchangeably.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use streetsight_classifiers::ImageClassifier;
use streetsight_core::{ClassificationResult, ClassificationSource, Error, Prediction, Result};

/// Returns a fixed category and counts calls
struct MockClassifier {
    name: String,
    category: String,
    confidence: f32,
    call_count: AtomicU32,
    last_len: AtomicU32,
}

impl MockClassifier {
    fn new(name: &str, category: &str, confidence: f32) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            confidence,
            call_count: AtomicU32::new(0),
            last_len: AtomicU32::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClassifier for MockClassifier {
    async fn classify(&self, image: &[u8]) -> Result<ClassificationResult> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.last_len.store(image.len() as u32, Ordering::SeqCst);

        Ok(ClassificationResult {
            category: self.category.clone(),
            backend_category: None,
            confidence: self.confidence,
            all_predictions: vec![Prediction::new(self.category.clone(), self.confidence, None)],
            threshold: 0.5,
            processing_time_ms: 0,
            source: ClassificationSource::Features,
            features: None,
            model_info: None,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> Option<ClassificationSource> {
        Some(ClassificationSource::Features)
    }
}

/// Always fails
struct FailingClassifier;

#[async_trait]
impl ImageClassifier for FailingClassifier {
    async fn classify(&self, _image: &[u8]) -> Result<ClassificationResult> {
        Err(Error::inference("simulated failure"))
    }

    fn name(&self) -> &str {
        "failing"
    }

    fn source(&self) -> Option<ClassificationSource> {
        None
    }
}

#[tokio::test]
async fn test_classify_file_reads_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    std::fs::write(&path, vec![7u8; 123]).unwrap();

    let classifier = MockClassifier::new("mock", "garbage", 0.8);
    let result = classifier.classify_file(&path).await.unwrap();

    assert_eq!(result.category, "garbage");
    assert_eq!(classifier.call_count(), 1);
    assert_eq!(classifier.last_len.load(Ordering::SeqCst), 123);
}

#[tokio::test]
async fn test_classify_file_missing_is_preprocess_error() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = MockClassifier::new("mock", "garbage", 0.8);

    let err = classifier
        .classify_file(&dir.path().join("missing.png"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Preprocess(_)));
    assert_eq!(classifier.call_count(), 0);
}

#[tokio::test]
async fn test_trait_objects_are_interchangeable() {
    let classifiers: Vec<Arc<dyn ImageClassifier>> = vec![
        Arc::new(MockClassifier::new("first", "pothole", 0.9)),
        Arc::new(FailingClassifier),
        Arc::new(MockClassifier::new("second", "streetlight", 0.4)),
    ];

    let mut outcomes = Vec::new();
    for classifier in &classifiers {
        outcomes.push((classifier.name().to_string(), classifier.classify(b"img").await));
    }

    assert_eq!(outcomes[0].1.as_ref().unwrap().category, "pothole");
    assert!(matches!(outcomes[1].1, Err(Error::Inference(_))));
    assert_eq!(outcomes[2].0, "second");
    assert!(classifiers[1].source().is_none());
}
