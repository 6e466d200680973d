//! Core types for StreetSight

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single category score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    /// Fine-grained category name
    pub category: String,

    /// Confidence score (0.0-1.0)
    pub confidence: f32,

    /// Coarser routing bucket, if the category has a mapping
    pub backend_category: Option<String>,
}

impl Prediction {
    /// Create a new prediction
    pub fn new(
        category: impl Into<String>,
        confidence: f32,
        backend_category: Option<String>,
    ) -> Self {
        Self {
            category: category.into(),
            confidence,
            backend_category,
        }
    }
}

/// Sort predictions by confidence, highest first.
///
/// The sort is stable, so equal confidences keep their original category order.
pub fn sort_predictions(predictions: &mut [Prediction]) {
    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

/// Which path produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    /// Pretrained model inference
    Model,
    /// Statistical features and heuristic scoring
    Features,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Features => "features",
        }
    }
}

impl fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a loaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Candidate name the model was loaded from
    pub name: String,

    /// Manifest path
    pub manifest: String,

    /// Declared input shape (`None` = unbounded batch dimension)
    pub input_shape: Vec<Option<usize>>,

    /// Output shape
    pub output_shape: Vec<Option<usize>>,

    /// Total number of weight parameters
    pub total_params: usize,

    /// Number of executable layers
    pub layers: usize,
}

/// Final result handed back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// Category after the threshold policy was applied
    pub category: String,

    /// Backend category after the threshold policy was applied
    pub backend_category: Option<String>,

    /// Raw confidence of the top prediction
    pub confidence: f32,

    /// Every category score, sorted descending and never rewritten by policy
    pub all_predictions: Vec<Prediction>,

    /// Threshold the policy compared against
    pub threshold: f32,

    /// Wall time spent in this call
    pub processing_time_ms: u64,

    /// Path that produced the scores
    pub source: ClassificationSource,

    /// Feature vector, present on the feature path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,

    /// Model description, present on the model path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
}

impl ClassificationResult {
    /// Top raw prediction, unaffected by the threshold policy
    pub fn top_prediction(&self) -> Option<&Prediction> {
        self.all_predictions.first()
    }

    /// True when the reported category was replaced by the default category
    pub fn used_default(&self) -> bool {
        self.top_prediction()
            .map(|top| top.confidence < self.threshold)
            .unwrap_or(false)
    }
}

/// RGB channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChannel {
    Red,
    Green,
    Blue,
}

impl ColorChannel {
    pub const ALL: [ColorChannel; 3] = [Self::Red, Self::Green, Self::Blue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
        }
    }
}

/// Coarse surface label derived from brightness, texture and contrast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceType {
    Asphalt,
    Concrete,
    RoughSurface,
    Unknown,
}

impl SurfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asphalt => "asphalt",
            Self::Concrete => "concrete",
            Self::RoughSurface => "rough_surface",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SurfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorDistribution {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub red_variance: f32,
    pub green_variance: f32,
    pub blue_variance: f32,
    pub dominant_color: ColorChannel,

    /// min(channel means) / max(channel means)
    pub color_balance: f32,
}

/// Statistical fingerprint of an image tensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub brightness: f32,
    pub variance: f32,
    pub contrast: f32,
    pub texture_complexity: f32,
    pub gradient_magnitude: f32,
    pub dark_pixel_ratio: f32,
    pub color_uniformity: f32,
    pub grayscale_tendency: f32,
    pub color_distribution: ColorDistribution,
    pub complexity: f32,
    pub surface_type: SurfaceType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_predictions_is_stable() {
        let mut predictions = vec![
            Prediction::new("a", 0.2, None),
            Prediction::new("b", 0.9, None),
            Prediction::new("c", 0.9, None),
            Prediction::new("d", 0.5, None),
        ];

        sort_predictions(&mut predictions);

        let order: Vec<&str> = predictions.iter().map(|p| p.category.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = ClassificationResult {
            category: "other".to_string(),
            backend_category: Some("other".to_string()),
            confidence: 0.4,
            all_predictions: vec![Prediction::new("pothole", 0.4, Some("infrastructure".into()))],
            threshold: 0.6,
            processing_time_ms: 12,
            source: ClassificationSource::Features,
            features: None,
            model_info: None,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["backendCategory"], "other");
        assert_eq!(json["allPredictions"][0]["backendCategory"], "infrastructure");
        assert_eq!(json["processingTimeMs"], 12);
        assert_eq!(json["source"], "features");
        assert!(json.get("features").is_none());
        assert!(result.used_default());
    }

    #[test]
    fn test_surface_type_labels() {
        let json = serde_json::to_string(&SurfaceType::RoughSurface).unwrap();
        assert_eq!(json, "\"rough_surface\"");
        assert_eq!(SurfaceType::Asphalt.to_string(), "asphalt");
    }
}
