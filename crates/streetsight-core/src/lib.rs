//! StreetSight Core
//!
//! Core types shared across StreetSight components.
//!
//! This crate provides:
//! - Error types and result handling
//! - Prediction and classification result types
//! - The image feature vector produced by the statistical extractor

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    sort_predictions, ClassificationResult, ClassificationSource, ColorChannel,
    ColorDistribution, FeatureVector, ModelInfo, Prediction, SurfaceType,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{ClassificationResult, ClassificationSource, FeatureVector, Prediction};
}
