//! StreetSight Classifiers
//!
//! Classifies photos of civic issues (potholes, garbage, broken streetlights
//! and so on) into configured categories with a confidence score.
//!
//! Two paths produce scores:
//! - A pretrained layers model, when one of the configured candidates loads
//!   and matches the preprocessing contract
//! - Statistical image features fed through a rule-based scorer otherwise
//!
//! [`ClassificationService`] picks the path, applies the confidence
//! threshold, and releases every tensor it allocated before returning.

pub mod classifier;
pub mod config;
pub mod features;
pub mod heuristic;
pub mod layers;
pub mod model_loader;
pub mod preprocess;
pub mod runtime;
pub mod service;

pub use classifier::ImageClassifier;
pub use config::{DeviceSpec, EngineConfig, LabelsConfig, ModelCandidate, ServiceConfig};
pub use heuristic::ScoringParams;
pub use layers::{LayersModel, ManifestError};
pub use model_loader::{load_candidate, resolve_model, LoadedModel};
pub use preprocess::{preprocess, ImageTensor};
pub use runtime::{
    Capability, EngineInfo, EngineLoader, HostAdapter, MemoryInfo, RuntimeHandle, TrackedTensor,
};
pub use service::{apply_threshold, ClassificationService, Decision, ServiceStatus};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::ImageClassifier;
    pub use crate::config::{LabelsConfig, ServiceConfig};
    pub use crate::runtime::HostAdapter;
    pub use crate::service::{ClassificationService, ServiceStatus};
}
