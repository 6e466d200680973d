//! Configuration for the classification service and the labels asset

use crate::heuristic::ScoringParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use streetsight_core::{Error, Result};

/// Configuration for the classification service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Labels document (JSON)
    #[serde(default = "default_labels_path")]
    pub labels_path: PathBuf,

    /// Directory relative candidate manifests resolve against
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Model manifests, tried in order
    #[serde(default = "default_model_candidates")]
    pub model_candidates: Vec<ModelCandidate>,

    /// Square edge length images are resized to
    #[serde(default = "default_target_size")]
    pub target_size: u32,

    /// Largest accepted encoded image
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Tensor engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Heuristic scorer coefficients
    #[serde(default)]
    pub scoring: ScoringParams,
}

/// A model manifest to try during resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    /// Name used in logs and status
    pub name: String,

    /// Path to the layers-model manifest
    pub manifest: PathBuf,
}

impl ModelCandidate {
    pub fn new(name: impl Into<String>, manifest: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            manifest: manifest.into(),
        }
    }
}

/// Tensor engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Execution backend
    #[serde(default)]
    pub device: DeviceSpec,

    /// Readiness probes before giving up, one per animation frame
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,

    /// Animation frame interval for the headless scheduler
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: DeviceSpec::Cpu,
            ready_attempts: default_ready_attempts(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

/// Device specification (for config files)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    #[default]
    Cpu,
    Cuda {
        index: Option<usize>,
    },
    Metal {
        index: Option<usize>,
    },
}

impl DeviceSpec {
    /// Backend name reported in engine info
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda { .. } => "cuda",
            Self::Metal { .. } => "metal",
        }
    }

    /// Backend plus device ordinal, e.g. `cuda:1`
    pub fn label(&self) -> String {
        match self {
            Self::Cpu => "cpu".to_string(),
            Self::Cuda { index } | Self::Metal { index } => {
                format!("{}:{}", self.backend_name(), index.unwrap_or(0))
            }
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            labels_path: default_labels_path(),
            model_dir: default_model_dir(),
            model_candidates: default_model_candidates(),
            target_size: default_target_size(),
            max_image_bytes: default_max_image_bytes(),
            engine: EngineConfig::default(),
            scoring: ScoringParams::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse service config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "Failed to read service config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Load from file if it exists, otherwise use defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(
                path = %path.as_ref().display(),
                "Service config not found, using defaults"
            );
            Ok(Self::default())
        }
    }

    /// Check ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(Error::config("target_size must be greater than zero"));
        }
        if self.max_image_bytes == 0 {
            return Err(Error::config("max_image_bytes must be greater than zero"));
        }
        if self.engine.ready_attempts == 0 {
            return Err(Error::config("engine.ready_attempts must be at least 1"));
        }
        self.scoring.validate()
    }

    /// Candidates with manifests resolved against `model_dir`
    pub fn resolved_candidates(&self) -> Vec<ModelCandidate> {
        self.model_candidates
            .iter()
            .map(|candidate| {
                let manifest = if candidate.manifest.is_absolute() {
                    candidate.manifest.clone()
                } else {
                    self.model_dir.join(&candidate.manifest)
                };
                ModelCandidate::new(candidate.name.clone(), manifest)
            })
            .collect()
    }
}

/// Category labels, routing map and threshold policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelsConfig {
    /// Ordered category names; model output index i maps to entry i
    pub ai_categories: Vec<String>,

    /// Category to backend category
    #[serde(default)]
    pub category_mapping: BTreeMap<String, String>,

    /// Category reported when the top confidence is below the threshold
    pub default_category: String,

    /// Minimum top confidence for the predicted category to stand
    pub confidence_threshold: f32,

    /// Known backend categories
    #[serde(default)]
    pub backend_categories: Vec<String>,
}

impl LabelsConfig {
    /// Parse and validate a labels document
    pub fn from_json(json: &str) -> Result<Self> {
        let labels: Self = serde_json::from_str(json)?;
        labels.validate()?;
        Ok(labels)
    }

    /// Read and validate a labels document
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "Failed to read labels {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::config("aiCategories must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::config(format!(
                "confidenceThreshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !self.ai_categories.contains(&self.default_category) {
            return Err(Error::config(format!(
                "defaultCategory '{}' is not one of aiCategories",
                self.default_category
            )));
        }
        for category in &self.ai_categories {
            if !self.category_mapping.contains_key(category) {
                tracing::warn!(category = %category, "Category has no backend mapping");
            }
        }
        Ok(())
    }

    /// Backend category for a fine-grained category
    pub fn backend_for(&self, category: &str) -> Option<String> {
        self.category_mapping.get(category).cloned()
    }

    pub fn len(&self) -> usize {
        self.ai_categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ai_categories.is_empty()
    }
}

fn default_labels_path() -> PathBuf {
    PathBuf::from("./model/labels.json")
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./model")
}

fn default_model_candidates() -> Vec<ModelCandidate> {
    vec![
        ModelCandidate::new("compatible", "model_updated.json"),
        ModelCandidate::new("original", "model.json"),
    ]
}

fn default_target_size() -> u32 {
    224
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_ready_attempts() -> u32 {
    3
}

fn default_frame_interval_ms() -> u64 {
    16
}
