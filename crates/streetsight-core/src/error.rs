//! Error types for StreetSight

/// Result type alias using StreetSight's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for StreetSight operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The numeric tensor engine could not be brought up
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A model candidate failed to load. Recovered inside model resolution.
    #[error("model '{candidate}' failed to load: {reason}")]
    ModelLoadFailed { candidate: String, reason: String },

    /// Image decoding or tensor construction failed
    #[error("image preprocessing failed: {0}")]
    Preprocess(String),

    /// The service has not completed initialization
    #[error("classification service not initialized")]
    NotInitialized,

    /// Statistical feature extraction failed
    #[error("feature extraction failed: {0}")]
    FeatureExtraction(String),

    /// Model forward pass or output readback failed
    #[error("inference error: {0}")]
    Inference(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new engine-unavailable error
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::EngineUnavailable(msg.into())
    }

    /// Create a new model-load error for a named candidate
    pub fn model_load(candidate: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoadFailed {
            candidate: candidate.into(),
            reason: reason.into(),
        }
    }

    /// Create a new preprocessing error
    pub fn preprocess(msg: impl Into<String>) -> Self {
        Self::Preprocess(msg.into())
    }

    /// Create a new feature-extraction error
    pub fn features(msg: impl Into<String>) -> Self {
        Self::FeatureExtraction(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::ModelLoadFailed { .. } => "model_load_failed",
            Self::Preprocess(_) => "preprocess",
            Self::NotInitialized => "not_initialized",
            Self::FeatureExtraction(_) => "feature_extraction",
            Self::Inference(_) => "inference",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}
