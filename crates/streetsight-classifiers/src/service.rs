//! Classification service
//!
//! [`ClassificationService`] owns the engine loader, the labels and the
//! resolved model. It is initialized once; concurrent `initialize` calls share
//! the in-flight initialization, and a failed initialization can be retried.
//! After that, [`ClassificationService::classify`] only reads shared state, so
//! any number of calls may run at once.

use crate::classifier::ImageClassifier;
use crate::config::{LabelsConfig, ServiceConfig};
use crate::features;
use crate::heuristic;
use crate::model_loader::{resolve_model, LoadedModel};
use crate::preprocess::{preprocess, ImageTensor};
use crate::runtime::{EngineInfo, EngineLoader, HostAdapter, MemoryInfo, RuntimeHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use streetsight_core::{
    sort_predictions, ClassificationResult, ClassificationSource, Error, FeatureVector, ModelInfo,
    Prediction, Result,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// State built by a successful initialization
pub struct ServiceState {
    runtime: RuntimeHandle,
    labels: Arc<LabelsConfig>,
    model: Option<LoadedModel>,
    loaded_at: DateTime<Utc>,
}

/// How a single call produces its scores
enum InferencePath<'a> {
    Model(&'a LoadedModel),
    Features,
}

/// Scores plus whatever the chosen path reports alongside them
struct Scored {
    predictions: Vec<Prediction>,
    source: ClassificationSource,
    features: Option<FeatureVector>,
    model_info: Option<ModelInfo>,
}

/// Outcome of the confidence threshold policy
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub category: String,
    pub backend_category: Option<String>,
    pub confidence: f32,
    pub used_default: bool,
}

/// Apply the threshold to a sorted prediction list.
///
/// Below the threshold the category and its backend mapping fall back to the
/// default category. The confidence stays the raw top confidence.
pub fn apply_threshold(predictions: &[Prediction], labels: &LabelsConfig) -> Decision {
    match predictions.first() {
        Some(top) if top.confidence >= labels.confidence_threshold => Decision {
            category: top.category.clone(),
            backend_category: top.backend_category.clone(),
            confidence: top.confidence,
            used_default: false,
        },
        top => Decision {
            category: labels.default_category.clone(),
            backend_category: labels.backend_for(&labels.default_category),
            confidence: top.map(|p| p.confidence).unwrap_or(0.0),
            used_default: true,
        },
    }
}

/// Pair raw model outputs with categories by index.
///
/// Missing outputs and non-finite values score zero; everything is clamped
/// to `[0, 1]`.
pub fn zip_scores(scores: &[f32], labels: &LabelsConfig) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = labels
        .ai_categories
        .iter()
        .enumerate()
        .map(|(i, category)| {
            let raw = scores.get(i).copied().unwrap_or(0.0);
            let confidence = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
            Prediction::new(category.clone(), confidence, labels.backend_for(category))
        })
        .collect();

    sort_predictions(&mut predictions);
    predictions
}

impl ServiceState {
    fn path(&self) -> InferencePath<'_> {
        match &self.model {
            Some(model) => InferencePath::Model(model),
            None => InferencePath::Features,
        }
    }

    fn classify(&self, bytes: &[u8], config: &ServiceConfig) -> Result<ClassificationResult> {
        let start = self.runtime.now_ms();

        let image = preprocess(&self.runtime, bytes, config.target_size, config.max_image_bytes)?;
        let scored = match self.path() {
            InferencePath::Model(loaded) => self.score_with_model(loaded, &image)?,
            InferencePath::Features => self.score_with_features(&image, config)?,
        };
        image.dispose();

        let decision = apply_threshold(&scored.predictions, &self.labels);
        if decision.used_default {
            debug!(
                confidence = decision.confidence,
                threshold = self.labels.confidence_threshold,
                default = %decision.category,
                "Low confidence, using default category"
            );
        }

        Ok(ClassificationResult {
            category: decision.category,
            backend_category: decision.backend_category,
            confidence: decision.confidence,
            all_predictions: scored.predictions,
            threshold: self.labels.confidence_threshold,
            processing_time_ms: (self.runtime.now_ms() - start).max(0.0) as u64,
            source: scored.source,
            features: scored.features,
            model_info: scored.model_info,
        })
    }

    fn score_with_model(&self, loaded: &LoadedModel, image: &ImageTensor) -> Result<Scored> {
        let output = loaded
            .model
            .forward(image)
            .map(|t| self.runtime.track(t))
            .map_err(|e| Error::inference(format!("forward pass failed: {}", e)))?;
        let scores = output
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::inference(format!("failed to read model output: {}", e)))?;
        output.dispose();

        Ok(Scored {
            predictions: zip_scores(&scores, &self.labels),
            source: ClassificationSource::Model,
            features: None,
            model_info: Some(loaded.info.clone()),
        })
    }

    fn score_with_features(&self, image: &ImageTensor, config: &ServiceConfig) -> Result<Scored> {
        let features = features::extract(&self.runtime, image)?;
        debug!(
            brightness = features.brightness,
            contrast = features.contrast,
            dark_ratio = features.dark_pixel_ratio,
            surface = %features.surface_type,
            "Extracted image features"
        );

        Ok(Scored {
            predictions: heuristic::score(&features, &self.labels, &config.scoring),
            source: ClassificationSource::Features,
            features: Some(features),
            model_info: None,
        })
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub fn labels(&self) -> &Arc<LabelsConfig> {
        &self.labels
    }

    pub fn model_info(&self) -> Option<&ModelInfo> {
        self.model.as_ref().map(|m| &m.info)
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Snapshot returned by [`ClassificationService::status`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub status: &'static str,
    pub categories: Vec<String>,
    pub backend_categories: Vec<String>,
    pub category_mapping: BTreeMap<String, String>,
    pub confidence_threshold: f32,
    pub total_categories: usize,
    pub model_info: Option<ModelInfo>,
    pub engine_info: Option<EngineInfo>,
    pub memory: Option<MemoryInfo>,
    pub classification_method: &'static str,
    pub last_loaded: Option<DateTime<Utc>>,
    pub version: &'static str,
}

/// Image classification service
pub struct ClassificationService {
    config: ServiceConfig,
    host: HostAdapter,
    engine: EngineLoader,
    state: OnceCell<Arc<ServiceState>>,
    init_attempts: AtomicUsize,
}

impl ClassificationService {
    /// Create a service with the headless host adapter
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_host(config, HostAdapter::headless())
    }

    /// Create a service with a specific host adapter
    pub fn with_host(config: ServiceConfig, host: HostAdapter) -> Self {
        Self {
            config,
            host,
            engine: EngineLoader::new(),
            state: OnceCell::new(),
            init_attempts: AtomicUsize::new(0),
        }
    }

    /// Load the engine, labels and model. Safe to call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        self.state
            .get_or_try_init(|| async {
                self.init_attempts.fetch_add(1, Ordering::SeqCst);
                self.load_state().await.map(Arc::new).map_err(|e| {
                    warn!(error = %e, "Classification service failed to initialize");
                    e
                })
            })
            .await?;
        Ok(())
    }

    async fn load_state(&self) -> Result<ServiceState> {
        info!("Initializing classification service");

        let runtime = self.engine.initialize(&self.host, &self.config.engine).await?;

        let labels = LabelsConfig::from_file(&self.config.labels_path)?;
        info!(
            categories = labels.len(),
            threshold = labels.confidence_threshold,
            "Loaded labels"
        );

        let model = resolve_model(
            &runtime,
            &self.config.resolved_candidates(),
            self.config.target_size,
            labels.len(),
        );

        let state = ServiceState {
            runtime,
            labels: Arc::new(labels),
            model,
            loaded_at: Utc::now(),
        };
        info!(
            method = method_name(Some(&state)),
            categories = %state.labels.ai_categories.join(", "),
            "Classification service initialized"
        );
        Ok(state)
    }

    /// Classify an encoded image
    pub async fn classify(&self, bytes: &[u8]) -> Result<ClassificationResult> {
        let state = self.state.get().ok_or(Error::NotInitialized)?;

        match state.classify(bytes, &self.config) {
            Ok(result) => {
                metrics::counter!(
                    "streetsight_classifications_total",
                    "source" => result.source.as_str()
                )
                .increment(1);
                metrics::histogram!("streetsight_classification_latency_ms")
                    .record(result.processing_time_ms as f64);
                if result.used_default() {
                    metrics::counter!("streetsight_threshold_fallbacks_total").increment(1);
                }
                info!(
                    category = %result.category,
                    confidence = result.confidence,
                    source = %result.source,
                    elapsed_ms = result.processing_time_ms,
                    "Classified image"
                );
                Ok(result)
            }
            Err(e) => {
                metrics::counter!(
                    "streetsight_classification_errors_total",
                    "kind" => e.kind()
                )
                .increment(1);
                warn!(error = %e, "Classification failed");
                Err(e)
            }
        }
    }

    /// Current service status
    pub fn status(&self) -> ServiceStatus {
        let state = self.state.get().map(|s| &**s);
        let labels = state.map(|s| s.labels.as_ref());

        ServiceStatus {
            status: if state.is_some() { "loaded" } else { "not_loaded" },
            categories: labels.map(|l| l.ai_categories.clone()).unwrap_or_default(),
            backend_categories: labels
                .map(|l| l.backend_categories.clone())
                .unwrap_or_default(),
            category_mapping: labels
                .map(|l| l.category_mapping.clone())
                .unwrap_or_default(),
            confidence_threshold: labels.map(|l| l.confidence_threshold).unwrap_or(0.0),
            total_categories: labels.map(LabelsConfig::len).unwrap_or(0),
            model_info: state.and_then(|s| s.model_info().cloned()),
            engine_info: self.engine.get().map(|r| r.info().clone()),
            memory: self.engine.get().map(RuntimeHandle::memory),
            classification_method: method_name(state),
            last_loaded: state.map(|s| s.loaded_at),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Release the model, labels and engine.
    ///
    /// The service answers `NotInitialized` until `initialize` runs again.
    /// Callers still holding an `Arc<ServiceState>` keep their copy alive.
    pub fn dispose(&mut self) {
        let state = self.state.take();
        let engine = self.engine.reset();
        if state.is_some() || engine.is_some() {
            info!("Classification service disposed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Initialized state, if any
    pub fn state(&self) -> Option<&Arc<ServiceState>> {
        self.state.get()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Number of initializations actually started
    pub fn init_attempts(&self) -> usize {
        self.init_attempts.load(Ordering::SeqCst)
    }
}

fn method_name(state: Option<&ServiceState>) -> &'static str {
    match state.map(ServiceState::path) {
        Some(InferencePath::Model(_)) => "model",
        Some(InferencePath::Features) => "features",
        None => "unavailable",
    }
}

#[async_trait]
impl ImageClassifier for ClassificationService {
    async fn classify(&self, image: &[u8]) -> Result<ClassificationResult> {
        ClassificationService::classify(self, image).await
    }

    fn name(&self) -> &str {
        "streetsight"
    }

    fn source(&self) -> Option<ClassificationSource> {
        self.state().map(|s| match s.path() {
            InferencePath::Model(_) => ClassificationSource::Model,
            InferencePath::Features => ClassificationSource::Features,
        })
    }
}

static GLOBAL: OnceLock<Arc<ClassificationService>> = OnceLock::new();

/// Install the process-wide service. Returns the installed instance, which
/// is the existing one if a service was already installed.
pub fn install(service: ClassificationService) -> Arc<ClassificationService> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(service)))
}

/// The process-wide service, if installed
pub fn global() -> Option<Arc<ClassificationService>> {
    GLOBAL.get().cloned()
}
