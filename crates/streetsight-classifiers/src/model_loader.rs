//! Model candidate resolution
//!
//! Candidates are tried in priority order. Any failure is logged and the next
//! candidate is tried; running out of candidates is not an error, it just
//! means classification runs on image features instead.

use crate::config::ModelCandidate;
use crate::layers::LayersModel;
use crate::runtime::RuntimeHandle;
use streetsight_core::{Error, ModelInfo, Result};
use tracing::{debug, info, warn};

/// A model that passed every compatibility check
#[derive(Debug)]
pub struct LoadedModel {
    pub model: LayersModel,
    pub info: ModelInfo,
}

/// Try each candidate in order and return the first compatible model.
pub fn resolve_model(
    runtime: &RuntimeHandle,
    candidates: &[ModelCandidate],
    target_size: u32,
    num_categories: usize,
) -> Option<LoadedModel> {
    info!("Resolving model from {} candidates", candidates.len());

    for candidate in candidates {
        match load_candidate(runtime, candidate, target_size) {
            Ok(loaded) => {
                info!(
                    candidate = %candidate.name,
                    params = loaded.info.total_params,
                    input = ?loaded.info.input_shape,
                    output = ?loaded.info.output_shape,
                    "✓ Loaded model"
                );
                for line in loaded.model.summary() {
                    debug!("  {}", line);
                }
                if loaded.info.output_shape.last().copied().flatten() != Some(num_categories) {
                    warn!(
                        candidate = %candidate.name,
                        outputs = ?loaded.info.output_shape.last(),
                        categories = num_categories,
                        "Model output width does not match category count"
                    );
                }
                return Some(loaded);
            }
            Err(e) => {
                metrics::counter!("streetsight_model_candidates_failed_total").increment(1);
                warn!("✗ {}", e);
            }
        }
    }

    warn!("No compatible model found, classification will use image features");
    None
}

/// Load one candidate and check it against the preprocessing contract
pub fn load_candidate(
    runtime: &RuntimeHandle,
    candidate: &ModelCandidate,
    target_size: u32,
) -> Result<LoadedModel> {
    let fail = |reason: String| Error::model_load(&candidate.name, reason);

    if !candidate.manifest.is_file() {
        return Err(fail(format!(
            "manifest {} does not exist",
            candidate.manifest.display()
        )));
    }

    let model = LayersModel::load(&candidate.manifest, runtime.device())
        .map_err(|e| fail(e.to_string()))?;

    let size = target_size as usize;
    let expected = [None, Some(size), Some(size), Some(3)];
    if model.input_shape().len() != 4 || model.input_shape()[1..] != expected[1..] {
        return Err(fail(format!(
            "input shape {:?} is incompatible with preprocessed images {:?}",
            model.input_shape(),
            expected
        )));
    }
    if model.output_shape().len() != 2 {
        return Err(fail(format!(
            "output shape {:?} is not rank 2",
            model.output_shape()
        )));
    }

    let info = ModelInfo {
        name: candidate.name.clone(),
        manifest: candidate.manifest.display().to_string(),
        input_shape: model.input_shape().to_vec(),
        output_shape: model.output_shape().to_vec(),
        total_params: model.total_params(),
        layers: model.layers().len(),
    };

    Ok(LoadedModel { model, info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::runtime::{EngineLoader, HostAdapter};
    use serde_json::json;
    use std::path::Path;

    async fn runtime() -> RuntimeHandle {
        EngineLoader::new()
            .initialize(&HostAdapter::headless(), &EngineConfig::default())
            .await
            .unwrap()
    }

    /// GAP + Dense classifier over `size`x`size` RGB input
    fn write_pooling_model(dir: &Path, file: &str, size: usize, classes: usize) -> ModelCandidate {
        let bin = format!("{}.bin", file);
        let mut bytes = Vec::new();
        for v in std::iter::repeat(0.1f32).take(3 * classes + classes) {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(dir.join(&bin), bytes).unwrap();

        let manifest = json!({
            "modelTopology": {"model_config": {"class_name": "Sequential", "config": {"layers": [
                {"class_name": "InputLayer", "config": {"batch_input_shape": [null, size, size, 3]}},
                {"class_name": "GlobalAveragePooling2D", "config": {"name": "gap"}},
                {"class_name": "Dense", "config": {"name": "out", "units": classes, "activation": "softmax"}}
            ]}}},
            "weightsManifest": [{"paths": [bin], "weights": [
                {"name": "out/kernel", "shape": [3, classes], "dtype": "float32"},
                {"name": "out/bias", "shape": [classes], "dtype": "float32"}
            ]}]
        });
        let path = dir.join(format!("{}.json", file));
        std::fs::write(&path, manifest.to_string()).unwrap();
        ModelCandidate::new(file, path)
    }

    #[tokio::test]
    async fn test_first_compatible_candidate_wins() {
        let runtime = runtime().await;
        let dir = tempfile::tempdir().unwrap();
        let first = write_pooling_model(dir.path(), "compatible", 16, 4);
        let second = write_pooling_model(dir.path(), "original", 16, 4);

        let loaded = resolve_model(&runtime, &[first, second], 16, 4).unwrap();

        assert_eq!(loaded.info.name, "compatible");
        assert_eq!(loaded.info.input_shape, vec![None, Some(16), Some(16), Some(3)]);
        assert_eq!(loaded.info.output_shape, vec![None, Some(4)]);
        assert_eq!(loaded.info.total_params, 16);
        assert_eq!(loaded.info.layers, 2);
    }

    #[tokio::test]
    async fn test_falls_through_broken_candidates() {
        let runtime = runtime().await;
        let dir = tempfile::tempdir().unwrap();

        let missing = ModelCandidate::new("missing", dir.path().join("nope.json"));
        let corrupt_path = dir.path().join("corrupt.json");
        std::fs::write(&corrupt_path, "{ not json").unwrap();
        let corrupt = ModelCandidate::new("corrupt", corrupt_path);
        let wrong_size = write_pooling_model(dir.path(), "wrong_size", 32, 4);
        let good = write_pooling_model(dir.path(), "original", 16, 4);

        let loaded = resolve_model(&runtime, &[missing, corrupt, wrong_size, good], 16, 4).unwrap();
        assert_eq!(loaded.info.name, "original");
    }

    #[tokio::test]
    async fn test_no_candidates_resolves_to_none() {
        let runtime = runtime().await;
        let dir = tempfile::tempdir().unwrap();
        let missing = ModelCandidate::new("missing", dir.path().join("model.json"));

        assert!(resolve_model(&runtime, &[missing], 224, 10).is_none());
        assert!(resolve_model(&runtime, &[], 224, 10).is_none());
    }

    #[tokio::test]
    async fn test_load_candidate_reports_model_load_failed() {
        let runtime = runtime().await;
        let dir = tempfile::tempdir().unwrap();
        let wrong_size = write_pooling_model(dir.path(), "wrong_size", 32, 4);

        match load_candidate(&runtime, &wrong_size, 16) {
            Err(Error::ModelLoadFailed { candidate, reason }) => {
                assert_eq!(candidate, "wrong_size");
                assert!(reason.contains("input shape"));
            }
            other => panic!("expected ModelLoadFailed, got {:?}", other.map(|m| m.info)),
        }
    }

    #[tokio::test]
    async fn test_loading_does_not_touch_ledger() {
        let runtime = runtime().await;
        let dir = tempfile::tempdir().unwrap();
        let good = write_pooling_model(dir.path(), "original", 8, 2);

        let _loaded = load_candidate(&runtime, &good, 8).unwrap();
        assert_eq!(runtime.memory().num_tensors, 0);
    }
}
