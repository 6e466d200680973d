//! Sequential layers-model executor
//!
//! Reads a layers-model manifest (Keras-style `Sequential` topology plus a
//! weights manifest) and runs it on candle. Only the layer kinds needed for
//! small image classifiers are supported; anything else fails the load so the
//! resolver can move on to the next candidate.

use candle_core::{DType, Device, Tensor, D};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Errors raised while reading or validating a model artifact
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest has no Sequential layer list")]
    MissingLayers,

    #[error("unsupported layer '{0}'")]
    UnsupportedLayer(String),

    #[error("invalid config for layer '{layer}': {reason}")]
    InvalidConfig { layer: String, reason: String },

    #[error("missing weight '{0}'")]
    MissingWeight(String),

    #[error("weights: {0}")]
    Weights(String),

    #[error("model declares no input shape")]
    MissingInputShape,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine: {0}")]
    Engine(#[from] candle_core::Error),
}

type ManifestResult<T> = std::result::Result<T, ManifestError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelManifest {
    model_topology: Value,
    #[serde(default)]
    weights_manifest: Vec<WeightGroup>,
}

#[derive(Debug, Deserialize)]
struct WeightGroup {
    paths: Vec<String>,
    weights: Vec<WeightSpec>,
}

#[derive(Debug, Deserialize)]
struct WeightSpec {
    name: String,
    shape: Vec<usize>,
    #[serde(default = "default_dtype")]
    dtype: String,
}

fn default_dtype() -> String {
    "float32".to_string()
}

#[derive(Debug, Deserialize)]
struct LayerSpec {
    class_name: String,
    #[serde(default)]
    config: Value,
}

/// Elementwise activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Softmax,
    Tanh,
}

impl Activation {
    fn parse(layer: &str, value: Option<&Value>) -> ManifestResult<Self> {
        match value.and_then(Value::as_str).unwrap_or("linear") {
            "linear" => Ok(Self::Linear),
            "relu" => Ok(Self::Relu),
            "sigmoid" => Ok(Self::Sigmoid),
            "softmax" => Ok(Self::Softmax),
            "tanh" => Ok(Self::Tanh),
            other => Err(ManifestError::InvalidConfig {
                layer: layer.to_string(),
                reason: format!("unsupported activation '{}'", other),
            }),
        }
    }

    fn apply(&self, x: Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Linear => Ok(x),
            Self::Relu => x.relu(),
            Self::Sigmoid => candle_nn::ops::sigmoid(&x),
            Self::Softmax => candle_nn::ops::softmax(&x, D::Minus1),
            Self::Tanh => x.tanh(),
        }
    }
}

/// One executable layer. Spatial layers operate on NCHW tensors.
#[derive(Debug)]
pub enum Layer {
    Conv2d {
        name: String,
        /// (out, in, kh, kw)
        kernel: Tensor,
        /// (1, out, 1, 1)
        bias: Option<Tensor>,
        stride: usize,
        padding: usize,
        activation: Activation,
    },
    MaxPool2d {
        pool: (usize, usize),
        stride: (usize, usize),
    },
    AvgPool2d {
        pool: (usize, usize),
        stride: (usize, usize),
    },
    GlobalAvgPool2d,
    Flatten,
    Dense {
        name: String,
        /// (in, out)
        kernel: Tensor,
        /// (1, out)
        bias: Option<Tensor>,
        activation: Activation,
    },
    Activation(Activation),
}

impl Layer {
    fn forward(&self, x: Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Conv2d {
                kernel,
                bias,
                stride,
                padding,
                activation,
                ..
            } => {
                let mut y = x.conv2d(kernel, *padding, *stride, 1, 1)?;
                if let Some(bias) = bias {
                    y = y.broadcast_add(bias)?;
                }
                activation.apply(y)
            }
            Self::MaxPool2d { pool, stride } => x.max_pool2d_with_stride(*pool, *stride),
            Self::AvgPool2d { pool, stride } => x.avg_pool2d_with_stride(*pool, *stride),
            Self::GlobalAvgPool2d => x.mean(3)?.mean(2),
            Self::Flatten => match x.rank() {
                4 => x.permute((0, 2, 3, 1))?.flatten_from(1),
                _ => x.flatten_from(1),
            },
            Self::Dense {
                name,
                kernel,
                bias,
                activation,
            } => {
                if x.rank() != 2 {
                    candle_core::bail!(
                        "dense layer '{}' expects rank-2 input, got shape {:?}",
                        name,
                        x.dims()
                    );
                }
                let mut y = x.matmul(kernel)?;
                if let Some(bias) = bias {
                    y = y.broadcast_add(bias)?;
                }
                activation.apply(y)
            }
            Self::Activation(activation) => activation.apply(x),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conv2d { .. } => "Conv2D",
            Self::MaxPool2d { .. } => "MaxPooling2D",
            Self::AvgPool2d { .. } => "AveragePooling2D",
            Self::GlobalAvgPool2d => "GlobalAveragePooling2D",
            Self::Flatten => "Flatten",
            Self::Dense { .. } => "Dense",
            Self::Activation(_) => "Activation",
        }
    }
}

/// A loaded sequential model
#[derive(Debug)]
pub struct LayersModel {
    name: String,
    layers: Vec<Layer>,
    input_shape: Vec<Option<usize>>,
    output_shape: Vec<Option<usize>>,
    total_params: usize,
}

impl LayersModel {
    /// Load topology and weights from a manifest file
    pub fn load(manifest_path: &Path, device: &Device) -> ManifestResult<Self> {
        let content = std::fs::read_to_string(manifest_path)?;
        let manifest: ModelManifest = serde_json::from_str(&content)?;
        let base_dir = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let weights = load_weights(&manifest.weights_manifest, &base_dir, device)?;
        let (name, specs) = sequential_layers(&manifest.model_topology)?;

        let mut input_shape = None;
        let mut layers = Vec::new();
        let mut total_params = 0;

        for spec in &specs {
            let layer_name = spec
                .config
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(&spec.class_name)
                .to_string();

            if input_shape.is_none() {
                input_shape = spec
                    .config
                    .get("batch_input_shape")
                    .or_else(|| spec.config.get("batch_shape"))
                    .and_then(parse_shape);
            }

            let layer = match spec.class_name.as_str() {
                "InputLayer" | "Dropout" | "SpatialDropout2D" => continue,
                "Conv2D" => conv2d(&layer_name, &spec.config, &weights)?,
                "MaxPooling2D" => {
                    let (pool, stride) = pooling(&layer_name, &spec.config)?;
                    Layer::MaxPool2d { pool, stride }
                }
                "AveragePooling2D" => {
                    let (pool, stride) = pooling(&layer_name, &spec.config)?;
                    Layer::AvgPool2d { pool, stride }
                }
                "GlobalAveragePooling2D" => Layer::GlobalAvgPool2d,
                "Flatten" => Layer::Flatten,
                "Dense" => dense(&layer_name, &spec.config, &weights)?,
                "Activation" => Layer::Activation(Activation::parse(
                    &layer_name,
                    spec.config.get("activation"),
                )?),
                other => return Err(ManifestError::UnsupportedLayer(other.to_string())),
            };

            total_params += layer_params(&layer);
            layers.push(layer);
        }

        let input_shape = input_shape.ok_or(ManifestError::MissingInputShape)?;
        let mut model = Self {
            name,
            layers,
            input_shape,
            output_shape: Vec::new(),
            total_params,
        };
        model.output_shape = model.dry_run(device)?;
        Ok(model)
    }

    /// Run the model on an NHWC input batch
    pub fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = match input.rank() {
            4 => input.permute((0, 3, 1, 2))?.contiguous()?,
            _ => input.clone(),
        };
        for layer in &self.layers {
            x = layer.forward(x)?;
        }
        Ok(x)
    }

    /// Forward a zero batch through the model to check shapes end to end
    fn dry_run(&self, device: &Device) -> ManifestResult<Vec<Option<usize>>> {
        let mut dims = vec![1];
        for dim in self.input_shape.iter().skip(1) {
            dims.push(dim.ok_or_else(|| ManifestError::InvalidConfig {
                layer: "input".to_string(),
                reason: "only the batch dimension may be unbounded".to_string(),
            })?);
        }
        let zeros = Tensor::zeros(dims, DType::F32, device)?;
        let output = self.forward(&zeros)?;

        let mut shape = vec![None];
        shape.extend(output.dims().iter().skip(1).map(|d| Some(*d)));
        Ok(shape)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_shape(&self) -> &[Option<usize>] {
        &self.input_shape
    }

    pub fn output_shape(&self) -> &[Option<usize>] {
        &self.output_shape
    }

    pub fn total_params(&self) -> usize {
        self.total_params
    }

    /// One line per layer, for debug logging
    pub fn summary(&self) -> Vec<String> {
        self.layers
            .iter()
            .map(|layer| match layer {
                Layer::Conv2d { name, kernel, .. } => {
                    format!("{} Conv2D kernel={:?}", name, kernel.dims())
                }
                Layer::Dense { name, kernel, .. } => {
                    format!("{} Dense kernel={:?}", name, kernel.dims())
                }
                other => other.kind().to_string(),
            })
            .collect()
    }
}

fn layer_params(layer: &Layer) -> usize {
    match layer {
        Layer::Conv2d { kernel, bias, .. } | Layer::Dense { kernel, bias, .. } => {
            kernel.elem_count() + bias.as_ref().map(Tensor::elem_count).unwrap_or(0)
        }
        _ => 0,
    }
}

/// Extract the model name and layer list from the topology.
///
/// Accepts `{model_config: {class_name, config}}`, `{class_name, config}`,
/// and a config that is either `{layers: [...]}` or a bare layer array.
fn sequential_layers(topology: &Value) -> ManifestResult<(String, Vec<LayerSpec>)> {
    let model_config = topology.get("model_config").unwrap_or(topology);

    if let Some(class_name) = model_config.get("class_name").and_then(Value::as_str) {
        if class_name != "Sequential" {
            return Err(ManifestError::UnsupportedLayer(class_name.to_string()));
        }
    }

    let config = model_config
        .get("config")
        .ok_or(ManifestError::MissingLayers)?;
    let name = config
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("sequential")
        .to_string();
    let layers = match config {
        Value::Array(_) => config.clone(),
        _ => config
            .get("layers")
            .cloned()
            .ok_or(ManifestError::MissingLayers)?,
    };

    Ok((name, serde_json::from_value(layers)?))
}

fn load_weights(
    groups: &[WeightGroup],
    base_dir: &Path,
    device: &Device,
) -> ManifestResult<HashMap<String, Tensor>> {
    let mut weights = HashMap::new();

    for group in groups {
        let paths: Vec<PathBuf> = group.paths.iter().map(|p| base_dir.join(p)).collect();

        if paths
            .iter()
            .all(|p| p.extension().and_then(|e| e.to_str()) == Some("safetensors"))
        {
            for path in &paths {
                weights.extend(candle_core::safetensors::load(path, device)?);
            }
            for spec in &group.weights {
                let tensor = weights
                    .get(&spec.name)
                    .ok_or_else(|| ManifestError::MissingWeight(spec.name.clone()))?;
                if tensor.dims() != spec.shape.as_slice() {
                    return Err(ManifestError::Weights(format!(
                        "'{}' has shape {:?}, manifest says {:?}",
                        spec.name,
                        tensor.dims(),
                        spec.shape
                    )));
                }
            }
            continue;
        }

        // Raw shards are concatenated, then sliced in manifest order.
        let mut buffer = Vec::new();
        for path in &paths {
            buffer.extend(std::fs::read(path)?);
        }

        let mut offset = 0;
        for spec in &group.weights {
            if spec.dtype != "float32" {
                return Err(ManifestError::Weights(format!(
                    "'{}' has unsupported dtype {}",
                    spec.name, spec.dtype
                )));
            }
            let count: usize = spec.shape.iter().product();
            let end = offset + count * 4;
            let bytes = buffer.get(offset..end).ok_or_else(|| {
                ManifestError::Weights(format!(
                    "weight data ends before '{}' ({} bytes available, {} needed)",
                    spec.name,
                    buffer.len(),
                    end
                ))
            })?;
            let values: Vec<f32> = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            let tensor = Tensor::from_vec(values, spec.shape.as_slice(), device)?;
            weights.insert(spec.name.clone(), tensor);
            offset = end;
        }
        if offset != buffer.len() {
            tracing::warn!(
                unused_bytes = buffer.len() - offset,
                "Weight shards contain trailing data"
            );
        }
    }

    Ok(weights)
}

fn find_weight(weights: &HashMap<String, Tensor>, layer: &str, param: &str) -> Option<Tensor> {
    let key = format!("{}/{}", layer, param);
    if let Some(tensor) = weights.get(&key) {
        return Some(tensor.clone());
    }
    let suffix = format!("/{}", key);
    weights
        .iter()
        .find(|(name, _)| name.ends_with(&suffix))
        .map(|(_, tensor)| tensor.clone())
}

fn conv2d(name: &str, config: &Value, weights: &HashMap<String, Tensor>) -> ManifestResult<Layer> {
    let invalid = |reason: &str| ManifestError::InvalidConfig {
        layer: name.to_string(),
        reason: reason.to_string(),
    };

    if let Some(format) = config.get("data_format").and_then(Value::as_str) {
        if format != "channels_last" {
            return Err(invalid("only channels_last is supported"));
        }
    }
    if pair(config.get("dilation_rate")).unwrap_or((1, 1)) != (1, 1) {
        return Err(invalid("dilation is not supported"));
    }

    let (kh, kw) = pair(config.get("kernel_size")).ok_or_else(|| invalid("missing kernel_size"))?;
    let (sh, sw) = pair(config.get("strides")).unwrap_or((1, 1));
    if sh != sw {
        return Err(invalid("strides must be equal in both dimensions"));
    }
    let padding = match config.get("padding").and_then(Value::as_str).unwrap_or("valid") {
        "valid" => 0,
        "same" if kh == kw && kh % 2 == 1 && sh == 1 => (kh - 1) / 2,
        "same" => return Err(invalid("same padding needs a square odd kernel and stride 1")),
        other => return Err(invalid(&format!("unsupported padding '{}'", other))),
    };

    // [kh, kw, in, out] -> [out, in, kh, kw]
    let kernel = find_weight(weights, name, "kernel")
        .ok_or_else(|| ManifestError::MissingWeight(format!("{}/kernel", name)))?;
    if kernel.rank() != 4 || kernel.dims()[0] != kh || kernel.dims()[1] != kw {
        return Err(invalid(&format!(
            "kernel shape {:?} does not match kernel_size {:?}",
            kernel.dims(),
            (kh, kw)
        )));
    }
    let kernel = kernel.permute((3, 2, 0, 1))?.contiguous()?;
    let filters = kernel.dims()[0];

    let bias = if config.get("use_bias").and_then(Value::as_bool).unwrap_or(true) {
        let bias = find_weight(weights, name, "bias")
            .ok_or_else(|| ManifestError::MissingWeight(format!("{}/bias", name)))?;
        Some(bias.reshape((1, filters, 1, 1))?)
    } else {
        None
    };

    Ok(Layer::Conv2d {
        name: name.to_string(),
        kernel,
        bias,
        stride: sh,
        padding,
        activation: Activation::parse(name, config.get("activation"))?,
    })
}

fn dense(name: &str, config: &Value, weights: &HashMap<String, Tensor>) -> ManifestResult<Layer> {
    let kernel = find_weight(weights, name, "kernel")
        .ok_or_else(|| ManifestError::MissingWeight(format!("{}/kernel", name)))?;
    if kernel.rank() != 2 {
        return Err(ManifestError::InvalidConfig {
            layer: name.to_string(),
            reason: format!("kernel must be rank 2, got {:?}", kernel.dims()),
        });
    }
    let units = kernel.dims()[1];

    let bias = if config.get("use_bias").and_then(Value::as_bool).unwrap_or(true) {
        let bias = find_weight(weights, name, "bias")
            .ok_or_else(|| ManifestError::MissingWeight(format!("{}/bias", name)))?;
        Some(bias.reshape((1, units))?)
    } else {
        None
    };

    Ok(Layer::Dense {
        name: name.to_string(),
        kernel,
        bias,
        activation: Activation::parse(name, config.get("activation"))?,
    })
}

fn pooling(name: &str, config: &Value) -> ManifestResult<((usize, usize), (usize, usize))> {
    let padding = config.get("padding").and_then(Value::as_str).unwrap_or("valid");
    if padding != "valid" {
        return Err(ManifestError::InvalidConfig {
            layer: name.to_string(),
            reason: format!("unsupported pooling padding '{}'", padding),
        });
    }
    let pool = pair(config.get("pool_size")).unwrap_or((2, 2));
    let stride = pair(config.get("strides")).unwrap_or(pool);
    Ok((pool, stride))
}

/// `3` or `[3, 3]`
fn pair(value: Option<&Value>) -> Option<(usize, usize)> {
    match value? {
        Value::Number(n) => n.as_u64().map(|v| (v as usize, v as usize)),
        Value::Array(items) if items.len() == 2 => {
            let a = items[0].as_u64()? as usize;
            let b = items[1].as_u64()? as usize;
            Some((a, b))
        }
        _ => None,
    }
}

fn parse_shape(value: &Value) -> Option<Vec<Option<usize>>> {
    value
        .as_array()
        .map(|dims| dims.iter().map(|d| d.as_u64().map(|v| v as usize)).collect())
}
