//! Fixtures shared by the integration tests
//!
//! Everything is synthesized into temp directories: PNG images, a labels
//! document and tiny layers models whose output is fixed by their bias.

#![allow(dead_code)]

use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use streetsight_classifiers::{ModelCandidate, ServiceConfig};

pub const CATEGORIES: [(&str, &str); 10] = [
    ("pothole", "infrastructure"),
    ("road_damage", "infrastructure"),
    ("garbage", "environment"),
    ("streetlight", "public_services"),
    ("construction", "transportation"),
    ("vandalism", "safety"),
    ("sidewalk_damage", "infrastructure"),
    ("water_leak", "public_services"),
    ("traffic_sign", "transportation"),
    ("other", "other"),
];

pub const TARGET_SIZE: u32 = 224;

/// Encode an RGB image as PNG
pub fn png(width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb(pixel(x, y)));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// Flat gray image
pub fn gray_png(size: u32, level: u8) -> Vec<u8> {
    png(size, size, |_, _| [level; 3])
}

/// Write the labels document and return its path
pub fn write_labels(dir: &Path, threshold: f32) -> PathBuf {
    let labels = json!({
        "aiCategories": CATEGORIES.iter().map(|(c, _)| *c).collect::<Vec<_>>(),
        "categoryMapping": CATEGORIES
            .iter()
            .map(|(c, b)| (c.to_string(), json!(b)))
            .collect::<serde_json::Map<_, _>>(),
        "defaultCategory": "other",
        "confidenceThreshold": threshold,
        "backendCategories": ["infrastructure", "environment", "safety", "transportation", "public_services", "other"]
    });
    let path = dir.join("labels.json");
    std::fs::write(&path, labels.to_string()).expect("write labels");
    path
}

/// Write a pooling + softmax model whose output depends only on `logits`
pub fn write_model(dir: &Path, file: &str, size: u32, logits: &[f32]) -> PathBuf {
    let classes = logits.len();
    let bin = format!("{}.bin", file.trim_end_matches(".json"));

    let mut bytes = Vec::new();
    for _ in 0..3 * classes {
        bytes.extend_from_slice(&0f32.to_le_bytes());
    }
    for v in logits {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(dir.join(&bin), bytes).expect("write weights");

    let manifest = json!({
        "format": "layers-model",
        "modelTopology": {
            "model_config": {
                "class_name": "Sequential",
                "config": {
                    "name": "civic_classifier",
                    "layers": [
                        {"class_name": "InputLayer", "config": {"name": "input", "batch_input_shape": [null, size, size, 3]}},
                        {"class_name": "GlobalAveragePooling2D", "config": {"name": "gap"}},
                        {"class_name": "Dropout", "config": {"name": "dropout", "rate": 0.2}},
                        {"class_name": "Dense", "config": {"name": "predictions", "units": classes, "activation": "softmax"}}
                    ]
                }
            }
        },
        "weightsManifest": [{
            "paths": [bin],
            "weights": [
                {"name": "predictions/kernel", "shape": [3, classes], "dtype": "float32"},
                {"name": "predictions/bias", "shape": [classes], "dtype": "float32"}
            ]
        }]
    });
    let path = dir.join(file);
    std::fs::write(&path, manifest.to_string()).expect("write manifest");
    path
}

/// Logits that make `category` win with roughly `weight` nats of margin
pub fn logits_favoring(category: &str, weight: f32) -> Vec<f32> {
    CATEGORIES
        .iter()
        .map(|(c, _)| if *c == category { weight } else { 0.0 })
        .collect()
}

/// Route service logs through the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Service config rooted at `dir` with the default candidate names
pub fn service_config(dir: &Path, labels_path: PathBuf) -> ServiceConfig {
    init_tracing();
    ServiceConfig {
        labels_path,
        model_dir: dir.to_path_buf(),
        model_candidates: vec![
            ModelCandidate::new("compatible", "model_updated.json"),
            ModelCandidate::new("original", "model.json"),
        ],
        target_size: TARGET_SIZE,
        ..ServiceConfig::default()
    }
}
