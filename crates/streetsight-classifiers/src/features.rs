//! Statistical feature extraction
//!
//! Reduces an [`ImageTensor`] to a [`FeatureVector`]: global moments, a dark
//! pixel ratio, per-channel statistics and a coarse surface label. Channel
//! slices and masks are tracked like any other tensor and dropped before
//! [`extract`] returns.

use crate::preprocess::ImageTensor;
use crate::runtime::RuntimeHandle;
use candle_core::{DType, Tensor};
use streetsight_core::{ColorChannel, ColorDistribution, Error, FeatureVector, Result, SurfaceType};

/// Elements below this value count as dark
pub const DARK_THRESHOLD: f32 = 0.3;

/// Extract the feature vector for an image
pub fn extract(runtime: &RuntimeHandle, image: &ImageTensor) -> Result<FeatureVector> {
    let features = compute(runtime, image)
        .map_err(|e| Error::features(format!("tensor reduction failed: {}", e)))?;

    if !features.brightness.is_finite() || !features.variance.is_finite() {
        return Err(Error::features("image statistics are not finite"));
    }
    Ok(features)
}

fn compute(runtime: &RuntimeHandle, image: &ImageTensor) -> candle_core::Result<FeatureVector> {
    let (brightness, variance) = moments(image)?;

    let flat = runtime.track(image.flatten_all()?);
    let max = flat.max(0)?.to_scalar::<f32>()?;
    let min = flat.min(0)?.to_scalar::<f32>()?;
    let contrast = max - min;

    let gradient_magnitude = flat.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()?;

    let threshold = Tensor::new(DARK_THRESHOLD, flat.device())?;
    let dark_mask = runtime.track(flat.broadcast_lt(&threshold)?.to_dtype(DType::F32)?);
    let dark_pixel_ratio = dark_mask.sum_all()?.to_scalar::<f32>()? / flat.elem_count() as f32;
    drop(dark_mask);
    drop(flat);

    let mut means = [0f32; 3];
    let mut variances = [0f32; 3];
    for (i, channel) in image.chunk(3, 3)?.into_iter().enumerate() {
        let channel = runtime.track(channel);
        let (mean, var) = moments(&channel)?;
        means[i] = mean;
        variances[i] = var;
    }
    let [red, green, blue] = means;

    let spread = (red - green).abs() + (green - blue).abs() + (blue - red).abs();
    let color_uniformity = 1.0 - spread;
    let grayscale_tendency = 1.0 - spread / 3.0;
    let texture_complexity = variance.sqrt();

    Ok(FeatureVector {
        brightness,
        variance,
        contrast,
        texture_complexity,
        gradient_magnitude,
        dark_pixel_ratio,
        color_uniformity,
        grayscale_tendency,
        color_distribution: ColorDistribution {
            red,
            green,
            blue,
            red_variance: variances[0],
            green_variance: variances[1],
            blue_variance: variances[2],
            dominant_color: dominant_channel(means),
            color_balance: color_balance(means),
        },
        complexity: variance * contrast,
        surface_type: classify_surface(brightness, grayscale_tendency, texture_complexity, contrast),
    })
}

/// Mean and population variance over every element
fn moments(t: &Tensor) -> candle_core::Result<(f32, f32)> {
    let mean = t.mean_all()?;
    let variance = t.broadcast_sub(&mean)?.sqr()?.mean_all()?;
    Ok((mean.to_scalar::<f32>()?, variance.to_scalar::<f32>()?))
}

/// Channel with the largest mean; red, then green, then blue win ties
pub fn dominant_channel(means: [f32; 3]) -> ColorChannel {
    let mut best = 0;
    for i in 1..3 {
        if means[i] > means[best] {
            best = i;
        }
    }
    ColorChannel::ALL[best]
}

/// min(means) / max(means), or 1.0 for an all-black image
pub fn color_balance(means: [f32; 3]) -> f32 {
    let max = means.iter().copied().fold(f32::MIN, f32::max);
    let min = means.iter().copied().fold(f32::MAX, f32::min);
    if max <= 0.0 {
        1.0
    } else {
        min / max
    }
}

/// Coarse surface label. Rules are checked in order.
pub fn classify_surface(
    brightness: f32,
    grayscale_tendency: f32,
    texture_complexity: f32,
    contrast: f32,
) -> SurfaceType {
    if grayscale_tendency > 0.8 && brightness < 0.6 && contrast > 0.3 {
        SurfaceType::Asphalt
    } else if brightness > 0.7 && grayscale_tendency > 0.7 {
        SurfaceType::Concrete
    } else if texture_complexity > 0.15 {
        SurfaceType::RoughSurface
    } else {
        SurfaceType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::runtime::{EngineLoader, HostAdapter};

    async fn runtime() -> RuntimeHandle {
        EngineLoader::new()
            .initialize(&HostAdapter::headless(), &EngineConfig::default())
            .await
            .unwrap()
    }

    fn image_from(runtime: &RuntimeHandle, size: usize, pixel: impl Fn(usize, usize) -> [f32; 3]) -> ImageTensor {
        let mut data = Vec::with_capacity(size * size * 3);
        for y in 0..size {
            for x in 0..size {
                data.extend_from_slice(&pixel(x, y));
            }
        }
        let tensor = Tensor::from_vec(data, (1, size, size, 3), runtime.device()).unwrap();
        ImageTensor::new(runtime, tensor).unwrap()
    }

    #[tokio::test]
    async fn test_uniform_gray() {
        let runtime = runtime().await;
        let image = image_from(&runtime, 8, |_, _| [0.5, 0.5, 0.5]);

        let f = extract(&runtime, &image).unwrap();

        assert!((f.brightness - 0.5).abs() < 1e-6);
        assert!(f.variance.abs() < 1e-9);
        assert_eq!(f.contrast, 0.0);
        assert_eq!(f.dark_pixel_ratio, 0.0);
        assert!((f.color_uniformity - 1.0).abs() < 1e-6);
        assert!((f.grayscale_tendency - 1.0).abs() < 1e-6);
        assert_eq!(f.color_distribution.dominant_color, ColorChannel::Red);
        assert!((f.color_distribution.color_balance - 1.0).abs() < 1e-6);
        assert_eq!(f.surface_type, SurfaceType::Unknown);
        // sqrt(8 * 8 * 3 * 0.25)
        assert!((f.gradient_magnitude - 48f32.sqrt()).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_half_dark_checkerboard() {
        let runtime = runtime().await;
        let image = image_from(&runtime, 4, |x, y| {
            if (x + y) % 2 == 0 {
                [0.1, 0.1, 0.1]
            } else {
                [0.5, 0.5, 0.5]
            }
        });

        let f = extract(&runtime, &image).unwrap();

        assert!((f.brightness - 0.3).abs() < 1e-6);
        // population variance of {0.1, 0.5} in equal parts
        assert!((f.variance - 0.04).abs() < 1e-6);
        assert!((f.texture_complexity - 0.2).abs() < 1e-6);
        assert!((f.contrast - 0.4).abs() < 1e-6);
        assert!((f.dark_pixel_ratio - 0.5).abs() < 1e-6);
        assert!((f.complexity - 0.016).abs() < 1e-6);
        assert!((f.color_distribution.red_variance - 0.04).abs() < 1e-6);
        assert_eq!(f.surface_type, SurfaceType::Asphalt);
    }

    #[tokio::test]
    async fn test_color_statistics() {
        let runtime = runtime().await;
        let image = image_from(&runtime, 4, |_, _| [0.2, 0.4, 0.8]);

        let f = extract(&runtime, &image).unwrap();
        let colors = f.color_distribution;

        assert!((colors.red - 0.2).abs() < 1e-6);
        assert!((colors.green - 0.4).abs() < 1e-6);
        assert!((colors.blue - 0.8).abs() < 1e-6);
        assert_eq!(colors.dominant_color, ColorChannel::Blue);
        assert!((colors.color_balance - 0.25).abs() < 1e-6);
        // 1 - (0.2 + 0.4 + 0.6)
        assert!((f.color_uniformity + 0.2).abs() < 1e-5);
        assert!((f.grayscale_tendency - 0.6).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_intermediates_are_released() {
        let runtime = runtime().await;
        let image = image_from(&runtime, 6, |x, _| [x as f32 / 6.0, 0.3, 0.9]);

        extract(&runtime, &image).unwrap();
        assert_eq!(runtime.memory().num_tensors, 1);

        drop(image);
        let memory = runtime.memory();
        assert_eq!(memory.num_tensors, 0);
        assert!(memory.peak_tensors >= 2);
    }

    #[test]
    fn test_dominant_channel_ties() {
        assert_eq!(dominant_channel([0.5, 0.5, 0.5]), ColorChannel::Red);
        assert_eq!(dominant_channel([0.1, 0.6, 0.6]), ColorChannel::Green);
        assert_eq!(dominant_channel([0.1, 0.2, 0.3]), ColorChannel::Blue);
    }

    #[test]
    fn test_color_balance_black() {
        assert_eq!(color_balance([0.0, 0.0, 0.0]), 1.0);
        assert!((color_balance([0.2, 0.4, 0.8]) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_surface_rules() {
        assert_eq!(classify_surface(0.3, 0.9, 0.1, 0.5), SurfaceType::Asphalt);
        assert_eq!(classify_surface(0.8, 0.9, 0.1, 0.1), SurfaceType::Concrete);
        assert_eq!(classify_surface(0.5, 0.2, 0.2, 0.5), SurfaceType::RoughSurface);
        assert_eq!(classify_surface(0.5, 0.5, 0.1, 0.1), SurfaceType::Unknown);
        // asphalt wins over rough surface
        assert_eq!(classify_surface(0.3, 0.9, 0.3, 0.5), SurfaceType::Asphalt);
    }
}
