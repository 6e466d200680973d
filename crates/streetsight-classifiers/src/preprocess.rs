//! Encoded image bytes to a normalized NHWC tensor

use crate::runtime::{RuntimeHandle, TrackedTensor};
use candle_core::Tensor;
use image::imageops::FilterType;
use std::ops::Deref;
use streetsight_core::{Error, Result};
use tracing::debug;

/// Rank-4 `(1, height, width, 3)` f32 tensor with values in `[0, 1]`.
///
/// Counted by the runtime's memory ledger until dropped.
#[derive(Debug)]
pub struct ImageTensor(TrackedTensor);

impl ImageTensor {
    /// Wrap an existing tensor, checking its shape
    pub fn new(runtime: &RuntimeHandle, tensor: Tensor) -> Result<Self> {
        if !matches!(tensor.dims(), [1, h, w, 3] if *h > 0 && *w > 0) {
            return Err(Error::preprocess(format!(
                "expected a (1, height, width, 3) tensor, got {:?}",
                tensor.dims()
            )));
        }
        Ok(Self(runtime.track(tensor)))
    }

    pub fn height(&self) -> usize {
        self.0.dims()[1]
    }

    pub fn width(&self) -> usize {
        self.0.dims()[2]
    }

    /// Release the tensor now
    pub fn dispose(self) {
        self.0.dispose();
    }
}

impl Deref for ImageTensor {
    type Target = Tensor;

    fn deref(&self) -> &Tensor {
        self.0.tensor()
    }
}

/// Decode, cover-fit to `target_size` square, and normalize an image.
pub fn preprocess(
    runtime: &RuntimeHandle,
    bytes: &[u8],
    target_size: u32,
    max_bytes: usize,
) -> Result<ImageTensor> {
    if bytes.is_empty() {
        return Err(Error::preprocess("image buffer is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(Error::preprocess(format!(
            "image is {} bytes, limit is {}",
            bytes.len(),
            max_bytes
        )));
    }
    if target_size == 0 {
        return Err(Error::preprocess("target size must be greater than zero"));
    }

    let format = image::guess_format(bytes)
        .map_err(|e| Error::preprocess(format!("unrecognised image format: {}", e)))?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| Error::preprocess(format!("failed to decode {:?} image: {}", format, e)))?;

    debug!(
        format = ?format,
        width = decoded.width(),
        height = decoded.height(),
        target_size,
        "Decoded image"
    );

    let (x, y, side) = center_square(decoded.width(), decoded.height());
    let rgb = decoded
        .crop_imm(x, y, side, side)
        .resize_exact(target_size, target_size, FilterType::Triangle)
        .to_rgb8();
    let pixels: Vec<f32> = rgb.into_raw().into_iter().map(|b| b as f32 / 255.0).collect();

    let size = target_size as usize;
    let tensor = Tensor::from_vec(pixels, (1, size, size, 3), runtime.device())
        .map_err(|e| Error::preprocess(format!("failed to build image tensor: {}", e)))?;

    ImageTensor::new(runtime, tensor)
}

/// Largest centered square inside a `width` x `height` image, as
/// `(x, y, side)`. Cropping before resizing keeps the intermediate buffer no
/// larger than the decoded image.
fn center_square(width: u32, height: u32) -> (u32, u32, u32) {
    let side = width.min(height);
    ((width - side) / 2, (height - side) / 2, side)
}
