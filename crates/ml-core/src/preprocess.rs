//! Image decoding and tensor preparation.
//!
//! Every call site resizes with the bilinear (`Triangle`) filter so the
//! counting and verification endpoints see identical model input.

use image::{DynamicImage, GenericImageView, imageops::FilterType};
use ndarray::Array4;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

/// Resize filter shared by all preprocessing paths.
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has zero width or height")]
    Empty,
}

/// Decoded upload plus the tensor fed to the engine.
pub struct PreparedImage {
    /// Decoded image before any resizing.
    pub original: DynamicImage,
    /// `[1, 3, input_size, input_size]`, RGB, values in `[0, 1]`.
    pub tensor: Array4<f32>,
}

impl PreparedImage {
    /// Original `(height, width)` used to scale boxes back.
    pub fn original_size(&self) -> (u32, u32) {
        let (width, height) = self.original.dimensions();
        (height, width)
    }
}

/// Decode arbitrary-format image bytes and build the model input tensor.
pub fn prepare_image(bytes: &[u8], input_size: u32) -> Result<PreparedImage, PreprocessError> {
    let original = decode_image(bytes)?;
    let tensor = image_to_tensor(&original, input_size);
    Ok(PreparedImage { original, tensor })
}

/// Decode bytes, sniffing the format from the content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
    let image = image::load_from_memory(bytes)?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessError::Empty);
    }
    Ok(image)
}

/// Converts an image into a normalized NCHW tensor with a batch of one.
pub fn image_to_tensor(image: &DynamicImage, input_size: u32) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, input_size, input_size, RESIZE_FILTER);
    let side = input_size as usize;

    Array4::from_shape_fn((1, RGB_CHANNELS, side, side), |(_, c, y, x)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}
