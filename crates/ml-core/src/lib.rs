//! Model-facing building blocks for the inventory monitor.
//!
//! - `preprocess`: encoded image bytes into a normalized NCHW tensor.
//! - `detector`: the inference engine seam and its ONNX Runtime backend.
//! - `decode`: raw model rows into scaled, thresholded detections.
//! - `nms`: greedy non-maximum suppression over integer boxes.

pub mod decode;
pub mod detector;
pub mod nms;
pub mod preprocess;

pub use decode::{
    DecodeSettings, OutputError, RawPrediction, decode_predictions, predictions_from_output,
};
pub use detector::{EngineError, EngineOptions, InferenceEngine, OnnxEngine};
pub use preprocess::{PreparedImage, PreprocessError, prepare_image};

pub use ndarray;

/// Label attached to every detection produced by the single-class model.
pub const PACKAGE_LABEL: &str = "package";

/// Axis-aligned box in original-image pixels, top-left origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoxXywh {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoxXywh {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}

/// Single detection returned by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoxXywh,
    /// Score rounded to three decimals.
    pub confidence: f32,
    pub label: &'static str,
}
