//! Converts raw detector output into detections in original-image pixels.

use ndarray::{ArrayD, ArrayView2, Axis, Ix2};
use thiserror::Error;

use crate::{BoxXywh, Detection, PACKAGE_LABEL, nms::nms_boxes};

/// Minimum row width: `cx, cy, w, h, confidence`.
const PREDICTION_CHANNELS: usize = 5;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("unexpected detector output shape: {0:?}")]
    UnexpectedShape(Vec<usize>),
    #[error("detector output requires at least 5 channels (cx,cy,w,h,conf), got {0}")]
    TooFewChannels(usize),
}

/// Thresholds and geometry shared by every decode call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeSettings {
    /// Square model input resolution in pixels.
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            input_size: 320,
            confidence_threshold: 0.30,
            iou_threshold: 0.45,
        }
    }
}

/// One candidate anchor in model-input pixel space, center form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPrediction {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
}

impl RawPrediction {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32, confidence: f32) -> Self {
        Self {
            cx,
            cy,
            w,
            h,
            confidence,
        }
    }
}

/// Splits a `[1, C, N]` (or `[C, N]`) output tensor into `N` rows.
pub fn predictions_from_output(output: &ArrayD<f32>) -> Result<Vec<RawPrediction>, OutputError> {
    let shape = output.shape().to_vec();
    let channels_first: ArrayView2<'_, f32> = match shape.as_slice() {
        [1, _, _] => output
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|_| OutputError::UnexpectedShape(shape.clone()))?,
        [_, _] => output
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| OutputError::UnexpectedShape(shape.clone()))?,
        _ => return Err(OutputError::UnexpectedShape(shape.clone())),
    };

    let channels = channels_first.nrows();
    if channels < PREDICTION_CHANNELS {
        return Err(OutputError::TooFewChannels(channels));
    }

    let rows = channels_first
        .t()
        .outer_iter()
        .map(|row| RawPrediction::new(row[0], row[1], row[2], row[3], row[4]))
        .collect();
    Ok(rows)
}

/// Scales, filters and de-duplicates raw predictions.
///
/// `original_size` is `(height, width)` of the image before resizing. Width
/// and height are scaled before the corner is derived from them, and every
/// coordinate is truncated toward zero. Boxes are not clipped to the image.
pub fn decode_predictions(
    predictions: &[RawPrediction],
    original_size: (u32, u32),
    settings: &DecodeSettings,
) -> Vec<Detection> {
    let (orig_h, orig_w) = original_size;
    let input_size = settings.input_size.max(1) as f64;
    let scale_x = orig_w as f64 / input_size;
    let scale_y = orig_h as f64 / input_size;

    let mut boxes = Vec::new();
    let mut confidences = Vec::new();
    for pred in predictions {
        if pred.confidence < settings.confidence_threshold {
            continue;
        }
        let width = (pred.w as f64 * scale_x) as i32;
        let height = (pred.h as f64 * scale_y) as i32;
        let x = (pred.cx as f64 * scale_x - width as f64 / 2.0) as i32;
        let y = (pred.cy as f64 * scale_y - height as f64 / 2.0) as i32;
        boxes.push(BoxXywh::new(x, y, width, height));
        confidences.push(pred.confidence);
    }

    nms_boxes(
        &boxes,
        &confidences,
        settings.confidence_threshold,
        settings.iou_threshold,
    )
    .into_iter()
    .map(|idx| Detection {
        bbox: boxes[idx],
        confidence: round_confidence(confidences[idx]),
        label: PACKAGE_LABEL,
    })
    .collect()
}

fn round_confidence(confidence: f32) -> f32 {
    ((confidence as f64 * 1000.0).round() / 1000.0) as f32
}
