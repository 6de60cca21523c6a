use ml_core::Detection;
use serde::{Deserialize, Serialize};

use crate::monitor::{inventory::StockStatus, pipeline::PredictOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct BoxSummary {
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) width: i32,
    pub(crate) height: i32,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct DetectionSummary {
    #[serde(rename = "box")]
    pub(crate) bbox: BoxSummary,
    pub(crate) confidence: f32,
    pub(crate) label: &'static str,
}

impl From<&Detection> for DetectionSummary {
    fn from(detection: &Detection) -> Self {
        let bbox = detection.bbox;
        Self {
            bbox: BoxSummary {
                x: bbox.x,
                y: bbox.y,
                width: bbox.width,
                height: bbox.height,
            },
            confidence: detection.confidence,
            label: detection.label,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct PredictResponse {
    pub(crate) success: bool,
    pub(crate) package_count: usize,
    pub(crate) inference_time_ms: f64,
    pub(crate) detections: Vec<DetectionSummary>,
    pub(crate) status: StockStatus,
    pub(crate) message: &'static str,
}

impl From<PredictOutcome> for PredictResponse {
    fn from(outcome: PredictOutcome) -> Self {
        Self {
            success: true,
            package_count: outcome.package_count(),
            inference_time_ms: outcome.inference_time_ms,
            detections: outcome.detections.iter().map(DetectionSummary::from).collect(),
            status: outcome.record.status,
            message: outcome.record.message,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct FailureResponse {
    pub(crate) success: bool,
    pub(crate) error: String,
}

impl FailureResponse {
    pub(crate) fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) model_ready: bool,
}

/// `/update-settings` body: `min` is the critical threshold, `max` the full capacity.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub(crate) struct ThresholdSettings {
    pub(crate) min: i64,
    pub(crate) max: i64,
}

#[derive(Serialize)]
pub(crate) struct SettingsResponse {
    pub(crate) success: bool,
    pub(crate) updated: ThresholdSettings,
}
