//! Request orchestration: decode, infer, post-process, then either update the
//! inventory or render a verification image.

use std::{sync::Arc, time::Instant};

use image::DynamicImage;
use ml_core::{
    DecodeSettings, Detection, EngineError, OutputError, PreprocessError, decode_predictions,
    predictions_from_output, prepare_image,
};
use thiserror::Error;
use tracing::{debug, debug_span, info_span};

use crate::monitor::{
    annotation::render_detections,
    engine::EngineSlot,
    inventory::{InventoryMonitor, StatusRecord},
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model is not loaded")]
    ModelUnready,
    #[error(transparent)]
    Decode(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] EngineError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("failed to encode annotated image: {0}")]
    Encode(String),
    #[error("pipeline task aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Short label used for the `outcome` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelUnready => "unready",
            Self::Decode(_) => "decode_error",
            Self::Inference(_) | Self::Output(_) | Self::Aborted(_) => "inference_error",
            Self::Encode(_) => "encode_error",
        }
    }
}

/// Successful `/predict` result.
#[derive(Debug, Clone)]
pub struct PredictOutcome {
    pub detections: Vec<Detection>,
    /// Wall time from upload bytes to decoded detections, two decimals.
    pub inference_time_ms: f64,
    pub record: StatusRecord,
}

impl PredictOutcome {
    pub fn package_count(&self) -> usize {
        self.detections.len()
    }
}

pub struct Pipeline {
    engine: Arc<EngineSlot>,
    inventory: Arc<InventoryMonitor>,
    settings: DecodeSettings,
    jpeg_quality: u8,
}

impl Pipeline {
    pub fn new(
        engine: Arc<EngineSlot>,
        inventory: Arc<InventoryMonitor>,
        settings: DecodeSettings,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            engine,
            inventory,
            settings,
            jpeg_quality,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    pub fn unready_reason(&self) -> Option<&str> {
        self.engine.unready_reason()
    }

    /// Count packages in an upload and feed the count to the inventory.
    pub fn count_packages(&self, upload: &[u8]) -> Result<PredictOutcome, PipelineError> {
        let span = info_span!("pipeline.predict", bytes = upload.len());
        let _guard = span.enter();

        let started = Instant::now();
        let (_, detections) = self.detect(upload)?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let record = self.inventory.update(detections.len());
        metrics::gauge!("inventory_package_count").set(detections.len() as f64);
        metrics::histogram!("inventory_pipeline_seconds", "endpoint" => "predict")
            .record(elapsed_ms / 1000.0);
        debug!(
            "counted {} package(s) in {elapsed_ms:.2} ms, status {:?}",
            detections.len(),
            record.status
        );

        Ok(PredictOutcome {
            detections,
            inference_time_ms: (elapsed_ms * 100.0).round() / 100.0,
            record,
        })
    }

    /// Render detections over the original upload. Leaves the inventory untouched.
    pub fn verify_image(&self, upload: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let span = info_span!("pipeline.verify", bytes = upload.len());
        let _guard = span.enter();

        let started = Instant::now();
        let (original, detections) = self.detect(upload)?;
        let jpeg = render_detections(&original, &detections, self.jpeg_quality)
            .map_err(|err| PipelineError::Encode(err.to_string()))?;
        metrics::histogram!("inventory_pipeline_seconds", "endpoint" => "verify_image")
            .record(started.elapsed().as_secs_f64());
        debug!(
            "rendered {} box(es) into {} byte JPEG",
            detections.len(),
            jpeg.len()
        );
        Ok(jpeg)
    }

    fn detect(&self, upload: &[u8]) -> Result<(DynamicImage, Vec<Detection>), PipelineError> {
        let engine = self.engine.shared().ok_or(PipelineError::ModelUnready)?;
        let prepared = prepare_image(upload, self.settings.input_size)?;

        let raw = {
            let _span = debug_span!("engine.infer", input = engine.input_name()).entered();
            let infer_started = Instant::now();
            let raw = engine.infer(prepared.tensor.view())?;
            metrics::histogram!("inventory_inference_seconds")
                .record(infer_started.elapsed().as_secs_f64());
            raw
        };

        let predictions = predictions_from_output(&raw)?;
        let detections = decode_predictions(&predictions, prepared.original_size(), &self.settings);
        Ok((prepared.original, detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::inventory::StockStatus;
    use image::{ImageFormat, RgbImage};
    use ml_core::{
        BoxXywh, InferenceEngine,
        ndarray::{Array3, ArrayD, ArrayView4},
    };
    use std::{
        io::Cursor,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    /// Returns fixed `[1, 5, N]` rows and flags any overlapping calls.
    struct ScriptedEngine {
        rows: Vec<[f32; 5]>,
        in_flight: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedEngine {
        fn new(rows: Vec<[f32; 5]>) -> Self {
            Self {
                rows,
                in_flight: Arc::new(AtomicBool::new(false)),
                overlapped: Arc::new(AtomicBool::new(false)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl InferenceEngine for ScriptedEngine {
        fn input_name(&self) -> &str {
            "images"
        }

        fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>, EngineError> {
            assert_eq!(input.shape(), &[1, 3, 320, 320]);
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(2));
            self.calls.fetch_add(1, Ordering::SeqCst);

            let n = self.rows.len();
            let mut output = Array3::<f32>::zeros((1, 5, n));
            for (i, row) in self.rows.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    output[[0, c, i]] = *value;
                }
            }
            self.in_flight.store(false, Ordering::SeqCst);
            Ok(output.into_dyn())
        }
    }

    /// Engines that misbehave in one specific way.
    enum Faulty {
        Fails,
        NarrowOutput,
        PanicsOnce(ScriptedEngine),
    }

    impl InferenceEngine for Faulty {
        fn input_name(&self) -> &str {
            "images"
        }

        fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>, EngineError> {
            match self {
                Self::Fails => Err(EngineError::Run("execution provider lost".to_string())),
                Self::NarrowOutput => Ok(Array3::<f32>::zeros((1, 4, 8)).into_dyn()),
                Self::PanicsOnce(inner) => {
                    if inner.calls.load(Ordering::SeqCst) == 0 {
                        inner.calls.fetch_add(1, Ordering::SeqCst);
                        panic!("kernel crashed");
                    }
                    inner.infer(input)
                }
            }
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    fn pipeline(engine: EngineSlot) -> (Pipeline, Arc<InventoryMonitor>) {
        let inventory = Arc::new(InventoryMonitor::new(2, 6));
        let pipeline = Pipeline::new(
            Arc::new(engine),
            Arc::clone(&inventory),
            DecodeSettings::default(),
            95,
        );
        (pipeline, inventory)
    }

    fn three_packages() -> Vec<[f32; 5]> {
        vec![
            [40.0, 40.0, 30.0, 30.0, 0.9],
            [160.0, 160.0, 30.0, 30.0, 0.8],
            [280.0, 280.0, 30.0, 30.0, 0.7],
            [41.0, 41.0, 30.0, 30.0, 0.6],
            [200.0, 60.0, 30.0, 30.0, 0.1],
        ]
    }

    #[test]
    fn unready_engine_is_rejected_before_decoding() {
        let (pipeline, inventory) = pipeline(EngineSlot::unready("no model"));
        let err = pipeline.count_packages(b"not even an image").unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnready));
        assert_eq!(err.kind(), "unready");
        assert!(inventory.snapshot().history.is_empty());
    }

    #[test]
    fn counts_packages_and_updates_inventory() {
        let (pipeline, inventory) = pipeline(EngineSlot::ready(ScriptedEngine::new(three_packages())));
        let outcome = pipeline.count_packages(&png(640, 480)).unwrap();

        assert_eq!(outcome.package_count(), 3);
        assert_eq!(outcome.record.status, StockStatus::Warning);
        assert!(outcome.inference_time_ms >= 0.0);
        assert_eq!(outcome.detections[0].bbox, BoxXywh::new(50, 37, 60, 45));

        let snapshot = inventory.snapshot();
        assert_eq!(snapshot.current_count, 3);
        assert_eq!(snapshot.history.len(), 1);
    }

    #[test]
    fn decode_failure_leaves_inventory_untouched() {
        let (pipeline, inventory) = pipeline(EngineSlot::ready(ScriptedEngine::new(three_packages())));
        let err = pipeline.count_packages(b"garbage").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(inventory.snapshot().status, StockStatus::Waiting);
    }

    #[test]
    fn no_confident_candidates_means_zero_packages() {
        let rows = vec![[100.0, 100.0, 20.0, 20.0, 0.05]];
        let (pipeline, _) = pipeline(EngineSlot::ready(ScriptedEngine::new(rows)));
        let outcome = pipeline.count_packages(&png(320, 320)).unwrap();
        assert_eq!(outcome.package_count(), 0);
        assert_eq!(outcome.record.status, StockStatus::Critical);
    }

    #[test]
    fn verification_does_not_touch_inventory() {
        let (pipeline, inventory) = pipeline(EngineSlot::ready(ScriptedEngine::new(three_packages())));
        let jpeg = pipeline.verify_image(&png(640, 480)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(inventory.snapshot().last_check, "Never");
    }

    #[test]
    fn concurrent_requests_serialize_engine_calls() {
        let engine = ScriptedEngine::new(three_packages());
        let overlapped = Arc::clone(&engine.overlapped);
        let calls = Arc::clone(&engine.calls);
        let (pipeline, inventory) = pipeline(EngineSlot::ready(engine));
        let upload = png(320, 320);

        thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| pipeline.count_packages(&upload).unwrap());
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(!overlapped.load(Ordering::SeqCst));

        let snapshot = inventory.snapshot();
        assert_eq!(snapshot.history.len(), 6);
        assert!(snapshot.history.iter().all(|entry| entry.count == 3));
    }

    #[test]
    fn engine_error_leaves_inventory_untouched() {
        let (pipeline, inventory) = pipeline(EngineSlot::ready(Faulty::Fails));
        let err = pipeline.count_packages(&png(64, 64)).unwrap_err();
        assert!(matches!(err, PipelineError::Inference(EngineError::Run(_))));
        assert_eq!(err.kind(), "inference_error");
        assert!(err.to_string().contains("execution provider lost"));

        let snapshot = inventory.snapshot();
        assert_eq!(snapshot.status, StockStatus::Waiting);
        assert!(snapshot.history.is_empty());
    }

    #[test]
    fn malformed_output_shape_is_an_inference_failure() {
        let (pipeline, inventory) = pipeline(EngineSlot::ready(Faulty::NarrowOutput));
        let err = pipeline.count_packages(&png(64, 64)).unwrap_err();
        assert!(matches!(err, PipelineError::Output(OutputError::TooFewChannels(4))));
        assert!(matches!(
            pipeline.verify_image(&png(64, 64)),
            Err(PipelineError::Output(_))
        ));
        assert_eq!(inventory.snapshot().last_check, "Never");
    }

    #[test]
    fn engine_panic_fails_only_that_request() {
        let engine = Faulty::PanicsOnce(ScriptedEngine::new(three_packages()));
        let (pipeline, inventory) = pipeline(EngineSlot::ready(engine));
        let upload = png(320, 320);

        let first = thread::scope(|scope| scope.spawn(|| pipeline.count_packages(&upload)).join());
        let err = first.expect("panic should be caught inside the engine slot").unwrap_err();
        assert!(err.to_string().contains("kernel crashed"));
        assert!(inventory.snapshot().history.is_empty());

        let outcome = pipeline.count_packages(&upload).unwrap();
        assert_eq!(outcome.package_count(), 3);
        assert_eq!(inventory.snapshot().history.len(), 1);
    }

    #[test]
    fn unready_reason_is_exposed() {
        let (unready, _) = pipeline(EngineSlot::unready("model file not found: m.onnx"));
        assert_eq!(unready.unready_reason(), Some("model file not found: m.onnx"));
        let (ready, _) = pipeline(EngineSlot::ready(Faulty::Fails));
        assert_eq!(ready.unready_reason(), None);
    }
}
