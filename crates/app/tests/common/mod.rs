#![allow(dead_code)]

use std::{
    io::Cursor,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use image::{DynamicImage, ImageFormat, RgbImage};
use inventory_monitor::monitor::{
    engine::EngineSlot, inventory::InventoryMonitor, pipeline::Pipeline, server::AppState,
};
use ml_core::{
    DecodeSettings, EngineError, InferenceEngine,
    ndarray::{Array3, ArrayD, ArrayView4},
};

pub const BOUNDARY: &str = "----inventory-monitor-test";

/// Engine that replays the same `[1, 5, N]` output on every call.
pub struct MockEngine {
    rows: Vec<[f32; 5]>,
    calls: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new(rows: Vec<[f32; 5]>) -> Self {
        Self {
            rows,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl InferenceEngine for MockEngine {
    fn input_name(&self) -> &str {
        "images"
    }

    fn infer(&mut self, _input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut output = Array3::<f32>::zeros((1, 5, self.rows.len()));
        for (i, row) in self.rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                output[[0, c, i]] = *value;
            }
        }
        Ok(output.into_dyn())
    }
}

/// Engine whose every call fails the way a broken runtime would.
pub enum FailingEngine {
    /// The runtime rejects the run outright.
    Errors,
    /// The run succeeds but yields `[1, 4, N]`, one channel short.
    NarrowOutput,
}

impl InferenceEngine for FailingEngine {
    fn input_name(&self) -> &str {
        "images"
    }

    fn infer(&mut self, _input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>, EngineError> {
        match self {
            Self::Errors => Err(EngineError::Run("execution provider lost".into())),
            Self::NarrowOutput => Ok(Array3::<f32>::zeros((1, 4, 8)).into_dyn()),
        }
    }
}

pub fn failing_state(engine: FailingEngine) -> AppState {
    state_with(
        EngineSlot::ready(engine),
        PathBuf::from("static"),
        1024 * 1024,
    )
}

/// Three well-separated packages plus one duplicate and one low-score candidate.
pub fn shelf_rows() -> Vec<[f32; 5]> {
    vec![
        [40.0, 40.0, 30.0, 30.0, 0.9],
        [160.0, 160.0, 30.0, 30.0, 0.8],
        [280.0, 280.0, 30.0, 30.0, 0.7],
        [41.0, 41.0, 30.0, 30.0, 0.6],
        [200.0, 60.0, 30.0, 30.0, 0.1],
    ]
}

pub fn state_with(engine: EngineSlot, static_dir: PathBuf, max_upload_bytes: usize) -> AppState {
    let inventory = Arc::new(InventoryMonitor::new(2, 6));
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(engine),
        Arc::clone(&inventory),
        DecodeSettings::default(),
        95,
    ));
    AppState::new(pipeline, inventory, static_dir, max_upload_bytes)
}

pub fn ready_state() -> AppState {
    state_with(
        EngineSlot::ready(MockEngine::new(shelf_rows())),
        PathBuf::from("static"),
        1024 * 1024,
    )
}

pub fn unready_state() -> AppState {
    state_with(
        EngineSlot::unready("model file not found"),
        PathBuf::from("static"),
        1024 * 1024,
    )
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

/// Build a single-field `multipart/form-data` body and its content type.
pub fn multipart_body(field: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"shelf.png\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

/// Fresh, empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "inventory-monitor-{name}-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
