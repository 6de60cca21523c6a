use std::path::{Path, PathBuf};

use ndarray::{ArrayD, ArrayView4, IxDyn};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model file not found: {}", .0.display())]
    MissingModel(PathBuf),
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Run(String),
    #[error("unexpected engine output: {0}")]
    Output(String),
}

/// Tensor-in/tensor-out model handle.
///
/// Implementations are not assumed to tolerate concurrent calls; callers
/// serialize access to a shared engine.
pub trait InferenceEngine: Send {
    /// Name of the single input tensor the model expects.
    fn input_name(&self) -> &str;

    /// Runs the model on a `[1, 3, H, W]` tensor and returns its first output.
    fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>, EngineError>;
}

/// Threading knobs for the ONNX Runtime session.
///
/// The defaults pin execution to one thread with sequential operator
/// scheduling, trading throughput for predictable per-request latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub intra_threads: usize,
    pub inter_threads: usize,
    pub parallel_execution: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            intra_threads: 1,
            inter_threads: 1,
            parallel_execution: false,
        }
    }
}

/// ONNX Runtime backed detector running on the CPU execution provider.
pub struct OnnxEngine {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxEngine {
    /// Load an ONNX model from disk and prepare a CPU session.
    pub fn load<P: AsRef<Path>>(model_path: P, options: &EngineOptions) -> Result<Self, EngineError> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(EngineError::MissingModel(model_path.to_path_buf()));
        }

        info!("loading ONNX model from {}", model_path.display());
        let session = Session::builder()
            .map_err(|e| EngineError::Load(format!("session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngineError::Load(format!("optimization level: {e}")))?
            .with_intra_threads(options.intra_threads.max(1))
            .map_err(|e| EngineError::Load(format!("intra-op threads: {e}")))?
            .with_inter_threads(options.inter_threads.max(1))
            .map_err(|e| EngineError::Load(format!("inter-op threads: {e}")))?
            .with_parallel_execution(options.parallel_execution)
            .map_err(|e| EngineError::Load(format!("execution mode: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| EngineError::Load(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| EngineError::Load("model declares no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| EngineError::Load("model declares no outputs".to_string()))?;

        debug!(
            "model ready: input={input_name} output={output_name} intra={} inter={} parallel={}",
            options.intra_threads, options.inter_threads, options.parallel_execution
        );

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn input_name(&self) -> &str {
        &self.input_name
    }

    fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>, EngineError> {
        let input = input.as_standard_layout();
        let tensor = TensorRef::from_array_view(&input)
            .map_err(|e| EngineError::Run(format!("input tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![&self.input_name => tensor])
            .map_err(|e| EngineError::Run(e.to_string()))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| EngineError::Output(format!("missing output '{}'", self.output_name)))?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Output(e.to_string()))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| EngineError::Output(format!("shape {dims:?}: {e}")))
    }
}
