//! Process-wide inference engine slot.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use ml_core::{
    EngineError, EngineOptions, InferenceEngine, OnnxEngine,
    ndarray::{ArrayD, ArrayView4},
};
use tracing::{error, info, warn};

/// Either a loaded engine or the reason loading failed.
pub enum EngineSlot {
    Unready { reason: String },
    Ready(SharedEngine),
}

impl EngineSlot {
    /// Load the model best-effort; failures leave the slot unready.
    pub fn load(model_path: &Path, options: &EngineOptions) -> Self {
        let slot = match OnnxEngine::load(model_path, options) {
            Ok(engine) => {
                info!("inference engine ready ({})", model_path.display());
                Self::ready(engine)
            }
            Err(err) => {
                warn!("model not loaded, inference endpoints will return 503: {err}");
                Self::unready(err.to_string())
            }
        };
        metrics::gauge!("inventory_engine_ready").set(if slot.is_ready() { 1.0 } else { 0.0 });
        slot
    }

    pub fn ready<E: InferenceEngine + 'static>(engine: E) -> Self {
        Self::Ready(SharedEngine::new(Box::new(engine)))
    }

    pub fn unready(reason: impl Into<String>) -> Self {
        Self::Unready {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Why loading failed, when the slot is unready.
    pub fn unready_reason(&self) -> Option<&str> {
        match self {
            Self::Unready { reason } => Some(reason),
            Self::Ready(_) => None,
        }
    }

    pub fn shared(&self) -> Option<&SharedEngine> {
        match self {
            Self::Ready(engine) => Some(engine),
            Self::Unready { .. } => None,
        }
    }
}

/// Engine behind a mutex so at most one `infer` runs at a time.
pub struct SharedEngine {
    engine: Mutex<Box<dyn InferenceEngine>>,
    input_name: String,
    invocations: AtomicU64,
}

impl SharedEngine {
    pub fn new(engine: Box<dyn InferenceEngine>) -> Self {
        let input_name = engine.input_name().to_string();
        Self {
            engine: Mutex::new(engine),
            input_name,
            invocations: AtomicU64::new(0),
        }
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Number of completed or attempted engine calls.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Run one inference under the engine lock.
    ///
    /// A panicking engine call fails only its own request: the panic is
    /// caught before the guard drops, and a lock poisoned elsewhere is reused.
    pub fn infer(&self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>, EngineError> {
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        self.invocations.fetch_add(1, Ordering::Relaxed);
        panic::catch_unwind(AssertUnwindSafe(|| engine.infer(input))).unwrap_or_else(|payload| {
            let reason = panic_message(&*payload);
            error!("inference engine panicked: {reason}");
            Err(EngineError::Run(format!("engine panicked: {reason}")))
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
