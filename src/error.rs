use thiserror::Error;

/// Every failure mode the orchestrator can hit, partitioned the way the
/// retry/defer policy needs: transient (retry locally), capacity
/// (defer via the admission retry loop), permanent (fail now, no retry),
/// unexpected (log loudly, fail, clean up).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Coordination store unreachable or a single round-trip failed.
    #[error("coordination store error: {0}")]
    Store(String),

    /// GPU lock could not be acquired within the configured wait.
    #[error("gpu lock contention on gpu {gpu_index}")]
    LockContention { gpu_index: u32 },

    /// Model runtime client network/transport failure.
    #[error("model runtime request failed: {0}")]
    Runtime(#[from] reqwest::Error),

    /// Model runtime returned a response this crate couldn't parse.
    #[error("model runtime response parse error: {0}")]
    RuntimeParse(String),

    /// Planner could not find a feasible eviction set; admission deferred.
    #[error("insufficient vram for model {model} (need {needed} bytes, have {free} bytes free)")]
    InsufficientVram {
        model: String,
        needed: u64,
        free: u64,
    },

    /// A task exhausted its admission retry budget while capacity-starved.
    #[error("max retries exceeded for task {task_id}")]
    MaxRetriesExceeded { task_id: String },

    /// Model is larger than the GPU could ever hold, or unknown to the runtime.
    #[error("model {model} exceeds total vram ({size} > {total} bytes)")]
    ModelExceedsVram { model: String, size: u64, total: u64 },

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("vram telemetry unavailable for gpu {gpu_index}: {message}")]
    TelemetryUnavailable { gpu_index: u32, message: String },

    #[error("request malformed: {0}")]
    MalformedRequest(String),

    /// Catch-all for anything else — logged with full detail, sanitized on the wire.
    #[error("{0}")]
    Unexpected(String),
}

/// Coarse classification used to decide the retry/defer policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Capacity,
    Permanent,
    Unexpected,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(_)
            | Self::LockContention { .. }
            | Self::Runtime(_)
            | Self::TelemetryUnavailable { .. } => ErrorKind::Transient,
            Self::InsufficientVram { .. } | Self::MaxRetriesExceeded { .. } => {
                ErrorKind::Capacity
            }
            Self::ModelExceedsVram { .. } | Self::UnknownModel(_) | Self::MalformedRequest(_) => {
                ErrorKind::Permanent
            }
            Self::RuntimeParse(_) | Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Sanitized message safe to publish on a request's channel as
    /// `[ERROR: <message>]`. Never leaks store URLs, upstream bodies,
    /// or raw transport error detail.
    pub fn user_message(&self) -> String {
        match self {
            Self::Store(_) => "coordination store unavailable".to_string(),
            Self::LockContention { gpu_index } => {
                format!("gpu {gpu_index} busy, try again shortly")
            }
            Self::Runtime(_) => "model runtime request failed".to_string(),
            Self::RuntimeParse(_) => "model runtime returned an unexpected response".to_string(),
            Self::InsufficientVram { model, .. } => {
                format!("insufficient vram to load {model}")
            }
            Self::MaxRetriesExceeded { .. } => "max_retries_exceeded".to_string(),
            Self::ModelExceedsVram { model, size, total } => {
                format!("Model size {size} exceeds total VRAM {total} for {model}")
            }
            Self::UnknownModel(model) => format!("unknown model: {model}"),
            Self::TelemetryUnavailable { .. } => "gpu telemetry unavailable".to_string(),
            Self::MalformedRequest(msg) => format!("malformed request: {msg}"),
            Self::Unexpected(_) => "an unexpected error occurred".to_string(),
        }
    }
}
