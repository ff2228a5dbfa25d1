use thiserror::Error;

#[derive(Debug, Error)]
/// Errors surfaced by the accelerator layer.
pub enum AccelError {
    #[error("virtual device creation failed: {0}")]
    DeviceInit(String),
    #[error("failed to load inference graph {path:?}: {reason}")]
    GraphLoad { path: String, reason: String },
    #[error("failed to configure inference graph {path:?}: {reason}")]
    Configure { path: String, reason: String },
    #[error("session manager used before init")]
    NotInitialized,
    #[error("inference did not complete within {0} ms")]
    InferenceTimeout(u64),
    #[error("inference failed: {0}")]
    InferenceError(String),
    #[error("no output buffer large enough for a {expected}-byte image")]
    OutputShape { expected: usize },
    #[error("input buffer size mismatch: got {got} bytes, expected {expected}")]
    InputSize { got: usize, expected: usize },
    #[error("malformed NMS output: {0}")]
    MalformedOutput(String),
}
