use thiserror::Error;

#[derive(Debug, Error)]
/// Errors surfaced by the streaming engine.
pub enum StreamError {
    #[error("channel to {target} failed to become READY within {timeout_secs}s")]
    ChannelUnready { target: String, timeout_secs: u64 },
    #[error("stream write failed; peer closed")]
    WriteClosed,
    #[error("stream read failed: {0}")]
    ReadClosed(String),
    #[error("frame decode failed: {0}")]
    DecodeFailed(String),
    #[error("detection JSON parse failed: {0}")]
    ParseFailed(String),
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("shutdown already in progress")]
    ShutdownInProgress,
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}
