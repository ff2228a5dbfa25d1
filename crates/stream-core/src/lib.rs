//! Streaming RPC engine shared by the presenter and compute roles.
//!
//! - `client`: presenter-side stream client with thread-safe result queues.
//! - `service`: compute-side bi-directional stream handler.
//! - `server`: listener lifecycle with bounded-wait shutdown.
//! - `sidecar`: unary JSON submission and wake-up RPCs.
//! - `parse`: tolerant detection JSON parser.
//! - `net`: peer target resolution glue.

pub use client::{DetectionRecord, RemoteFrame, StreamClient};
pub use error::StreamError;
pub use server::{spawn_server, ServerHandle};
pub use service::{ComputeStreamService, ServiceConfig};

pub mod client;
mod error;
pub mod net;
pub mod parse;
pub mod server;
pub mod service;
pub mod sidecar;
