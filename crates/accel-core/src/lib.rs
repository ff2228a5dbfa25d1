//! Accelerator session management and the inference kernels built on it.
//!
//! The module split mirrors the runtime layering:
//! - `driver`: the opaque device contract (graphs, bindings, synchronous run).
//! - `stub`: software fallback driver used without accelerator hardware.
//! - `session`: the process-scoped session manager and graph cache.
//! - `detect`: object-detection kernel and detection JSON serialization.
//! - `enhance`: low-light enhancement kernel.
//! - `nms`: decoding of the post-NMS output buffer.
//! - `annotate`: drawing primitives for annotated replies.
//! - `threshold`: process-wide confidence threshold.

pub use driver::{Bindings, ConfiguredGraph, InferenceGraph, TensorShape, VirtualDevice};
pub use error::AccelError;
pub use session::{Session, SessionManager};
pub use threshold::DetectionThreshold;

pub mod annotate;
pub mod classes;
pub mod detect;
mod driver;
pub mod enhance;
mod error;
pub mod nms;
mod session;
pub mod stub;
mod threshold;
