//! Opaque accelerator contract.
//!
//! The physical driver is out of scope; everything above it talks to these
//! three traits and the concrete [`Bindings`] buffer set. The only call
//! pattern the runtime uses is `create_bindings` followed by a synchronous
//! `run`, which the underlying driver must support from concurrent threads.

use std::{path::Path, sync::Arc, time::Duration};

use crate::error::AccelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Input tensor shape of an inference graph.
pub struct TensorShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TensorShape {
    /// Byte size of one input frame at this shape.
    pub fn frame_size(&self) -> usize {
        self.height * self.width * self.channels
    }
}

/// A handle to the single physical accelerator. Creating two of these for
/// the same hardware races destructively; the session manager owns exactly
/// one for the process lifetime.
pub trait VirtualDevice: Send + Sync {
    fn load_graph(&self, path: &Path) -> Result<Box<dyn InferenceGraph>, AccelError>;
}

/// A parsed inference graph prior to resource reservation.
pub trait InferenceGraph: Send + Sync {
    fn input_shape(&self) -> TensorShape;
    /// Byte sizes of every output buffer, in output order.
    fn output_sizes(&self) -> Vec<usize>;
    /// Number of NMS classes reported by the graph metadata.
    fn nms_class_count(&self) -> usize;
    fn configure(&self, batch_size: u32) -> Result<Arc<dyn ConfiguredGraph>, AccelError>;
}

/// A graph with execution resources reserved at a fixed batch size.
pub trait ConfiguredGraph: Send + Sync {
    fn create_bindings(&self) -> Result<Bindings, AccelError>;
    /// Run synchronously; must return within `deadline`.
    fn run(&self, bindings: &mut Bindings, deadline: Duration) -> Result<(), AccelError>;
}

/// Per-invocation buffer set attaching one input and all outputs to a run.
pub struct Bindings {
    input: Vec<u8>,
    outputs: Vec<Vec<u8>>,
}

impl Bindings {
    pub fn new(input_size: usize, output_sizes: &[usize]) -> Self {
        Self {
            input: vec![0u8; input_size],
            outputs: output_sizes.iter().map(|&size| vec![0u8; size]).collect(),
        }
    }

    pub fn set_input(&mut self, data: &[u8]) -> Result<(), AccelError> {
        if data.len() != self.input.len() {
            return Err(AccelError::InputSize {
                got: data.len(),
                expected: self.input.len(),
            });
        }
        self.input.copy_from_slice(data);
        Ok(())
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn output(&self, index: usize) -> Option<&[u8]> {
        self.outputs.get(index).map(Vec::as_slice)
    }

    pub fn outputs(&self) -> &[Vec<u8>] {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.outputs
    }
}
