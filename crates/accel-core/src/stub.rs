//! Software fallback driver.
//!
//! Implements the device contract without hardware: detection graphs report
//! an empty post-NMS buffer and enhancement graphs echo their input. The
//! graph kind is inferred from the file stem, matching how the deployment
//! names its compiled graphs (`best.hef` vs `zero_dce_pp.hef`).

use std::{path::Path, sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    driver::{Bindings, ConfiguredGraph, InferenceGraph, TensorShape, VirtualDevice},
    error::AccelError,
    nms,
};

const DETECT_SHAPE: TensorShape = TensorShape {
    height: 640,
    width: 640,
    channels: 3,
};

const ENHANCE_SHAPE: TensorShape = TensorShape {
    height: 256,
    width: 256,
    channels: 3,
};

const STUB_CLASS_COUNT: usize = 4;
const MAX_BBOXES_PER_CLASS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GraphKind {
    Detect,
    Enhance,
}

pub struct StubDevice;

impl StubDevice {
    pub fn create() -> Result<Box<dyn VirtualDevice>, AccelError> {
        Ok(Box::new(StubDevice))
    }
}

impl VirtualDevice for StubDevice {
    fn load_graph(&self, path: &Path) -> Result<Box<dyn InferenceGraph>, AccelError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let kind = if ["dce", "lle", "lowlight", "enhance"]
            .iter()
            .any(|tag| stem.contains(tag))
        {
            GraphKind::Enhance
        } else {
            GraphKind::Detect
        };
        debug!(path = %path.display(), ?kind, "stub driver loading graph");
        Ok(Box::new(StubGraph { kind }))
    }
}

struct StubGraph {
    kind: GraphKind,
}

impl InferenceGraph for StubGraph {
    fn input_shape(&self) -> TensorShape {
        match self.kind {
            GraphKind::Detect => DETECT_SHAPE,
            GraphKind::Enhance => ENHANCE_SHAPE,
        }
    }

    fn output_sizes(&self) -> Vec<usize> {
        match self.kind {
            GraphKind::Detect => vec![nms::buffer_size(STUB_CLASS_COUNT, MAX_BBOXES_PER_CLASS)],
            GraphKind::Enhance => vec![ENHANCE_SHAPE.frame_size()],
        }
    }

    fn nms_class_count(&self) -> usize {
        STUB_CLASS_COUNT
    }

    fn configure(&self, _batch_size: u32) -> Result<Arc<dyn ConfiguredGraph>, AccelError> {
        Ok(Arc::new(StubConfigured {
            kind: self.kind,
            output_sizes: self.output_sizes(),
            input_size: self.input_shape().frame_size(),
        }))
    }
}

struct StubConfigured {
    kind: GraphKind,
    output_sizes: Vec<usize>,
    input_size: usize,
}

impl ConfiguredGraph for StubConfigured {
    fn create_bindings(&self) -> Result<Bindings, AccelError> {
        Ok(Bindings::new(self.input_size, &self.output_sizes))
    }

    fn run(&self, bindings: &mut Bindings, _deadline: Duration) -> Result<(), AccelError> {
        match self.kind {
            // Freshly created bindings are zeroed, which decodes as zero
            // detections per class; nothing to write.
            GraphKind::Detect => Ok(()),
            GraphKind::Enhance => {
                let input = bindings.input().to_vec();
                let output = bindings
                    .outputs_mut()
                    .first_mut()
                    .ok_or_else(|| AccelError::MalformedOutput("no output buffer".into()))?;
                if output.len() != input.len() {
                    return Err(AccelError::OutputShape {
                        expected: input.len(),
                    });
                }
                output.copy_from_slice(&input);
                Ok(())
            }
        }
    }
}
