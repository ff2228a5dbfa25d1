//! Low-light enhancement kernel.
//!
//! Same preprocess as detection against the enhancement graph's own input
//! shape. The enhanced image is reconstructed from the first output buffer
//! large enough to hold it and resized back to the input frame's original
//! dimensions.

use std::sync::Arc;

use image::{imageops, RgbImage};
use tracing::debug;

use crate::{detect::INFER_DEADLINE, error::AccelError, session::Session};

pub struct Enhancer {
    session: Arc<Session>,
}

impl Enhancer {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Enhance `frame`, returning an image with the same dimensions.
    pub fn enhance(&self, frame: &RgbImage) -> Result<RgbImage, AccelError> {
        let shape = self.session.input_shape;
        let (model_w, model_h) = (shape.width as u32, shape.height as u32);
        // Frames arrive RGB from the JPEG decode and the reply is encoded
        // straight from RGB; no channel swaps on either side.
        let resized = imageops::resize(frame, model_w, model_h, imageops::FilterType::Triangle);

        let mut bindings = self.session.configured.create_bindings()?;
        bindings.set_input(resized.as_raw())?;
        self.session.configured.run(&mut bindings, INFER_DEADLINE)?;

        let expected_u8 = shape.height * shape.width * 3;
        let expected_f32 = expected_u8 * std::mem::size_of::<f32>();
        let output = bindings
            .outputs()
            .iter()
            .find(|buffer| buffer.len() >= expected_u8)
            .ok_or(AccelError::OutputShape {
                expected: expected_u8,
            })?;

        let pixels = if output.len() == expected_u8 {
            output.clone()
        } else if output.len() == expected_f32 {
            decode_f32_rgb(output)
        } else {
            debug!(
                len = output.len(),
                expected_u8, expected_f32, "unsupported enhancement output size"
            );
            return Err(AccelError::OutputShape {
                expected: expected_u8,
            });
        };

        let enhanced = RgbImage::from_raw(model_w, model_h, pixels).ok_or(
            AccelError::OutputShape {
                expected: expected_u8,
            },
        )?;
        Ok(imageops::resize(
            &enhanced,
            frame.width(),
            frame.height(),
            imageops::FilterType::Triangle,
        ))
    }
}

/// Scale float32 RGB in [0, 1] to 8-bit with clamping.
fn decode_f32_rgb(buffer: &[u8]) -> Vec<u8> {
    buffer
        .chunks_exact(4)
        .map(|chunk| {
            let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            (value * 255.0).clamp(0.0, 255.0) as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use super::*;
    use crate::{
        driver::{Bindings, ConfiguredGraph, InferenceGraph, TensorShape, VirtualDevice},
        session::SessionManager,
        stub::StubDevice,
    };

    const TEST_SHAPE: TensorShape = TensorShape {
        height: 32,
        width: 32,
        channels: 3,
    };

    /// Device whose graph writes a fixed output buffer of arbitrary size.
    struct FixedOutputDevice {
        output: Vec<u8>,
    }

    impl VirtualDevice for FixedOutputDevice {
        fn load_graph(&self, _path: &Path) -> Result<Box<dyn InferenceGraph>, AccelError> {
            Ok(Box::new(FixedOutputGraph {
                output: self.output.clone(),
            }))
        }
    }

    struct FixedOutputGraph {
        output: Vec<u8>,
    }

    impl InferenceGraph for FixedOutputGraph {
        fn input_shape(&self) -> TensorShape {
            TEST_SHAPE
        }

        fn output_sizes(&self) -> Vec<usize> {
            vec![self.output.len()]
        }

        fn nms_class_count(&self) -> usize {
            0
        }

        fn configure(&self, _batch_size: u32) -> Result<Arc<dyn ConfiguredGraph>, AccelError> {
            Ok(Arc::new(FixedOutputConfigured {
                output: self.output.clone(),
                input_size: TEST_SHAPE.frame_size(),
            }))
        }
    }

    struct FixedOutputConfigured {
        output: Vec<u8>,
        input_size: usize,
    }

    impl ConfiguredGraph for FixedOutputConfigured {
        fn create_bindings(&self) -> Result<Bindings, AccelError> {
            Ok(Bindings::new(self.input_size, &[self.output.len()]))
        }

        fn run(&self, bindings: &mut Bindings, _deadline: Duration) -> Result<(), AccelError> {
            bindings.outputs_mut()[0].copy_from_slice(&self.output);
            Ok(())
        }
    }

    fn enhancer_with_output(output: Vec<u8>) -> Enhancer {
        let manager = SessionManager::new();
        manager
            .init(Path::new("lle.hef"), move || {
                Ok(Box::new(FixedOutputDevice { output }) as Box<dyn VirtualDevice>)
            })
            .unwrap();
        Enhancer::new(manager.default_session().unwrap())
    }

    #[test]
    fn round_trip_preserves_input_dimensions() {
        let manager = SessionManager::new();
        manager
            .init(Path::new("zero_dce_pp.hef"), StubDevice::create)
            .unwrap();
        let enhancer = Enhancer::new(manager.default_session().unwrap());

        let frame = RgbImage::from_pixel(320, 240, image::Rgb([40, 40, 40]));
        let enhanced = enhancer.enhance(&frame).unwrap();
        assert_eq!(enhanced.dimensions(), (320, 240));
    }

    #[test]
    fn f32_output_is_scaled_and_clamped() {
        let expected = TEST_SHAPE.frame_size();
        let mut output = Vec::with_capacity(expected * 4);
        for i in 0..expected {
            let value = match i % 3 {
                0 => 0.5f32,
                1 => 1.5f32,  // clamps to 255
                _ => -0.1f32, // clamps to 0
            };
            output.extend_from_slice(&value.to_le_bytes());
        }
        let enhancer = enhancer_with_output(output);

        let frame = RgbImage::new(32, 32);
        let enhanced = enhancer.enhance(&frame).unwrap();
        let pixel = enhanced.get_pixel(0, 0);
        assert_eq!(pixel[0], 127);
        assert_eq!(pixel[1], 255);
        assert_eq!(pixel[2], 0);
    }

    #[test]
    fn undersized_output_is_rejected() {
        let enhancer = enhancer_with_output(vec![0u8; TEST_SHAPE.frame_size() / 2]);
        let frame = RgbImage::new(32, 32);
        assert!(matches!(
            enhancer.enhance(&frame).unwrap_err(),
            AccelError::OutputShape { .. }
        ));
    }
}
