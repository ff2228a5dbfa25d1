//! Object-detection kernel.
//!
//! Preprocesses a frame to the model input, runs the configured graph
//! synchronously, decodes the post-NMS buffer, applies the process-wide
//! threshold, and emits either detection JSON or an annotated copy of the
//! resized frame.

use std::{sync::Arc, time::Duration};

use image::{imageops, RgbImage};
use serde::Serialize;
use tracing::debug;

use crate::{
    annotate,
    classes::ClassLabels,
    error::AccelError,
    nms::{self, NamedBbox},
    session::Session,
    threshold::DetectionThreshold,
};

/// Hard deadline for one synchronous inference.
pub const INFER_DEADLINE: Duration = Duration::from_millis(1000);

#[derive(Serialize)]
struct BboxJson {
    x_min: f32,
    y_min: f32,
    x_max: f32,
    y_max: f32,
}

#[derive(Serialize)]
struct DetectionJson<'a> {
    class: &'a str,
    class_id: u32,
    score: f32,
    bbox: BboxJson,
}

#[derive(Serialize)]
struct DetectionListJson<'a> {
    detections: Vec<DetectionJson<'a>>,
    count: usize,
}

/// Result of one detection pass.
pub struct InferenceOutput {
    pub json: String,
    /// Annotated copy of the model-sized frame, present when requested.
    pub annotated: Option<RgbImage>,
}

pub struct Detector {
    session: Arc<Session>,
    threshold: Arc<DetectionThreshold>,
    labels: ClassLabels,
}

impl Detector {
    pub fn new(
        session: Arc<Session>,
        threshold: Arc<DetectionThreshold>,
        labels: ClassLabels,
    ) -> Self {
        Self {
            session,
            threshold,
            labels,
        }
    }

    /// Run detection on `frame`.
    pub fn infer(
        &self,
        frame: &RgbImage,
        want_annotated_image: bool,
    ) -> Result<InferenceOutput, AccelError> {
        let shape = self.session.input_shape;
        // The JPEG decode already yields RGB, the order the model expects;
        // no channel swap is needed before copying.
        let resized = imageops::resize(
            frame,
            shape.width as u32,
            shape.height as u32,
            imageops::FilterType::Triangle,
        );

        let mut bindings = self.session.configured.create_bindings()?;
        bindings.set_input(resized.as_raw())?;
        self.session.configured.run(&mut bindings, INFER_DEADLINE)?;

        let output = bindings
            .output(0)
            .ok_or_else(|| AccelError::MalformedOutput("graph produced no outputs".into()))?;
        let class_count = self.session.graph.nms_class_count();
        let bboxes = nms::parse_nms(output, class_count)?;

        let threshold = self.threshold.get();
        let filtered: Vec<NamedBbox> = bboxes
            .iter()
            .copied()
            .filter(|bbox| bbox.score >= threshold)
            .collect();
        debug!(
            detected = bboxes.len(),
            kept = filtered.len(),
            threshold,
            "detection pass complete"
        );

        let json = self.serialize_detections(&filtered);
        let annotated = want_annotated_image.then(|| {
            let mut canvas = resized;
            annotate::draw_bounding_boxes(&mut canvas, &filtered, &self.labels);
            canvas
        });

        Ok(InferenceOutput { json, annotated })
    }

    fn serialize_detections(&self, bboxes: &[NamedBbox]) -> String {
        let payload = DetectionListJson {
            detections: bboxes
                .iter()
                .map(|bbox| DetectionJson {
                    class: self.labels.name(bbox.class_id),
                    class_id: bbox.class_id,
                    score: bbox.score,
                    bbox: BboxJson {
                        x_min: bbox.x_min,
                        y_min: bbox.y_min,
                        x_max: bbox.x_max,
                        y_max: bbox.y_max,
                    },
                })
                .collect(),
            count: bboxes.len(),
        };
        // Serialization over plain structs cannot fail.
        serde_json::to_string(&payload).expect("detection JSON serialization")
    }
}
