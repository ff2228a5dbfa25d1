//! Tolerant parser for detection JSON payloads.
//!
//! The canonical producer emits `{"detections":[{"bbox":{"x_min":…}}],
//! "count":N}`, but hand-written payloads from side-channel tooling use
//! `"bbox":[x, y, w, h]` arrays or bare numeric tuples. The parser accepts
//! all three, converting corner boxes to `(x, y, w, h)` and keeping
//! coordinates in whatever scale the producer used.

use serde_json::Value;

use crate::error::StreamError;

#[derive(Clone, Debug, PartialEq)]
/// One parsed bounding box in producer-scale coordinates.
pub struct ParsedBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub score: Option<f64>,
    pub label: Option<String>,
}

/// Parse `input` into zero or more boxes.
pub fn parse_detections(input: &str) -> Result<Vec<ParsedBox>, StreamError> {
    let root: Value =
        serde_json::from_str(input).map_err(|err| StreamError::ParseFailed(err.to_string()))?;

    let mut boxes = Vec::new();
    collect_bbox_objects(&root, &mut boxes);
    if boxes.is_empty() {
        collect_numeric_tuples(&root, &mut boxes);
    }
    Ok(boxes)
}

/// Walk the document for objects carrying a `bbox` member.
fn collect_bbox_objects(value: &Value, out: &mut Vec<ParsedBox>) {
    match value {
        Value::Object(map) => {
            if let Some(bbox) = map.get("bbox") {
                let score = map.get("score").and_then(Value::as_f64);
                let label = map
                    .get("class")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(parsed) = parse_bbox_value(bbox, score, label) {
                    out.push(parsed);
                }
                return;
            }
            for member in map.values() {
                collect_bbox_objects(member, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_bbox_objects(item, out);
            }
        }
        _ => {}
    }
}

fn parse_bbox_value(bbox: &Value, score: Option<f64>, label: Option<String>) -> Option<ParsedBox> {
    match bbox {
        Value::Object(corners) => {
            let x_min = corners.get("x_min")?.as_f64()?;
            let y_min = corners.get("y_min")?.as_f64()?;
            let x_max = corners.get("x_max")?.as_f64()?;
            let y_max = corners.get("y_max")?.as_f64()?;
            build_box(x_min, y_min, x_max - x_min, y_max - y_min, score, label)
        }
        Value::Array(items) => {
            let values = numeric_tuple(items)?;
            let tuple_score = values.get(4).copied();
            build_box(
                values[0],
                values[1],
                values[2],
                values[3],
                score.or(tuple_score),
                label,
            )
        }
        _ => None,
    }
}

/// Last-resort scan: any four- or five-element numeric array, read as
/// `(x, y, w, h[, score])`.
fn collect_numeric_tuples(value: &Value, out: &mut Vec<ParsedBox>) {
    match value {
        Value::Array(items) => {
            if let Some(values) = numeric_tuple(items) {
                if let Some(parsed) = build_box(
                    values[0],
                    values[1],
                    values[2],
                    values[3],
                    values.get(4).copied(),
                    None,
                ) {
                    out.push(parsed);
                    return;
                }
            }
            for item in items {
                collect_numeric_tuples(item, out);
            }
        }
        Value::Object(map) => {
            for member in map.values() {
                collect_numeric_tuples(member, out);
            }
        }
        _ => {}
    }
}

fn numeric_tuple(items: &[Value]) -> Option<Vec<f64>> {
    if !(4..=5).contains(&items.len()) {
        return None;
    }
    items.iter().map(Value::as_f64).collect()
}

fn build_box(
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    score: Option<f64>,
    label: Option<String>,
) -> Option<ParsedBox> {
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    Some(ParsedBox {
        x,
        y,
        w,
        h,
        score,
        label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_corner_payload() {
        let json = r#"{"detections":[{"class":"car","class_id":2,"score":0.8125,
            "bbox":{"x_min":0.25,"y_min":0.5,"x_max":0.75,"y_max":0.9}}],"count":1}"#;
        let boxes = parse_detections(json).unwrap();
        assert_eq!(boxes.len(), 1);
        let parsed = &boxes[0];
        assert_eq!(parsed.x, 0.25);
        assert_eq!(parsed.y, 0.5);
        assert_eq!(parsed.w, 0.5);
        assert_eq!(parsed.h, 0.9 - 0.5);
        assert_eq!(parsed.score, Some(0.8125));
        assert_eq!(parsed.label.as_deref(), Some("car"));
    }

    #[test]
    fn array_bbox_with_tuple_score() {
        let json = r#"{"detections":[{"bbox":[0.1,0.2,0.3,0.4],"score":0.9,"class":"car"}]}"#;
        let boxes = parse_detections(json).unwrap();
        assert_eq!(boxes.len(), 1);
        let parsed = &boxes[0];
        assert_eq!(
            (parsed.x, parsed.y, parsed.w, parsed.h),
            (0.1, 0.2, 0.3, 0.4)
        );
        assert_eq!(parsed.score, Some(0.9));
        assert_eq!(parsed.label.as_deref(), Some("car"));
    }

    #[test]
    fn fifth_array_element_is_the_score() {
        let json = r#"{"detections":[{"bbox":[10.0,20.0,30.0,40.0,0.65]}]}"#;
        let boxes = parse_detections(json).unwrap();
        assert_eq!(boxes[0].score, Some(0.65));
        // Pixel-absolute coordinates are kept as-is.
        assert_eq!(boxes[0].w, 30.0);
    }

    #[test]
    fn bare_tuple_fallback() {
        let json = r#"{"objects":[[0.05,0.1,0.2,0.3,0.7],[0.4,0.4,0.1,0.1]]}"#;
        let boxes = parse_detections(json).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].score, Some(0.7));
        assert_eq!(boxes[1].score, None);
    }

    #[test]
    fn non_positive_extent_is_rejected() {
        let json = r#"{"detections":[
            {"bbox":{"x_min":0.5,"y_min":0.5,"x_max":0.5,"y_max":0.9}},
            {"bbox":[0.1,0.1,0.2,0.0]}
        ]}"#;
        assert!(parse_detections(json).unwrap().is_empty());
    }

    #[test]
    fn corner_boxes_round_trip() {
        // Parsing canonical output and rebuilding corners reproduces the
        // original values.
        let (x_min, y_min, x_max, y_max) = (0.1015625f64, 0.203125f64, 0.59375f64, 0.84375f64);
        let json = format!(
            r#"{{"detections":[{{"bbox":{{"x_min":{x_min},"y_min":{y_min},"x_max":{x_max},"y_max":{y_max}}}}}],"count":1}}"#
        );
        let boxes = parse_detections(&json).unwrap();
        let parsed = &boxes[0];
        assert_eq!(parsed.x + parsed.w, x_max);
        assert_eq!(parsed.y + parsed.h, y_max);
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(matches!(
            parse_detections("not json").unwrap_err(),
            StreamError::ParseFailed(_)
        ));
    }

    #[test]
    fn empty_detections_parse_to_nothing() {
        let boxes = parse_detections(r#"{"detections":[],"count":0}"#).unwrap();
        assert!(boxes.is_empty());
    }
}
