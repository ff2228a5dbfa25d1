//! Decoding of the accelerator's post-NMS output buffer.
//!
//! The buffer is a flat sequence of per-class groups: a float32 detection
//! count for class id `c`, then that many `(x_min, y_min, x_max, y_max,
//! score)` float32 records in normalized coordinates. Records are tagged
//! with class id `c + 1`; class zero is reserved as background.

use crate::error::AccelError;

const F32_SIZE: usize = std::mem::size_of::<f32>();
const RECORD_FLOATS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
/// One decoded detection in normalized coordinates.
pub struct NamedBbox {
    pub class_id: u32,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub score: f32,
}

/// Byte size of an NMS buffer with `class_count` groups of at most
/// `max_per_class` records each.
pub fn buffer_size(class_count: usize, max_per_class: usize) -> usize {
    class_count * (F32_SIZE + max_per_class * RECORD_FLOATS * F32_SIZE)
}

/// Decode `class_count` NMS groups from `data`.
pub fn parse_nms(data: &[u8], class_count: usize) -> Result<Vec<NamedBbox>, AccelError> {
    let mut bboxes = Vec::new();
    let mut offset = 0usize;

    for class_index in 0..class_count {
        let count = read_f32(data, &mut offset).ok_or_else(|| {
            AccelError::MalformedOutput(format!(
                "truncated count for class {class_index} at offset {offset}"
            ))
        })? as u32;

        for _ in 0..count {
            let mut record = [0f32; RECORD_FLOATS];
            for slot in record.iter_mut() {
                *slot = read_f32(data, &mut offset).ok_or_else(|| {
                    AccelError::MalformedOutput(format!(
                        "truncated record for class {class_index} at offset {offset}"
                    ))
                })?;
            }
            bboxes.push(NamedBbox {
                class_id: class_index as u32 + 1,
                x_min: record[0],
                y_min: record[1],
                x_max: record[2],
                y_max: record[3],
                score: record[4],
            });
        }
    }

    Ok(bboxes)
}

fn read_f32(data: &[u8], offset: &mut usize) -> Option<f32> {
    let bytes = data.get(*offset..*offset + F32_SIZE)?;
    *offset += F32_SIZE;
    Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
pub(crate) fn encode_nms(groups: &[Vec<[f32; RECORD_FLOATS]>]) -> Vec<u8> {
    let mut out = Vec::new();
    for group in groups {
        out.extend_from_slice(&(group.len() as f32).to_le_bytes());
        for record in group {
            for value in record {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    out
}
