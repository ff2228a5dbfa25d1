//! Presenter frame source.
//!
//! Video demultiplexing is an external concern; the presenter reads either
//! a directory of still images (looped) or falls back to synthetic frames so
//! the streaming path can be exercised without a camera.

use std::path::PathBuf;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use tracing::{debug, warn};

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 640;

pub enum FrameSource {
    Directory { files: Vec<PathBuf>, index: usize },
    Synthetic { tick: u64 },
}

impl FrameSource {
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            debug!("no video path; using synthetic frames");
            return Ok(Self::Synthetic { tick: 0 });
        };

        if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&path)
                .with_context(|| format!("reading frame directory {}", path.display()))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("jpg") | Some("jpeg") | Some("png")
                    )
                })
                .collect();
            files.sort();
            if files.is_empty() {
                warn!(path = %path.display(), "no images in frame directory; using synthetic frames");
                return Ok(Self::Synthetic { tick: 0 });
            }
            return Ok(Self::Directory { files, index: 0 });
        }

        warn!(
            path = %path.display(),
            "video demux is handled externally; using synthetic frames"
        );
        Ok(Self::Synthetic { tick: 0 })
    }

    /// Produce the next frame, looping directory sources.
    pub fn next_frame(&mut self) -> RgbImage {
        match self {
            Self::Directory { files, index } => {
                let start = *index;
                loop {
                    let path = &files[*index];
                    *index = (*index + 1) % files.len();
                    match image::open(path) {
                        Ok(decoded) => return decoded.to_rgb8(),
                        Err(err) => {
                            warn!(path = %path.display(), %err, "skipping undecodable frame");
                            if *index == start {
                                return synthetic_frame(0);
                            }
                        }
                    }
                }
            }
            Self::Synthetic { tick } => {
                *tick += 1;
                synthetic_frame(*tick)
            }
        }
    }
}

fn synthetic_frame(tick: u64) -> RgbImage {
    let shift = (tick % 256) as u8;
    RgbImage::from_fn(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, |x, y| {
        Rgb([
            (x % 256) as u8 ^ shift,
            (y % 256) as u8,
            shift,
        ])
    })
}
