//! Local image-sequence replay.
//!
//! `ImageSequenceStream` replays a directory of still frames (PNG/JPEG), sorted
//! by file name, at a fixed frame rate. The embedded position of frame `n` is
//! `n * 1000 / fps` milliseconds, which gives replayed recordings a timeline
//! independent of how fast the engine consumes them.
//!
//! Only local paths are accepted; nothing is fetched remotely.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use super::StreamHandle;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct ImageSequenceStream {
    dir: PathBuf,
    frames: Vec<PathBuf>,
    next_index: usize,
    fps: u32,
    released: bool,
}

impl ImageSequenceStream {
    pub fn open(dir: &Path, fps: u32) -> Result<Self> {
        if fps == 0 {
            return Err(anyhow!("image sequence replay requires fps > 0"));
        }
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to list frames in {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_frame_file(path))
            .collect();
        frames.sort();
        if frames.is_empty() {
            return Err(anyhow!("no frame images found in {}", dir.display()));
        }
        log::info!(
            "ImageSequenceStream: {} frames in {} at {} fps",
            frames.len(),
            dir.display(),
            fps
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            frames,
            next_index: 0,
            fps,
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl StreamHandle for ImageSequenceStream {
    fn grab(&mut self) -> Result<Option<RgbImage>> {
        if self.released {
            return Ok(None);
        }
        let Some(path) = self.frames.get(self.next_index) else {
            return Ok(None);
        };
        let image = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?
            .to_rgb8();
        self.next_index += 1;
        Ok(Some(image))
    }

    fn position_ms(&self) -> Option<f64> {
        if self.next_index == 0 {
            return None;
        }
        Some((self.next_index - 1) as f64 * 1000.0 / f64::from(self.fps))
    }

    fn is_opened(&self) -> bool {
        !self.released
    }

    fn release(&mut self) {
        log::debug!("ImageSequenceStream: released {}", self.dir.display());
        self.released = true;
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
