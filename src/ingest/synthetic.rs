//! Synthetic `stub://` stream.
//!
//! Alternates between a moving test pattern and a still result-like screen
//! (white text blocks on a dark background, the coarse screen region lit)
//! every `SCENE_PERIOD` frames, with an optional sprinkle of random pixels to
//! imitate capture noise. Replay positions advance by one frame period per
//! grab.

use anyhow::Result;
use image::{Rgb, RgbImage};
use rand::Rng;

use super::{StreamHandle, Timing, DEFAULT_REPLAY_FPS};
use crate::frame::{Rect, CANONICAL_HEIGHT, CANONICAL_WIDTH};
use crate::scene::ResultLayout;

/// Frames between synthetic scene changes.
pub const SCENE_PERIOD: u64 = 50;

const BACKGROUND: Rgb<u8> = Rgb([20, 12, 40]);
const TEXT: Rgb<u8> = Rgb([250, 250, 250]);

pub struct SyntheticStream {
    name: String,
    timing: Timing,
    fps: u32,
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
    noise_pixels: u32,
    released: bool,
}

impl SyntheticStream {
    pub fn new(name: &str, timing: Timing, fps: u32) -> Self {
        Self {
            name: name.to_string(),
            timing,
            fps: if fps == 0 { DEFAULT_REPLAY_FPS } else { fps },
            width: CANONICAL_WIDTH,
            height: CANONICAL_HEIGHT,
            frame_count: 0,
            scene_state: 0,
            noise_pixels: 0,
            released: false,
        }
    }

    /// Flip this many random pixels per frame.
    pub fn with_noise(mut self, pixels: u32) -> Self {
        self.noise_pixels = pixels;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the frame about to be generated shows the result screen.
    pub fn showing_result(&self) -> bool {
        (self.frame_count / SCENE_PERIOD) % 2 == 1
    }

    /// Scale a canonical-resolution rectangle to the stream resolution.
    fn scaled(&self, rect: Rect) -> Rect {
        let scale = |v: u32, size: u32, canonical: u32| {
            (u64::from(v) * u64::from(size) / u64::from(canonical)) as u32
        };
        let sx = |v: u32| scale(v, self.width, CANONICAL_WIDTH);
        let sy = |v: u32| scale(v, self.height, CANONICAL_HEIGHT);
        Rect::new(
            sx(rect.x),
            sy(rect.y),
            sx(rect.width).max(1),
            sy(rect.height).max(1),
        )
    }

    fn fill(&self, image: &mut RgbImage, rect: Rect) {
        let rect = self.scaled(rect);
        for y in rect.y..rect.bottom().min(self.height) {
            for x in rect.x..rect.right().min(self.width) {
                image.put_pixel(x, y, TEXT);
            }
        }
    }

    fn result_screen(&self) -> RgbImage {
        let layout = ResultLayout::default();
        let mut image = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        self.fill(&mut image, layout.screen);
        for index in 0..layout.entry_count() {
            if let Some(entry) = layout.entry_rect(index) {
                let score = layout.score.rect(false);
                self.fill(
                    &mut image,
                    Rect::new(entry.x + score.x, entry.y + 10, score.width, 20),
                );
            }
        }
        image
    }

    fn generate(&mut self) -> RgbImage {
        if self.frame_count > 0 && self.frame_count % SCENE_PERIOD == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut image = if self.showing_result() {
            self.result_screen()
        } else {
            let shift = self.frame_count + u64::from(self.scene_state) * 64;
            RgbImage::from_fn(self.width, self.height, |x, y| {
                let v = (u64::from(x) + u64::from(y) + shift) % 256;
                Rgb([v as u8, (v as u8).wrapping_mul(3), self.scene_state])
            })
        };

        if self.noise_pixels > 0 {
            let mut rng = rand::thread_rng();
            for _ in 0..self.noise_pixels {
                let x = rng.gen_range(0..self.width);
                let y = rng.gen_range(0..self.height);
                image.put_pixel(x, y, Rgb(rng.gen::<[u8; 3]>()));
            }
        }
        image
    }
}

impl StreamHandle for SyntheticStream {
    fn grab(&mut self) -> Result<Option<RgbImage>> {
        if self.released {
            return Ok(None);
        }
        let image = self.generate();
        self.frame_count += 1;
        Ok(Some(image))
    }

    fn position_ms(&self) -> Option<f64> {
        match self.timing {
            Timing::Replay if self.frame_count > 0 => {
                Some((self.frame_count - 1) as f64 * 1000.0 / f64::from(self.fps))
            }
            _ => None,
        }
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn is_opened(&self) -> bool {
        !self.released
    }

    fn release(&mut self) {
        log::debug!("SyntheticStream: released {}", self.name);
        self.released = true;
    }
}
