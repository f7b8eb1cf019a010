//! Frame container and pixel operations.
//!
//! - `Frame`: immutable RGB pixel buffer plus its capture timestamp.
//! - `Rect`: pixel rectangle used by the layout tables.
//! - Pixel helpers used by the capture layer (deinterlace, offset, resize)
//!   and by scene analysis (crop, grayscale, white mask, diff, HSV).
//!
//! All helpers operate on `image::RgbImage` / `image::GrayImage`. Nothing here
//! allocates a global buffer; every function works on the image it is handed.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};

use crate::TimestampMs;

/// Canonical output width delivered by the capture layer.
pub const CANONICAL_WIDTH: u32 = 1280;
/// Canonical output height delivered by the capture layer.
pub const CANONICAL_HEIGHT: u32 = 720;

/// Channel value at or above which a pixel counts as "bright".
pub const WHITE_VALUE_MIN: u8 = 230;
/// Maximum channel spread for a bright pixel to still count as white.
pub const WHITE_SPREAD_MAX: u8 = 32;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured frame.
///
/// Pixels are private and never mutated after construction; scenes receive
/// `&Frame` and crop what they need.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    timestamp_ms: TimestampMs,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp_ms: TimestampMs) -> Self {
        Self {
            image,
            timestamp_ms,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Capture timestamp in milliseconds.
    pub fn timestamp_ms(&self) -> TimestampMs {
        self.timestamp_ms
    }

    /// Copy of a sub-rectangle. Fails when the rectangle leaves the frame.
    pub fn region(&self, rect: Rect) -> Result<RgbImage> {
        crop(&self.image, rect)
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

// ----------------------------------------------------------------------------
// Rect
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Translate by a signed offset. Returns `None` if the result would start
    /// at a negative coordinate.
    pub fn shifted(&self, dx: i32, dy: i32) -> Option<Rect> {
        let x = i64::from(self.x) + i64::from(dx);
        let y = i64::from(self.y) + i64::from(dy);
        if x < 0 || y < 0 {
            return None;
        }
        Some(Rect::new(x as u32, y as u32, self.width, self.height))
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width && self.bottom() <= height
    }
}

// ----------------------------------------------------------------------------
// Pixel operations
// ----------------------------------------------------------------------------

pub fn crop(image: &RgbImage, rect: Rect) -> Result<RgbImage> {
    if !rect.fits_within(image.width(), image.height()) {
        return Err(anyhow!(
            "region {}x{}+{}+{} outside {}x{} image",
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            image.width(),
            image.height()
        ));
    }
    Ok(imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

pub fn crop_gray(image: &GrayImage, rect: Rect) -> Result<GrayImage> {
    if !rect.fits_within(image.width(), image.height()) {
        return Err(anyhow!(
            "region {}x{}+{}+{} outside {}x{} mask",
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            image.width(),
            image.height()
        ));
    }
    Ok(imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Replace every odd scanline with the even scanline above it.
pub fn deinterlace(image: &mut RgbImage) {
    let stride = image.width() as usize * 3;
    let height = image.height() as usize;
    let buf: &mut [u8] = image;
    for y in (1..height).step_by(2) {
        let src = (y - 1) * stride;
        buf.copy_within(src..src + stride, y * stride);
    }
}

/// Shift image content by `(dx, dy)`.
///
/// Destination pixel `(x, y)` receives source pixel `(x - dx, y - dy)` for the
/// overlapping rectangle. Pixels outside it keep their previous values; nothing
/// is zero-filled or wrapped.
pub fn apply_offset(image: &mut RgbImage, dx: i32, dy: i32) {
    if dx == 0 && dy == 0 {
        return;
    }
    let width = image.width() as i64;
    let height = image.height() as i64;
    let (ox, oy) = (i64::from(dx), i64::from(dy));
    if ox.abs() >= width || oy.abs() >= height {
        return;
    }

    let src_x = (-ox).max(0) as usize;
    let src_y = (-oy).max(0) as usize;
    let dst_x = ox.max(0) as usize;
    let dst_y = oy.max(0) as usize;
    let copy_w = (width - ox.abs()) as usize;
    let copy_h = (height - oy.abs()) as usize;

    let stride = width as usize * 3;
    let source = image.as_raw().clone();
    let buf: &mut [u8] = image;
    for row in 0..copy_h {
        let s = (src_y + row) * stride + src_x * 3;
        let d = (dst_y + row) * stride + dst_x * 3;
        buf[d..d + copy_w * 3].copy_from_slice(&source[s..s + copy_w * 3]);
    }
}

/// Bilinear resize. Returns the input unchanged when it already has the
/// requested size.
pub fn resize_to(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image;
    }
    imageops::resize(&image, width, height, FilterType::Triangle)
}

pub fn to_gray(image: &RgbImage) -> GrayImage {
    imageops::grayscale(image)
}

/// 255 where a pixel is bright and unsaturated, 0 elsewhere.
pub fn white_mask(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        if min >= WHITE_VALUE_MIN && max - min <= WHITE_SPREAD_MAX {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Binary threshold: 255 where the value is strictly above `threshold`.
pub fn threshold(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y).0[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Fraction of non-zero pixels in a mask, in `0.0..=1.0`.
pub fn coverage(mask: &GrayImage) -> f32 {
    let total = mask.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    let set = mask.as_raw().iter().filter(|&&v| v > 0).count();
    set as f32 / total as f32
}

/// Number of pixels whose absolute difference is at least `min_delta`.
///
/// Returns `None` when the images differ in size.
pub fn count_changed_pixels(a: &GrayImage, b: &GrayImage, min_delta: u8) -> Option<u32> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let changed = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .filter(|(&p, &q)| p.abs_diff(q) >= min_delta)
        .count();
    Some(changed as u32)
}

/// RGB to HSV in the 8-bit convention used by most vision toolkits:
/// hue in `0..180`, saturation and value in `0..=255`.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;
    let s = if v > 0.0 { delta * 255.0 / v } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / delta
    } else if v == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }
    [
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round().clamp(0.0, 255.0) as u8,
        v as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]))
    }

    #[test]
    fn offset_shifts_interior_and_keeps_border() {
        let source = gradient(16, 12);
        let mut shifted = source.clone();
        apply_offset(&mut shifted, 3, -2);

        for y in 0..12u32 {
            for x in 0..16u32 {
                let inside = x >= 3 && y < 10;
                let expected = if inside {
                    source.get_pixel(x - 3, y + 2)
                } else {
                    source.get_pixel(x, y)
                };
                assert_eq!(shifted.get_pixel(x, y), expected, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn offset_larger_than_frame_is_noop() {
        let source = gradient(4, 4);
        let mut shifted = source.clone();
        apply_offset(&mut shifted, 10, 0);
        assert_eq!(shifted, source);
    }

    #[test]
    fn deinterlace_copies_even_rows() {
        let mut image = gradient(5, 5);
        deinterlace(&mut image);
        for x in 0..5 {
            assert_eq!(image.get_pixel(x, 1), image.get_pixel(x, 0));
            assert_eq!(image.get_pixel(x, 3), image.get_pixel(x, 2));
        }
        assert_eq!(image.get_pixel(0, 4), &Rgb([0, 4, 4]));
    }

    #[test]
    fn crop_rejects_out_of_bounds() {
        let image = gradient(10, 10);
        assert!(crop(&image, Rect::new(5, 5, 6, 2)).is_err());
        let region = crop(&image, Rect::new(2, 3, 4, 4)).unwrap();
        assert_eq!(region.dimensions(), (4, 4));
        assert_eq!(region.get_pixel(0, 0), image.get_pixel(2, 3));
    }

    #[test]
    fn identical_masks_have_no_changed_pixels() {
        let image = gradient(8, 8);
        let mask = white_mask(&image);
        assert_eq!(count_changed_pixels(&mask, &mask.clone(), 32), Some(0));
        assert_eq!(count_changed_pixels(&mask, &GrayImage::new(4, 4), 32), None);
    }

    #[test]
    fn hsv_matches_reference_values() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([255, 255, 0]), [30, 255, 255]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
    }

    #[test]
    fn resize_to_canonical() {
        let image = gradient(64, 36);
        let resized = resize_to(image, 128, 72);
        assert_eq!(resized.dimensions(), (128, 72));
    }
}
