//! HSV conversion and color-range masks.
//!
//! Uses the common 8-bit HSV convention: hue is halved to fit `0..180`,
//! saturation and value span `0..=255`. Foliage and grass fall roughly
//! in hue 38..=95 under this convention.

use image::{GrayImage, Rgb};
use serde::{Deserialize, Serialize};

use crate::types::RgbImage;

/// An 8-bit HSV triple `[h, s, v]` with `h` in `0..180`.
pub type Hsv = [u8; 3];

/// Inclusive per-channel HSV bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    /// Lower bound, inclusive.
    pub lower: Hsv,
    /// Upper bound, inclusive.
    pub upper: Hsv,
}

impl HsvRange {
    /// Saturated, reasonably bright greens.
    pub const VEGETATION: Self = Self {
        lower: [38, 55, 55],
        upper: [95, 255, 255],
    };

    /// Whether every channel of `hsv` lies within the bounds.
    #[must_use]
    pub fn contains(&self, hsv: Hsv) -> bool {
        (0..3).all(|c| self.lower[c] <= hsv[c] && hsv[c] <= self.upper[c])
    }
}

impl Default for HsvRange {
    fn default() -> Self {
        Self::VEGETATION
    }
}

/// Convert one RGB pixel to 8-bit HSV.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rgb_to_hsv(pixel: Rgb<u8>) -> Hsv {
    let [r, g, b] = pixel.0.map(f64::from);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v > 0.0 { diff * 255.0 / v } else { 0.0 };

    let h = if diff <= 0.0 {
        0.0
    } else if (v - r).abs() < f64::EPSILON {
        60.0 * (g - b) / diff
    } else if (v - g).abs() < f64::EPSILON {
        60.0f64.mul_add((b - r) / diff, 120.0)
    } else {
        60.0f64.mul_add((r - g) / diff, 240.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };
    // 360° maps onto the 180-step scale and wraps back to 0.
    let h = (h / 2.0).round() as u32 % 180;

    [h as u8, s.round() as u8, v as u8]
}

/// Binary mask (0/255) of pixels whose HSV value lies in `range`.
#[must_use = "returns the color mask"]
pub fn in_range(image: &RgbImage, range: &HsvRange) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let hsv = rgb_to_hsv(*image.get_pixel(x, y));
        image::Luma([if range.contains(hsv) { 255 } else { 0 }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_hues() {
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 255, 0])), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 255])), [120, 255, 255]);
    }

    #[test]
    fn gray_has_no_hue_or_saturation() {
        assert_eq!(rgb_to_hsv(Rgb([128, 128, 128])), [0, 0, 128]);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 0])), [0, 0, 0]);
    }

    #[test]
    fn magenta_side_hue_wraps_correctly() {
        // Hue 300° -> 150 on the halved scale.
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 255]))[0], 150);
    }

    #[test]
    fn grass_green_is_vegetation() {
        let hsv = rgb_to_hsv(Rgb([40, 140, 40]));
        assert!(HsvRange::VEGETATION.contains(hsv), "{hsv:?}");
    }

    #[test]
    fn bark_brown_is_not_vegetation() {
        let hsv = rgb_to_hsv(Rgb([110, 75, 45]));
        assert!(!HsvRange::VEGETATION.contains(hsv), "{hsv:?}");
    }

    #[test]
    fn dark_green_fails_value_bound() {
        let hsv = rgb_to_hsv(Rgb([10, 40, 10]));
        assert!(!HsvRange::VEGETATION.contains(hsv), "{hsv:?}");
    }

    #[test]
    fn in_range_marks_matching_pixels() {
        let img = RgbImage::from_fn(4, 1, |x, _| {
            if x < 2 {
                Rgb([40, 140, 40])
            } else {
                Rgb([110, 75, 45])
            }
        });
        let mask = in_range(&img, &HsvRange::default());
        let values: Vec<u8> = mask.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![255, 255, 0, 0]);
    }
}
