//! Canny edge detection on the trunk segmentation mask.
//!
//! Wraps [`imageproc::edges::canny`]. Returns a binary image where
//! white pixels (255) are edges and black pixels (0) are background.

use image::GrayImage;

/// Minimum allowed Canny threshold.
///
/// A low threshold of zero lets every pixel with any gradient seed
/// hysteresis, flooding the Hough accumulator with noise.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Detect edges using the Canny algorithm.
///
/// Returns a binary image: 255 for edge pixels, 0 for non-edge.
///
/// Both thresholds are clamped to a minimum of [`MIN_THRESHOLD`] and
/// `low_threshold` is clamped to be at most `high_threshold`.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let high = high_threshold.max(MIN_THRESHOLD);
    let low = low_threshold.max(MIN_THRESHOLD).min(high);
    imageproc::edges::canny(image, low, high)
}

/// Number of edge pixels (value 255) in a binary map.
#[must_use]
pub fn count_edge_pixels(edges: &GrayImage) -> u64 {
    edges
        .pixels()
        .map(|p| u64::from(u8::from(p.0[0] == 255)))
        .sum()
}
