//! Image decoding and grayscale conversion.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the RGB
//! photograph the locators work on. The card locator works on luminance
//! only and converts with [`to_gray`].

use image::GrayImage;

use crate::types::{MeasureError, RgbImage};

/// Decode raw image bytes into an 8-bit RGB image.
///
/// Any alpha channel is dropped.
///
/// # Errors
///
/// Returns [`MeasureError::EmptyInput`] if `bytes` is empty.
/// Returns [`MeasureError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, MeasureError> {
    if bytes.is_empty() {
        return Err(MeasureError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Convert an RGB image to luminance.
///
/// Uses the `image` crate's weighted luminance (green weighs most).
#[must_use = "returns the grayscale image"]
pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}
