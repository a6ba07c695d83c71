//! Gaussian smoothing.
//!
//! The card locator smooths luminance before keypoint detection, the
//! trunk locator smooths the color working image before seeding
//! GrabCut. Both go through [`imageproc::filter::gaussian_blur_f32`],
//! which rejects `sigma <= 0`; such sigmas mean "no smoothing" here.

use image::{GrayImage, Luma, Rgb};

use crate::types::RgbImage;

fn skip(sigma: f32, width: u32, height: u32) -> bool {
    sigma <= 0.0 || width == 0 || height == 0
}

/// Smooth a grayscale image.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if skip(sigma, image.width(), image.height()) {
        return image.clone();
    }
    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Smooth an RGB image, one channel plane at a time.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur_rgb(image: &RgbImage, sigma: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    if skip(sigma, width, height) {
        return image.clone();
    }

    let planes = [0, 1, 2].map(|channel| {
        let plane = GrayImage::from_fn(width, height, |x, y| Luma([image.get_pixel(x, y)[channel]]));
        imageproc::filter::gaussian_blur_f32(&plane, sigma)
    });
    RgbImage::from_fn(width, height, |x, y| {
        Rgb(planes.each_ref().map(|plane| plane.get_pixel(x, y)[0]))
    })
}
