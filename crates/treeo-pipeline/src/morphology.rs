//! Binary morphology with rectangular structuring elements.
//!
//! Pixels are treated as binary with threshold `> 0`; outputs are `0`
//! or `255`. Rectangles are separable, so each operation is a row pass
//! followed by a column pass. Out-of-bounds neighbours are ignored,
//! which keeps foreground that touches the image border intact under
//! erosion.

use image::GrayImage;

/// A `width × height` rectangle anchored at its center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Horizontal extent in pixels.
    pub width: u32,
    /// Vertical extent in pixels.
    pub height: u32,
}

impl Rect {
    /// Create a rectangle; zero extents are raised to 1.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width: if width == 0 { 1 } else { width },
            height: if height == 0 { 1 } else { height },
        }
    }
}

/// Erode: a pixel stays set only if every in-bounds pixel under the
/// rectangle is set.
#[must_use = "returns the eroded mask"]
pub fn erode(mask: &GrayImage, element: Rect) -> GrayImage {
    apply(mask, element, true)
}

/// Dilate: a pixel becomes set if any in-bounds pixel under the
/// rectangle is set.
#[must_use = "returns the dilated mask"]
pub fn dilate(mask: &GrayImage, element: Rect) -> GrayImage {
    apply(mask, element, false)
}

/// Erosion followed by dilation; removes specks smaller than `element`.
#[must_use = "returns the opened mask"]
pub fn open(mask: &GrayImage, element: Rect) -> GrayImage {
    dilate(&erode(mask, element), element)
}

/// Dilation followed by erosion; fills holes smaller than `element`.
#[must_use = "returns the closed mask"]
pub fn close(mask: &GrayImage, element: Rect) -> GrayImage {
    erode(&dilate(mask, element), element)
}

fn apply(mask: &GrayImage, element: Rect, all: bool) -> GrayImage {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return mask.clone();
    }
    let set: Vec<bool> = mask.pixels().map(|p| p.0[0] > 0).collect();
    let (w, h) = (w as usize, h as usize);

    let rows = pass(&set, w, h, element.width as usize, all, true);
    let cols = pass(&rows, w, h, element.height as usize, all, false);

    let mut out = GrayImage::new(mask.width(), mask.height());
    for (pixel, &on) in out.pixels_mut().zip(&cols) {
        pixel.0[0] = if on { 255 } else { 0 };
    }
    out
}

/// One separable pass over rows (`horizontal`) or columns.
fn pass(
    set: &[bool],
    w: usize,
    h: usize,
    extent: usize,
    all: bool,
    horizontal: bool,
) -> Vec<bool> {
    let before = extent / 2;
    let after = extent - 1 - before;
    let (len, lines) = if horizontal { (w, h) } else { (h, w) };
    let index = |line: usize, i: usize| {
        if horizontal {
            line * w + i
        } else {
            i * w + line
        }
    };

    let mut out = vec![false; set.len()];
    for line in 0..lines {
        for i in 0..len {
            let lo = i.saturating_sub(before);
            let hi = (i + after).min(len - 1);
            let mut window = (lo..=hi).map(|j| set[index(line, j)]);
            out[index(line, i)] = if all {
                window.all(|v| v)
            } else {
                window.any(|v| v)
            };
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_set(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] > 0).count()
    }

    #[test]
    fn open_removes_single_pixel_speck() {
        let mut img = GrayImage::new(5, 5);
        img.put_pixel(2, 2, image::Luma([255]));
        let out = open(&img, Rect::new(3, 3));
        assert_eq!(count_set(&out), 0);
    }

    #[test]
    fn close_fills_single_pixel_hole() {
        let mut img = GrayImage::from_pixel(5, 5, image::Luma([255]));
        img.put_pixel(2, 2, image::Luma([0]));
        let out = close(&img, Rect::new(3, 3));
        assert_eq!(count_set(&out), 25);
    }

    #[test]
    fn tall_element_removes_short_horizontal_streak() {
        // A 1-pixel-tall streak cannot contain a 3x7 rectangle.
        let mut img = GrayImage::new(20, 20);
        for x in 2..18 {
            img.put_pixel(x, 10, image::Luma([255]));
        }
        assert_eq!(count_set(&open(&img, Rect::new(3, 7))), 0);
    }

    #[test]
    fn tall_element_keeps_vertical_stripe_touching_borders() {
        let img = GrayImage::from_fn(20, 30, |x, _| {
            if (5..12).contains(&x) {
                image::Luma([255])
            } else {
                image::Luma([0])
            }
        });
        let out = close(&open(&img, Rect::new(3, 7)), Rect::new(3, 7));
        assert_eq!(out, img);
    }

    #[test]
    fn erode_shrinks_and_dilate_grows() {
        let img = GrayImage::from_fn(11, 11, |x, y| {
            if (3..8).contains(&x) && (3..8).contains(&y) {
                image::Luma([255])
            } else {
                image::Luma([0])
            }
        });
        assert_eq!(count_set(&erode(&img, Rect::new(3, 3))), 9);
        assert_eq!(count_set(&dilate(&img, Rect::new(3, 3))), 49);
    }

    #[test]
    fn zero_extent_is_identity() {
        let mut img = GrayImage::new(4, 4);
        img.put_pixel(1, 1, image::Luma([255]));
        assert_eq!(erode(&img, Rect::new(0, 0)), img);
    }
}
