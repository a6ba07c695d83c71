//! Overlay rendering of a measurement onto its photograph.
//!
//! Purely a visual aid: the card outline in blue with a dot on every
//! corner, and the two trunk edges in red. Rendering never feeds back
//! into the measurement.

use image::{Rgba, RgbaImage};
use tiny_skia::{FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform};

use crate::types::{MeasurementResult, Point, RgbImage};

const CARD_COLOR: [u8; 3] = [40, 90, 255];
const TRUNK_COLOR: [u8; 3] = [230, 30, 30];

/// Minimum stroke width in pixels.
const MIN_LINE_WIDTH: f32 = 2.0;

/// Draw `result`'s polygons over `photo`.
///
/// Failed results produce an unmodified copy of the photograph.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn render_result(photo: &RgbImage, result: &MeasurementResult) -> RgbaImage {
    let (width, height) = photo.dimensions();
    let opaque: Vec<u8> = photo
        .pixels()
        .flat_map(|p| [p.0[0], p.0[1], p.0[2], 255])
        .collect();
    let Some(mut pixmap) = tiny_skia::IntSize::from_wh(width, height)
        .and_then(|size| Pixmap::from_vec(opaque, size))
    else {
        return RgbaImage::from_fn(width, height, |x, y| {
            let p = photo.get_pixel(x, y).0;
            Rgba([p[0], p[1], p[2], 255])
        });
    };

    let line_width = (width as f32 / 300.0).max(MIN_LINE_WIDTH);

    if let Some(card) = result.card_polygon {
        let points = card.points();
        let mut pb = PathBuilder::new();
        move_to(&mut pb, points[0]);
        for &p in &points[1..] {
            line_to(&mut pb, p);
        }
        pb.close();
        stroke(&mut pixmap, pb, CARD_COLOR, line_width);

        let paint = paint(CARD_COLOR);
        for p in points {
            if let Some(dot) = PathBuilder::from_circle(p.x as f32, p.y as f32, line_width * 2.0) {
                pixmap.fill_path(&dot, &paint, FillRule::Winding, Transform::identity(), None);
            }
        }
    }

    if let Some(trunk) = result.trunk_polygon {
        // Left-top, left-bottom, right-top, right-bottom.
        for pair in [[trunk[0], trunk[1]], [trunk[2], trunk[3]]] {
            let mut pb = PathBuilder::new();
            move_to(&mut pb, pair[0]);
            line_to(&mut pb, pair[1]);
            stroke(&mut pixmap, pb, TRUNK_COLOR, line_width);
        }
    }

    // Every pixel is opaque, so premultiplied data equals straight RGBA.
    RgbaImage::from_raw(width, height, pixmap.take()).unwrap_or_default()
}

#[allow(clippy::cast_possible_truncation)]
fn move_to(pb: &mut PathBuilder, p: Point) {
    pb.move_to(p.x as f32, p.y as f32);
}

#[allow(clippy::cast_possible_truncation)]
fn line_to(pb: &mut PathBuilder, p: Point) {
    pb.line_to(p.x as f32, p.y as f32);
}

fn paint(color: [u8; 3]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], 255);
    paint.anti_alias = true;
    paint
}

fn stroke(pixmap: &mut Pixmap, pb: PathBuilder, color: [u8; 3], width: f32) {
    let Some(path) = pb.finish() else {
        return;
    };
    let stroke = Stroke {
        width,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(&path, &paint(color), &stroke, Transform::identity(), None);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Quad, SearchRegion, Status};

    fn success() -> MeasurementResult {
        MeasurementResult {
            status: Status::Success,
            card_polygon: Some(Quad::new([
                Point::new(40.0, 60.0),
                Point::new(100.0, 60.0),
                Point::new(100.0, 100.0),
                Point::new(40.0, 100.0),
            ])),
            trunk_polygon: Some(Quad::new([
                Point::new(20.0, 0.0),
                Point::new(20.0, 59.0),
                Point::new(120.0, 0.0),
                Point::new(120.0, 59.0),
            ])),
            diameter_mm: Some(142.7),
            card_confidence: 1.0,
            search_region: Some(SearchRegion::Above),
            message: None,
        }
    }

    #[test]
    fn failed_result_leaves_photo_untouched() {
        let photo = RgbImage::from_pixel(50, 40, image::Rgb([10, 200, 30]));
        let failure = MeasurementResult::failure(&crate::MeasureError::NotFound("x".into()));
        let out = render_result(&photo, &failure);
        assert_eq!(out.dimensions(), (50, 40));
        assert!(out.pixels().all(|p| p.0 == [10, 200, 30, 255]));
    }

    #[test]
    fn overlay_marks_card_and_trunk() {
        let photo = RgbImage::from_pixel(160, 120, image::Rgb([0, 0, 0]));
        let out = render_result(&photo, &success());
        assert_eq!(out.dimensions(), (160, 120));
        // Card top edge midpoint is blue-ish, trunk edge is red-ish.
        let card = out.get_pixel(70, 60).0;
        assert!(card[2] > 150 && card[0] < 100, "{card:?}");
        let trunk = out.get_pixel(20, 30).0;
        assert!(trunk[0] > 150 && trunk[2] < 100, "{trunk:?}");
        // Far from any drawing stays black.
        assert_eq!(out.get_pixel(150, 110).0, [0, 0, 0, 255]);
    }

    #[test]
    fn empty_photo_renders_empty() {
        let photo = RgbImage::new(0, 0);
        assert_eq!(render_result(&photo, &success()).dimensions(), (0, 0));
    }
}
