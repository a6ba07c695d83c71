//! Plane geometry helpers shared by the card and trunk locators.
//!
//! Everything here is a pure function of its arguments. Degenerate
//! inputs (zero-length lines, parallel lines) return `None` instead of
//! producing infinities.

use crate::types::{LabeledCorners, LineSegment, Point};

/// Determinants and squared lengths below this are treated as zero.
const DEGENERATE_EPSILON: f64 = 1e-9;

/// Euclidean distance between two points.
#[must_use]
pub fn points_distance(a: Point, b: Point) -> f64 {
    a.distance(b)
}

/// Perpendicular distance from `p` to the infinite line through
/// `start` and `end`.
///
/// Returns `None` when `start` and `end` coincide.
#[must_use]
pub fn distance_to_line(start: Point, end: Point, p: Point) -> Option<f64> {
    let direction = end - start;
    let length_squared = direction.norm_squared();
    if length_squared < DEGENERATE_EPSILON {
        return None;
    }
    // Foot of the perpendicular via projection onto the direction.
    let t = (p - start).dot(direction) / length_squared;
    let foot = start + direction * t;
    Some(p.distance(foot))
}

/// Signed angle at vertex `b` between the rays towards `a` and `c`,
/// in degrees.
///
/// Each ray's bearing is `atan2(dx, dy)` of the vector from the far
/// point to the vertex; the result is their difference and is not
/// normalized (it may lie anywhere in `(-360, 360)`).
#[must_use]
pub fn angle_between_3_points(a: Point, b: Point, c: Point) -> f64 {
    let to_a = b - a;
    let to_c = b - c;
    (to_c.x.atan2(to_c.y) - to_a.x.atan2(to_a.y)).to_degrees()
}

/// Intersection of the infinite lines through `(p1, p2)` and `(p3, p4)`.
///
/// Returns `None` when the lines are parallel or either is degenerate.
#[must_use]
pub fn line_intersection(first: (Point, Point), second: (Point, Point)) -> Option<Point> {
    let (p1, p2) = first;
    let (p3, p4) = second;
    let d1 = p1 - p2;
    let d2 = p3 - p4;
    let det = d1.cross(d2);
    if det.abs() < DEGENERATE_EPSILON {
        return None;
    }
    let a = p1.cross(p2);
    let b = p3.cross(p4);
    Some(Point::new(
        a.mul_add(d2.x, -(b * d1.x)) / det,
        a.mul_add(d2.y, -(b * d1.y)) / det,
    ))
}

/// Label four card corners by position.
///
/// Points are ranked by squared distance from the image origin: the
/// nearest becomes top-left, the farthest bottom-right, and the middle
/// two bottom-left and top-right in that order. If that leaves the
/// bottom-left corner to the right of the top-right one, the two are
/// swapped. Applying this to its own output yields the same labels.
#[must_use]
pub fn order_card_points(points: [Point; 4]) -> LabeledCorners {
    let mut sorted = points;
    sorted.sort_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()));
    let [top_left, mut bottom_left, mut top_right, bottom_right] = sorted;
    if bottom_left.x > top_right.x {
        std::mem::swap(&mut bottom_left, &mut top_right);
    }
    LabeledCorners {
        top_left,
        top_right,
        bottom_right,
        bottom_left,
    }
}

/// The x coordinate where the infinite line through `segment` crosses
/// row `y`.
///
/// Returns `None` for horizontal segments.
#[must_use]
pub fn x_at_y(segment: &LineSegment, y: f64) -> Option<f64> {
    let dy = segment.bottom.y - segment.top.y;
    if dy.abs() < DEGENERATE_EPSILON {
        return None;
    }
    let t = (y - segment.top.y) / dy;
    Some(t.mul_add(segment.bottom.x - segment.top.x, segment.top.x))
}
