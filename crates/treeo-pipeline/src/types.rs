//! Shared types for the treeo measurement pipeline.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::card::CardLocatorConfig;
use crate::grabcut::GrabCutError;
use crate::trunk::TrunkLocatorConfig;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can pass photographs
/// without depending on `image` directly.
pub use image::RgbImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Squared distance from the origin.
    #[must_use]
    pub fn norm_squared(self) -> f64 {
        self.x.mul_add(self.x, self.y * self.y)
    }

    /// Dot product, treating both points as vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> f64 {
        self.x.mul_add(other.x, self.y * other.y)
    }

    /// Z component of the cross product, treating both points as vectors.
    #[must_use]
    pub fn cross(self, other: Self) -> f64 {
        self.x.mul_add(other.y, -(self.y * other.x))
    }

    /// Both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Point {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

/// Exactly four points.
///
/// For the card this is the projection of the card's own corners
/// `(0,0) (w,0) (w,h) (0,h)`, i.e. top-left, top-right, bottom-right,
/// bottom-left in card space. For the trunk it is left-top, left-bottom,
/// right-top, right-bottom (see [`TrunkEdges::to_quad`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quad([Point; 4]);

impl Quad {
    /// Create a quad from four points.
    #[must_use]
    pub const fn new(points: [Point; 4]) -> Self {
        Self(points)
    }

    /// The four points in stored order.
    #[must_use]
    pub const fn points(&self) -> &[Point; 4] {
        &self.0
    }

    /// Multiply every coordinate by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self(self.0.map(|p| p * factor))
    }

    /// Arithmetic mean of the four points.
    #[must_use]
    pub fn centroid(&self) -> Point {
        let sum = self.0.iter().fold(Point::new(0.0, 0.0), |acc, &p| acc + p);
        sum / 4.0
    }

    /// Every coordinate is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|p| p.is_finite())
    }
}

impl std::ops::Index<usize> for Quad {
    type Output = Point;

    fn index(&self, index: usize) -> &Point {
        &self.0[index]
    }
}

/// Card corners labeled by their position in the photograph.
///
/// Built by [`crate::geometry::order_card_points`]; every label always
/// has exactly one point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledCorners {
    /// Corner closest to the image origin.
    pub top_left: Point,
    /// Upper corner on the right-hand side.
    pub top_right: Point,
    /// Corner farthest from the image origin.
    pub bottom_right: Point,
    /// Lower corner on the left-hand side.
    pub bottom_left: Point,
}

impl LabeledCorners {
    /// Corners in clockwise order starting at the top left.
    #[must_use]
    pub const fn to_array(&self) -> [Point; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    /// Midpoint of the top-left/bottom-right diagonal.
    #[must_use]
    pub fn center(&self) -> Point {
        (self.top_left + self.bottom_right) / 2.0
    }
}

/// A line in Hesse normal form: `x·cos(theta) + y·sin(theta) = rho`.
///
/// `theta` is in radians. Near-vertical lines have `theta` close to 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarLine {
    /// Signed distance from the origin in pixels.
    pub rho: f64,
    /// Angle of the line normal in radians.
    pub theta: f64,
}

impl PolarLine {
    /// Create a new polar line.
    #[must_use]
    pub const fn new(rho: f64, theta: f64) -> Self {
        Self { rho, theta }
    }

    /// The x coordinate where this line crosses the row `y`.
    ///
    /// Returns `None` for (near-)horizontal lines, which never cross a
    /// row at a single point.
    #[must_use]
    pub fn x_at(&self, y: f64) -> Option<f64> {
        let (sin, cos) = self.theta.sin_cos();
        if cos.abs() < 1e-9 {
            return None;
        }
        Some(y.mul_add(-sin, self.rho) / cos)
    }

    /// Intersection with another polar line.
    ///
    /// Returns `None` when the lines are parallel.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Point> {
        let (s1, c1) = self.theta.sin_cos();
        let (s2, c2) = other.theta.sin_cos();
        let det = c1.mul_add(s2, -(s1 * c2));
        if det.abs() < 1e-9 {
            return None;
        }
        let x = self.rho.mul_add(s2, -(other.rho * s1)) / det;
        let y = c1.mul_add(other.rho, -(c2 * self.rho)) / det;
        Some(Point::new(x, y))
    }

    /// Segment between the rows `y_top` and `y_bottom`.
    #[must_use]
    pub fn segment_between(&self, y_top: f64, y_bottom: f64) -> Option<LineSegment> {
        Some(LineSegment {
            top: Point::new(self.x_at(y_top)?, y_top),
            bottom: Point::new(self.x_at(y_bottom)?, y_bottom),
        })
    }
}

/// A straight line segment described by its top and bottom endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    /// Endpoint with the smaller y.
    pub top: Point,
    /// Endpoint with the larger y.
    pub bottom: Point,
}

impl LineSegment {
    /// Translate both endpoints.
    #[must_use]
    pub fn translated(&self, offset: Point) -> Self {
        Self {
            top: self.top + offset,
            bottom: self.bottom + offset,
        }
    }

    /// Multiply both endpoints by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            top: self.top * factor,
            bottom: self.bottom * factor,
        }
    }
}

/// The two boundary lines of a trunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrunkEdges {
    /// Boundary whose top endpoint has the smaller x.
    pub left: LineSegment,
    /// The other boundary.
    pub right: LineSegment,
}

impl TrunkEdges {
    /// Build from two segments in either order.
    #[must_use]
    pub fn from_unordered(a: LineSegment, b: LineSegment) -> Self {
        if a.top.x <= b.top.x {
            Self { left: a, right: b }
        } else {
            Self { left: b, right: a }
        }
    }

    /// Left-top, left-bottom, right-top, right-bottom.
    #[must_use]
    pub const fn to_quad(&self) -> Quad {
        Quad::new([
            self.left.top,
            self.left.bottom,
            self.right.top,
            self.right.bottom,
        ])
    }
}

/// Which horizontal band of the photograph to search for the trunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchRegion {
    /// Rows from the top of the image down to the card's top edge.
    Above,
    /// Rows from the card's bottom edge down to the bottom of the image.
    Below,
}

impl SearchRegion {
    /// Numeric position code: 1 above the card, 2 below it.
    #[must_use]
    pub const fn position(self) -> u8 {
        match self {
            Self::Above => 1,
            Self::Below => 2,
        }
    }

    /// Parse a numeric position code.
    #[must_use]
    pub const fn from_position(position: u8) -> Option<Self> {
        match position {
            1 => Some(Self::Above),
            2 => Some(Self::Below),
            _ => None,
        }
    }
}

impl fmt::Display for SearchRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Above => f.write_str("above card"),
            Self::Below => f.write_str("below card"),
        }
    }
}

/// Outcome code of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Card, trunk and diameter were all produced.
    Success,
    /// The reference card was not located.
    CardNotFound,
    /// No search region yielded two trunk boundaries.
    TrunkNotFound,
    /// The diameter could not be computed from the located geometry.
    DiameterFailed,
}

impl Status {
    /// Integer code: 0 success, 1 card, 2 trunk, 3 diameter.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::CardNotFound => 1,
            Self::TrunkNotFound => 2,
            Self::DiameterFailed => 3,
        }
    }
}

/// Result of a full measurement.
///
/// On any failure both polygons and the diameter are `None`; the
/// `status` tells which stage failed and `message` why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// Outcome code.
    pub status: Status,
    /// Card outline in original photo coordinates.
    pub card_polygon: Option<Quad>,
    /// Trunk boundaries as left-top, left-bottom, right-top, right-bottom.
    pub trunk_polygon: Option<Quad>,
    /// Estimated trunk diameter in millimetres.
    pub diameter_mm: Option<f64>,
    /// Rectangularity of the located card in `[0, 1]`.
    pub card_confidence: f64,
    /// Band that produced the trunk boundaries.
    pub search_region: Option<SearchRegion>,
    /// Human-readable failure reason.
    pub message: Option<String>,
}

impl MeasurementResult {
    /// A failed measurement carrying only the status and reason.
    #[must_use]
    pub fn failure(error: &MeasureError) -> Self {
        Self {
            status: error.status(),
            card_polygon: None,
            trunk_polygon: None,
            diameter_mm: None,
            card_confidence: 0.0,
            search_region: None,
            message: Some(error.to_string()),
        }
    }

    /// Integer status code (see [`Status::code`]).
    #[must_use]
    pub const fn status_code(&self) -> u8 {
        self.status.code()
    }

    /// Returns `true` for [`Status::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Configuration for a full measurement.
///
/// Every field has a default so partial JSON documents deserialize.
/// Call [`validate`](Self::validate) before use; the orchestrator does
/// this automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    /// Reference card locator parameters.
    pub card: CardLocatorConfig,

    /// Trunk locator parameters.
    pub trunk: TrunkLocatorConfig,

    /// Bands to search for the trunk, tried in order until one succeeds.
    pub search_order: Vec<SearchRegion>,

    /// Physical width of the reference card in millimetres
    /// (ISO/IEC 7810 ID-1).
    pub card_physical_width_mm: f64,

    /// Keep intermediate rasters from the trunk search for inspection.
    pub produce_debug_artifacts: bool,
}

impl MeasureConfig {
    /// Default physical card width (ID-1 card).
    pub const DEFAULT_CARD_PHYSICAL_WIDTH_MM: f64 = 85.6;

    /// Default band order: above the card first, then below.
    pub const DEFAULT_SEARCH_ORDER: [SearchRegion; 2] = [SearchRegion::Above, SearchRegion::Below];

    /// Check every parameter for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::InvalidConfig`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), MeasureError> {
        self.card.validate()?;
        self.trunk.validate()?;
        if self.search_order.is_empty() {
            return Err(MeasureError::InvalidConfig(
                "search_order must name at least one region".to_string(),
            ));
        }
        if !(self.card_physical_width_mm.is_finite() && self.card_physical_width_mm > 0.0) {
            return Err(MeasureError::InvalidConfig(format!(
                "card_physical_width_mm must be positive, got {}",
                self.card_physical_width_mm,
            )));
        }
        Ok(())
    }
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            card: CardLocatorConfig::default(),
            trunk: TrunkLocatorConfig::default(),
            search_order: Self::DEFAULT_SEARCH_ORDER.to_vec(),
            card_physical_width_mm: Self::DEFAULT_CARD_PHYSICAL_WIDTH_MM,
            produce_debug_artifacts: false,
        }
    }
}

/// Errors that can occur during a measurement.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits.
#[derive(Debug, thiserror::Error)]
pub enum MeasureError {
    /// Failed to decode an input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Measurement configuration is invalid.
    #[error("invalid measurement configuration: {0}")]
    InvalidConfig(String),

    /// The reference card was not located.
    #[error("reference card not found: {0}")]
    NotFound(String),

    /// The requested band of the image has no usable rows.
    #[error("search region {0} is empty")]
    EmptySearchRegion(SearchRegion),

    /// Foreground segmentation could not run.
    #[error("segmentation failed: {0}")]
    Segmentation(#[from] GrabCutError),

    /// Detected lines could not be resolved into two trunk boundaries.
    #[error("ambiguous trunk geometry: {0}")]
    AmbiguousGeometry(String),

    /// Every configured search region failed.
    #[error("trunk not found: {0}")]
    TrunkNotFound(String),

    /// Located geometry is degenerate.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl MeasureError {
    /// The status code a measurement failing with this error reports.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::NotFound(_) => Status::CardNotFound,
            Self::EmptySearchRegion(_)
            | Self::Segmentation(_)
            | Self::AmbiguousGeometry(_)
            | Self::TrunkNotFound(_) => Status::TrunkNotFound,
            Self::ImageDecode(_)
            | Self::EmptyInput
            | Self::InvalidConfig(_)
            | Self::InvalidInput(_) => Status::DiameterFailed,
        }
    }
}

/// Serde-compatible proxy for `MeasureError`.
///
/// `image::ImageError` and `GrabCutError` are carried as their
/// `Display` strings.
#[derive(Serialize, Deserialize)]
enum MeasureErrorProxy {
    ImageDecode(String),
    EmptyInput,
    InvalidConfig(String),
    NotFound(String),
    EmptySearchRegion(SearchRegion),
    Segmentation(String),
    AmbiguousGeometry(String),
    TrunkNotFound(String),
    InvalidInput(String),
}

impl Serialize for MeasureError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => MeasureErrorProxy::ImageDecode(e.to_string()),
            Self::EmptyInput => MeasureErrorProxy::EmptyInput,
            Self::InvalidConfig(s) => MeasureErrorProxy::InvalidConfig(s.clone()),
            Self::NotFound(s) => MeasureErrorProxy::NotFound(s.clone()),
            Self::EmptySearchRegion(r) => MeasureErrorProxy::EmptySearchRegion(*r),
            Self::Segmentation(e) => MeasureErrorProxy::Segmentation(e.to_string()),
            Self::AmbiguousGeometry(s) => MeasureErrorProxy::AmbiguousGeometry(s.clone()),
            Self::TrunkNotFound(s) => MeasureErrorProxy::TrunkNotFound(s.clone()),
            Self::InvalidInput(s) => MeasureErrorProxy::InvalidInput(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MeasureError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = MeasureErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            // The typed source errors cannot be rebuilt from their messages;
            // keep the message under a variant with the same status code.
            MeasureErrorProxy::ImageDecode(msg) => {
                Self::InvalidInput(format!("image decode error: {msg}"))
            }
            MeasureErrorProxy::Segmentation(msg) => {
                Self::AmbiguousGeometry(format!("segmentation failed: {msg}"))
            }
            MeasureErrorProxy::EmptyInput => Self::EmptyInput,
            MeasureErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
            MeasureErrorProxy::NotFound(s) => Self::NotFound(s),
            MeasureErrorProxy::EmptySearchRegion(r) => Self::EmptySearchRegion(r),
            MeasureErrorProxy::AmbiguousGeometry(s) => Self::AmbiguousGeometry(s),
            MeasureErrorProxy::TrunkNotFound(s) => Self::TrunkNotFound(s),
            MeasureErrorProxy::InvalidInput(s) => Self::InvalidInput(s),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // --- Point tests ---

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_arithmetic() {
        let p = Point::new(1.0, 2.0) + Point::new(3.0, 4.0);
        assert_eq!(p, Point::new(4.0, 6.0));
        assert_eq!(p - Point::new(1.0, 1.0), Point::new(3.0, 5.0));
        assert_eq!(p * 0.5, Point::new(2.0, 3.0));
        assert_eq!(p / 2.0, Point::new(2.0, 3.0));
    }

    #[test]
    fn point_cross_sign() {
        let x = Point::new(1.0, 0.0);
        let y = Point::new(0.0, 1.0);
        assert!(x.cross(y) > 0.0);
        assert!(y.cross(x) < 0.0);
        assert!(x.dot(y).abs() < f64::EPSILON);
    }

    // --- Quad tests ---

    #[test]
    fn quad_centroid_and_scale() {
        let q = Quad::new([
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 2.0),
            Point::new(0.0, 2.0),
        ]);
        assert_eq!(q.centroid(), Point::new(2.0, 1.0));
        assert_eq!(q.scaled(2.0)[2], Point::new(8.0, 4.0));
    }

    #[test]
    fn quad_serializes_as_plain_array() {
        let q = Quad::new([Point::new(1.0, 2.0); 4]);
        let json = serde_json::to_string(&q).unwrap();
        assert!(json.starts_with('['));
        let back: Quad = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
    }

    // --- PolarLine tests ---

    #[test]
    fn vertical_line_x_at_any_row() {
        let line = PolarLine::new(42.0, 0.0);
        assert!((line.x_at(0.0).unwrap() - 42.0).abs() < 1e-12);
        assert!((line.x_at(100.0).unwrap() - 42.0).abs() < 1e-12);
    }

    #[test]
    fn horizontal_line_has_no_x() {
        let line = PolarLine::new(10.0, std::f64::consts::FRAC_PI_2);
        assert!(line.x_at(5.0).is_none());
    }

    #[test]
    fn parallel_polar_lines_do_not_intersect() {
        let a = PolarLine::new(10.0, 0.1);
        let b = PolarLine::new(30.0, 0.1);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn polar_intersection_lies_on_both_lines() {
        let a = PolarLine::new(50.0, 0.2);
        let b = PolarLine::new(80.0, -0.3);
        let p = a.intersection(&b).unwrap();
        for line in [a, b] {
            let (s, c) = line.theta.sin_cos();
            assert!((p.x.mul_add(c, p.y * s) - line.rho).abs() < 1e-9);
        }
    }

    // --- TrunkEdges tests ---

    #[test]
    fn trunk_edges_order_by_top_x() {
        let right = LineSegment {
            top: Point::new(300.0, 0.0),
            bottom: Point::new(310.0, 100.0),
        };
        let left = LineSegment {
            top: Point::new(100.0, 0.0),
            bottom: Point::new(90.0, 100.0),
        };
        let edges = TrunkEdges::from_unordered(right, left);
        assert_eq!(edges.left, left);
        let quad = edges.to_quad();
        assert_eq!(quad[0], left.top);
        assert_eq!(quad[1], left.bottom);
        assert_eq!(quad[2], right.top);
        assert_eq!(quad[3], right.bottom);
    }

    // --- SearchRegion / Status tests ---

    #[test]
    fn search_region_position_codes() {
        assert_eq!(SearchRegion::Above.position(), 1);
        assert_eq!(SearchRegion::Below.position(), 2);
        assert_eq!(SearchRegion::from_position(2), Some(SearchRegion::Below));
        assert_eq!(SearchRegion::from_position(0), None);
    }

    #[test]
    fn status_codes() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::CardNotFound.code(), 1);
        assert_eq!(Status::TrunkNotFound.code(), 2);
        assert_eq!(Status::DiameterFailed.code(), 3);
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            MeasureError::NotFound("x".into()).status(),
            Status::CardNotFound
        );
        assert_eq!(
            MeasureError::AmbiguousGeometry("x".into()).status(),
            Status::TrunkNotFound
        );
        assert_eq!(
            MeasureError::EmptySearchRegion(SearchRegion::Above).status(),
            Status::TrunkNotFound
        );
        assert_eq!(
            MeasureError::InvalidInput("x".into()).status(),
            Status::DiameterFailed
        );
    }

    #[test]
    fn failure_result_has_no_geometry() {
        let result = MeasurementResult::failure(&MeasureError::NotFound("no matches".into()));
        assert_eq!(result.status_code(), 1);
        assert!(result.card_polygon.is_none());
        assert!(result.trunk_polygon.is_none());
        assert!(result.diameter_mm.is_none());
        assert!(result.message.unwrap().contains("no matches"));
    }

    // --- MeasureConfig tests ---

    #[test]
    fn default_config_is_valid() {
        assert!(MeasureConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_search_order_is_invalid() {
        let config = MeasureConfig {
            search_order: Vec::new(),
            ..MeasureConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MeasureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn non_positive_card_width_is_invalid() {
        let config = MeasureConfig {
            card_physical_width_mm: 0.0,
            ..MeasureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_config_json_fills_defaults() {
        let config: MeasureConfig =
            serde_json::from_str(r#"{"search_order":["below"]}"#).unwrap();
        assert_eq!(config.search_order, vec![SearchRegion::Below]);
        assert!(
            (config.card_physical_width_mm - MeasureConfig::DEFAULT_CARD_PHYSICAL_WIDTH_MM).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn measure_config_serde_round_trip() {
        let config = MeasureConfig {
            produce_debug_artifacts: true,
            ..MeasureConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: MeasureConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    // --- MeasureError serde tests ---

    #[test]
    fn measure_error_serde_round_trip() {
        let err = MeasureError::EmptySearchRegion(SearchRegion::Below);
        let json = serde_json::to_string(&err).unwrap();
        let back: MeasureError = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            MeasureError::EmptySearchRegion(SearchRegion::Below)
        ));
    }

    #[test]
    fn segmentation_error_deserializes_with_same_status() {
        let err = MeasureError::Segmentation(GrabCutError::NoForegroundSamples);
        let json = serde_json::to_string(&err).unwrap();
        let back: MeasureError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status(), err.status());
    }
}
