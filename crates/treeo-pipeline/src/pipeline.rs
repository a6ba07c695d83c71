//! Stage-by-stage measurement: card, trunk, diameter.
//!
//! [`crate::measure`] runs everything in one call. [`Measurement`] lets
//! the caller drive it one stage at a time and inspect each result:
//!
//! ```rust
//! # use treeo_pipeline::{MeasureConfig, MeasureError, Measurement, RgbImage};
//! # fn run(photo: &RgbImage, card: &RgbImage) -> Result<(), MeasureError> {
//! let config = MeasureConfig::default();
//! let located = Measurement::new(photo, card, &config)?
//!     .locate_card()?
//!     .locate_trunk()?;
//! println!("trunk found {}", located.region());
//! let result = located.compute_diameter()?.into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, so a
//! later stage cannot run before the one it depends on. Every failure
//! is a [`MeasureError`] whose [`status`](MeasureError::status) is the
//! code the measurement reports.

use serde::{Deserialize, Serialize};

use crate::card::{CardDetection, locate_card};
use crate::decode::to_gray;
use crate::geometry::{distance_to_line, points_distance, x_at_y};
use crate::trunk::{TrunkFinder, TrunkLocator};
use crate::types::{
    MeasureConfig, MeasureError, MeasurementResult, Point, Quad, RgbImage, SearchRegion, Status,
    TrunkEdges,
};

/// Card widths below this many pixels cannot anchor a measurement.
const MIN_CARD_WIDTH_PX: f64 = 1e-6;

/// Entry point of the staged measurement.
#[derive(Debug, Clone, Copy)]
pub struct Measurement;

impl Measurement {
    /// Validate `config` and prepare a measurement of `photo` against
    /// the reference `card` image.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::InvalidConfig`] when the configuration is
    /// unusable.
    pub fn new<'a>(
        photo: &'a RgbImage,
        card: &'a RgbImage,
        config: &'a MeasureConfig,
    ) -> Result<Pending<'a>, MeasureError> {
        config.validate()?;
        Ok(Pending {
            config,
            photo,
            card,
        })
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Inputs accepted, nothing computed yet.
#[must_use = "pipeline stages are consumed by advancing — call .locate_card() to continue"]
#[derive(Debug)]
pub struct Pending<'a> {
    config: &'a MeasureConfig,
    photo: &'a RgbImage,
    card: &'a RgbImage,
}

impl<'a> Pending<'a> {
    /// The photograph being measured.
    #[must_use]
    pub const fn photo(&self) -> &RgbImage {
        self.photo
    }

    /// Find the reference card and advance to [`CardLocated`].
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::NotFound`] when the card image is empty,
    /// the card is not matched, or the detection scores below
    /// `card.min_confidence`.
    pub fn locate_card(self) -> Result<CardLocated<'a>, MeasureError> {
        if self.card.width() == 0 || self.card.height() == 0 {
            return Err(MeasureError::NotFound(
                "reference card image is empty".to_string(),
            ));
        }
        let detection = locate_card(
            &to_gray(self.photo),
            &to_gray(self.card),
            &self.config.card,
        );
        let Some(polygon) = detection.polygon else {
            return Err(MeasureError::NotFound(format!(
                "{} good matches, {} inliers",
                detection.good_matches, detection.inliers,
            )));
        };
        if detection.confidence < self.config.card.min_confidence {
            return Err(MeasureError::NotFound(format!(
                "confidence {:.3} below minimum {:.3}",
                detection.confidence, self.config.card.min_confidence,
            )));
        }
        log::debug!(
            "card located: {polygon:?}, confidence {:.3}",
            detection.confidence
        );
        Ok(CardLocated {
            config: self.config,
            photo: self.photo,
            polygon,
            detection,
        })
    }
}

// ───────────────────────── Stage 1: CardLocated ──────────────────────

/// The card polygon is known.
#[must_use = "pipeline stages are consumed by advancing — call .locate_trunk() to continue"]
#[derive(Debug)]
pub struct CardLocated<'a> {
    config: &'a MeasureConfig,
    photo: &'a RgbImage,
    polygon: Quad,
    detection: CardDetection,
}

/// One band search and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrunkAttempt {
    /// Band searched.
    pub region: SearchRegion,
    /// Failure reason; `None` for the successful attempt.
    pub error: Option<String>,
}

impl<'a> CardLocated<'a> {
    /// Card corners in photo coordinates.
    #[must_use]
    pub const fn polygon(&self) -> &Quad {
        &self.polygon
    }

    /// Full card detection, including match counts.
    #[must_use]
    pub const fn detection(&self) -> &CardDetection {
        &self.detection
    }

    /// The GrabCut/Hough trunk finder [`locate_trunk`](Self::locate_trunk)
    /// uses, built around the located card.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::InvalidInput`] for an empty photograph.
    pub fn trunk_locator(&self) -> Result<TrunkLocator, MeasureError> {
        Ok(TrunkLocator::new(self.photo, &self.polygon, &self.config.trunk)?
            .with_artifacts(self.config.produce_debug_artifacts))
    }

    /// Search for the trunk with the default finder.
    ///
    /// # Errors
    ///
    /// See [`locate_trunk_with`](Self::locate_trunk_with).
    pub fn locate_trunk(self) -> Result<TrunkLocated<'a>, MeasureError> {
        let mut locator = self.trunk_locator()?;
        self.locate_trunk_with(&mut locator)
    }

    /// Search each band of `config.search_order` with `finder` until
    /// one yields both trunk edges.
    ///
    /// Failed bands are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::TrunkNotFound`] listing every band's
    /// failure when none succeeds.
    pub fn locate_trunk_with<F: TrunkFinder + ?Sized>(
        self,
        finder: &mut F,
    ) -> Result<TrunkLocated<'a>, MeasureError> {
        let mut attempts = Vec::with_capacity(self.config.search_order.len());
        for &region in &self.config.search_order {
            match finder.find_trunk(region) {
                Ok(edges) => {
                    log::debug!("trunk found {region}: {edges:?}");
                    attempts.push(TrunkAttempt {
                        region,
                        error: None,
                    });
                    return Ok(TrunkLocated {
                        config: self.config,
                        polygon: self.polygon,
                        detection: self.detection,
                        edges,
                        region,
                        attempts,
                    });
                }
                Err(e) => {
                    log::warn!("trunk search {region} failed: {e}");
                    attempts.push(TrunkAttempt {
                        region,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        let summary = attempts
            .iter()
            .map(|a| format!("{}: {}", a.region, a.error.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("; ");
        Err(MeasureError::TrunkNotFound(summary))
    }
}

// ───────────────────────── Stage 2: TrunkLocated ─────────────────────

/// Both trunk edges are known.
#[must_use = "pipeline stages are consumed by advancing — call .compute_diameter() to continue"]
#[derive(Debug)]
pub struct TrunkLocated<'a> {
    config: &'a MeasureConfig,
    polygon: Quad,
    detection: CardDetection,
    edges: TrunkEdges,
    region: SearchRegion,
    attempts: Vec<TrunkAttempt>,
}

impl TrunkLocated<'_> {
    /// Trunk edges in photo coordinates.
    #[must_use]
    pub const fn edges(&self) -> &TrunkEdges {
        &self.edges
    }

    /// Band the edges were found in.
    #[must_use]
    pub const fn region(&self) -> SearchRegion {
        self.region
    }

    /// Every band searched, in order; the last one succeeded.
    #[must_use]
    pub fn attempts(&self) -> &[TrunkAttempt] {
        &self.attempts
    }

    /// Convert the pixel widths into millimetres.
    ///
    /// # Errors
    ///
    /// See [`measure_diameter`].
    pub fn compute_diameter(self) -> Result<DiameterComputed, MeasureError> {
        let diameter = measure_diameter(
            &self.polygon,
            &self.edges,
            self.config.card_physical_width_mm,
        )?;
        log::debug!(
            "diameter: trunk {:.2}px / card {:.2}px -> {:.2}mm",
            diameter.trunk_width_px,
            diameter.card_width_px,
            diameter.diameter_mm,
        );
        Ok(DiameterComputed {
            polygon: self.polygon,
            detection: self.detection,
            edges: self.edges,
            region: self.region,
            diameter,
        })
    }
}

// ───────────────────────── Stage 3: DiameterComputed ─────────────────

/// Pixel widths and their physical ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Diameter {
    /// Perpendicular trunk width at the card's height, in pixels.
    pub trunk_width_px: f64,
    /// Length of the card's top edge in pixels.
    pub card_width_px: f64,
    /// Trunk diameter in millimetres.
    pub diameter_mm: f64,
}

/// Every stage succeeded.
#[derive(Debug)]
pub struct DiameterComputed {
    polygon: Quad,
    detection: CardDetection,
    edges: TrunkEdges,
    region: SearchRegion,
    diameter: Diameter,
}

impl DiameterComputed {
    /// The measured widths.
    #[must_use]
    pub const fn diameter(&self) -> &Diameter {
        &self.diameter
    }

    /// Package the measurement as a successful result.
    #[must_use]
    pub fn into_result(self) -> MeasurementResult {
        MeasurementResult {
            status: Status::Success,
            card_polygon: Some(self.polygon),
            trunk_polygon: Some(self.edges.to_quad()),
            diameter_mm: Some(self.diameter.diameter_mm),
            card_confidence: self.detection.confidence,
            search_region: Some(self.region),
            message: None,
        }
    }
}

/// Trunk diameter from the card polygon and the trunk edges.
///
/// The trunk width is the distance from the left edge, taken at the
/// card's mean height, to the infinite right edge line. The card width
/// is the distance between the first two polygon points (the card's
/// top edge).
///
/// # Errors
///
/// Returns [`MeasureError::InvalidInput`] for a card of zero width, a
/// horizontal or degenerate trunk edge, or a non-finite result.
pub fn measure_diameter(
    card: &Quad,
    edges: &TrunkEdges,
    card_physical_width_mm: f64,
) -> Result<Diameter, MeasureError> {
    let y_ref = card.centroid().y;
    let x_left = x_at_y(&edges.left, y_ref)
        .ok_or_else(|| MeasureError::InvalidInput("left trunk edge is horizontal".to_string()))?;
    let on_left = Point::new(x_left, y_ref);
    let trunk_width_px = distance_to_line(edges.right.top, edges.right.bottom, on_left)
        .ok_or_else(|| MeasureError::InvalidInput("right trunk edge has zero length".to_string()))?;

    let card_width_px = points_distance(card[0], card[1]);
    if !(card_width_px.is_finite() && card_width_px > MIN_CARD_WIDTH_PX) {
        return Err(MeasureError::InvalidInput(format!(
            "card width {card_width_px} px is unusable",
        )));
    }

    let diameter_mm = trunk_width_px / card_width_px * card_physical_width_mm;
    if !diameter_mm.is_finite() {
        return Err(MeasureError::InvalidInput(format!(
            "diameter is not finite ({trunk_width_px} px / {card_width_px} px)",
        )));
    }
    Ok(Diameter {
        trunk_width_px,
        card_width_px,
        diameter_mm,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::LineSegment;

    fn card(x0: f64, y0: f64, x1: f64, y1: f64) -> Quad {
        Quad::new([
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ])
    }

    fn vertical(x: f64) -> LineSegment {
        LineSegment {
            top: Point::new(x, 0.0),
            bottom: Point::new(x, 400.0),
        }
    }

    fn dummy_located(config: &MeasureConfig) -> CardLocated<'_> {
        static PHOTO: std::sync::OnceLock<RgbImage> = std::sync::OnceLock::new();
        CardLocated {
            config,
            photo: PHOTO.get_or_init(|| RgbImage::new(4, 4)),
            polygon: card(100.0, 100.0, 300.0, 226.0),
            detection: CardDetection {
                polygon: Some(card(100.0, 100.0, 300.0, 226.0)),
                confidence: 1.0,
                good_matches: 20,
                inliers: 18,
            },
        }
    }

    /// Finder that fails or succeeds per region, recording calls.
    struct ScriptedFinder {
        succeed_in: Option<SearchRegion>,
        calls: Vec<SearchRegion>,
    }

    impl TrunkFinder for ScriptedFinder {
        fn find_trunk(&mut self, region: SearchRegion) -> Result<TrunkEdges, MeasureError> {
            self.calls.push(region);
            if Some(region) == self.succeed_in {
                Ok(TrunkEdges::from_unordered(vertical(50.0), vertical(350.0)))
            } else {
                Err(MeasureError::AmbiguousGeometry("no lines".to_string()))
            }
        }
    }

    #[test]
    fn diameter_of_reference_example() {
        let edges = TrunkEdges::from_unordered(vertical(350.0), vertical(50.0));
        let d = measure_diameter(&card(100.0, 100.0, 300.0, 226.0), &edges, 85.6).unwrap();
        assert!((d.trunk_width_px - 300.0).abs() < 1e-9);
        assert!((d.card_width_px - 200.0).abs() < 1e-9);
        assert!((d.diameter_mm - 128.4).abs() < 1e-9);
    }

    #[test]
    fn diameter_uses_perpendicular_width_for_tilted_edges() {
        // Both edges tilted by the same angle: perpendicular width is
        // smaller than the horizontal offset.
        let tilt = |x: f64| LineSegment {
            top: Point::new(x, 0.0),
            bottom: Point::new(x + 100.0, 400.0),
        };
        let edges = TrunkEdges::from_unordered(tilt(50.0), tilt(350.0));
        let d = measure_diameter(&card(100.0, 100.0, 300.0, 226.0), &edges, 85.6).unwrap();
        let expected = 300.0 * 400.0 / 100.0f64.hypot(400.0);
        assert!((d.trunk_width_px - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_width_card_is_rejected() {
        let edges = TrunkEdges::from_unordered(vertical(50.0), vertical(350.0));
        let err = measure_diameter(&card(100.0, 100.0, 100.0, 200.0), &edges, 85.6).unwrap_err();
        assert!(matches!(err, MeasureError::InvalidInput(_)));
        assert_eq!(err.status(), Status::DiameterFailed);
    }

    #[test]
    fn horizontal_edge_is_rejected() {
        let flat = LineSegment {
            top: Point::new(0.0, 150.0),
            bottom: Point::new(100.0, 150.0),
        };
        let edges = TrunkEdges {
            left: flat,
            right: vertical(350.0),
        };
        assert!(matches!(
            measure_diameter(&card(100.0, 100.0, 300.0, 226.0), &edges, 85.6),
            Err(MeasureError::InvalidInput(_))
        ));
    }

    #[test]
    fn retry_uses_second_region_when_first_fails() {
        let config = MeasureConfig::default();
        let mut finder = ScriptedFinder {
            succeed_in: Some(SearchRegion::Below),
            calls: Vec::new(),
        };
        let located = dummy_located(&config)
            .locate_trunk_with(&mut finder)
            .unwrap();
        assert_eq!(finder.calls, vec![SearchRegion::Above, SearchRegion::Below]);
        assert_eq!(located.region(), SearchRegion::Below);
        assert_eq!(located.attempts().len(), 2);
        assert!(located.attempts()[0].error.is_some());
        assert!(located.attempts()[1].error.is_none());

        let result = located.compute_diameter().unwrap().into_result();
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.search_region, Some(SearchRegion::Below));
        assert!((result.diameter_mm.unwrap() - 128.4).abs() < 1e-9);
        assert!(result.message.is_none());
    }

    #[test]
    fn first_success_stops_the_search() {
        let config = MeasureConfig::default();
        let mut finder = ScriptedFinder {
            succeed_in: Some(SearchRegion::Above),
            calls: Vec::new(),
        };
        let located = dummy_located(&config)
            .locate_trunk_with(&mut finder)
            .unwrap();
        assert_eq!(finder.calls, vec![SearchRegion::Above]);
        assert_eq!(located.region(), SearchRegion::Above);
    }

    #[test]
    fn exhausted_search_reports_trunk_not_found() {
        let config = MeasureConfig::default();
        let mut finder = ScriptedFinder {
            succeed_in: None,
            calls: Vec::new(),
        };
        let err = dummy_located(&config)
            .locate_trunk_with(&mut finder)
            .unwrap_err();
        assert_eq!(err.status(), Status::TrunkNotFound);
        let message = err.to_string();
        assert!(message.contains("above card"), "{message}");
        assert!(message.contains("below card"), "{message}");
    }

    #[test]
    fn custom_search_order_is_respected() {
        let config = MeasureConfig {
            search_order: vec![SearchRegion::Below],
            ..MeasureConfig::default()
        };
        let mut finder = ScriptedFinder {
            succeed_in: Some(SearchRegion::Above),
            calls: Vec::new(),
        };
        assert!(dummy_located(&config).locate_trunk_with(&mut finder).is_err());
        assert_eq!(finder.calls, vec![SearchRegion::Below]);
    }

    #[test]
    fn empty_card_image_is_not_found() {
        let config = MeasureConfig::default();
        let photo = RgbImage::new(100, 100);
        let card = RgbImage::new(0, 0);
        let err = Measurement::new(&photo, &card, &config)
            .unwrap()
            .locate_card()
            .unwrap_err();
        assert_eq!(err.status(), Status::CardNotFound);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = MeasureConfig {
            search_order: Vec::new(),
            ..MeasureConfig::default()
        };
        let photo = RgbImage::new(10, 10);
        let err = Measurement::new(&photo, &photo, &config).unwrap_err();
        assert!(matches!(err, MeasureError::InvalidConfig(_)));
    }
}
