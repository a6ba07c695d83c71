//! Reference card localisation.
//!
//! The card image is matched against the photograph with binary
//! keypoint descriptors; a RANSAC homography maps the card's corners
//! into the photograph. The result is scored by how close the projected
//! quadrilateral is to a rectangle.

use serde::{Deserialize, Serialize};

use crate::blur::gaussian_blur;
use crate::features::{FeatureConfig, detect_and_describe, match_ratio_test};
use crate::geometry::angle_between_3_points;
use crate::homography::{RansacConfig, fit_homography_ransac};
use crate::resize::{ResizeFilter, resize_to_width};
use crate::types::{GrayImage, MeasureError, Point, Quad};

/// Reference card locator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardLocatorConfig {
    /// Width the photograph is resized to before matching.
    pub working_width: u32,
    /// Blur applied to the resized photograph.
    pub photo_blur_sigma: f32,
    /// Blur applied to the card image.
    pub card_blur_sigma: f32,
    /// Lowe ratio: keep a match when `best < ratio · second_best`.
    pub match_ratio_threshold: f64,
    /// Fewest ratio-test survivors worth fitting a homography to.
    pub min_good_matches: usize,
    /// Detections scoring below this are treated as not found.
    pub min_confidence: f64,
    /// Keypoint detector and descriptor.
    pub features: FeatureConfig,
    /// Homography estimator.
    pub ransac: RansacConfig,
}

impl CardLocatorConfig {
    /// Default working width in pixels.
    pub const DEFAULT_WORKING_WIDTH: u32 = 1000;
    /// Default photograph blur (about a 5×5 kernel).
    pub const DEFAULT_PHOTO_BLUR_SIGMA: f32 = 1.1;
    /// Default card blur (about a 3×3 kernel).
    pub const DEFAULT_CARD_BLUR_SIGMA: f32 = 0.8;
    /// Default ratio-test threshold.
    pub const DEFAULT_MATCH_RATIO_THRESHOLD: f64 = 0.5;
    /// Default minimum match count.
    pub const DEFAULT_MIN_GOOD_MATCHES: usize = 5;

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::InvalidConfig`] naming the offending
    /// field.
    pub fn validate(&self) -> Result<(), MeasureError> {
        if self.working_width == 0 {
            return Err(MeasureError::InvalidConfig(
                "card.working_width must be positive".to_string(),
            ));
        }
        if !(self.match_ratio_threshold > 0.0 && self.match_ratio_threshold <= 1.0) {
            return Err(MeasureError::InvalidConfig(format!(
                "card.match_ratio_threshold must be in (0, 1], got {}",
                self.match_ratio_threshold,
            )));
        }
        if self.min_good_matches < 4 {
            return Err(MeasureError::InvalidConfig(format!(
                "card.min_good_matches must be at least 4, got {}",
                self.min_good_matches,
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(MeasureError::InvalidConfig(format!(
                "card.min_confidence must be in [0, 1], got {}",
                self.min_confidence,
            )));
        }
        if self.features.pyramid_levels == 0 || self.features.scale_factor <= 1.0 {
            return Err(MeasureError::InvalidConfig(
                "card.features needs at least one level and a scale factor above 1".to_string(),
            ));
        }
        if !(self.ransac.inlier_threshold > 0.0)
            || !(self.ransac.confidence > 0.0 && self.ransac.confidence < 1.0)
        {
            return Err(MeasureError::InvalidConfig(
                "card.ransac needs a positive threshold and a confidence in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CardLocatorConfig {
    fn default() -> Self {
        Self {
            working_width: Self::DEFAULT_WORKING_WIDTH,
            photo_blur_sigma: Self::DEFAULT_PHOTO_BLUR_SIGMA,
            card_blur_sigma: Self::DEFAULT_CARD_BLUR_SIGMA,
            match_ratio_threshold: Self::DEFAULT_MATCH_RATIO_THRESHOLD,
            min_good_matches: Self::DEFAULT_MIN_GOOD_MATCHES,
            min_confidence: 0.0,
            features: FeatureConfig::default(),
            ransac: RansacConfig::default(),
        }
    }
}

/// Outcome of a card search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardDetection {
    /// Card corners in photo coordinates, ordered as the card's own
    /// `(0,0) (w,0) (w,h) (0,h)`. `None` when the card was not found.
    pub polygon: Option<Quad>,
    /// Rectangularity score, 0 when not found.
    pub confidence: f64,
    /// Matches that survived the ratio test.
    pub good_matches: usize,
    /// Matches consistent with the homography.
    pub inliers: usize,
}

impl CardDetection {
    const fn not_found(good_matches: usize) -> Self {
        Self {
            polygon: None,
            confidence: 0.0,
            good_matches,
            inliers: 0,
        }
    }

    /// Whether a polygon was produced.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        self.polygon.is_some()
    }
}

/// Locate `card` inside `photo`.
///
/// Never fails: every way of not finding the card, including an empty
/// input and an estimator that cannot produce a model, yields a
/// detection without a polygon.
#[must_use]
pub fn locate_card(photo: &GrayImage, card: &GrayImage, config: &CardLocatorConfig) -> CardDetection {
    if photo.width() == 0 || photo.height() == 0 || card.width() == 0 || card.height() == 0 {
        log::debug!("card search skipped: empty input");
        return CardDetection::not_found(0);
    }

    let (working, ratio) = resize_to_width(photo, config.working_width, ResizeFilter::Triangle);
    let working = gaussian_blur(&working, config.photo_blur_sigma);
    let card_smooth = gaussian_blur(card, config.card_blur_sigma);

    let card_features = detect_and_describe(&card_smooth, &config.features);
    let photo_features = detect_and_describe(&working, &config.features);
    let matches = match_ratio_test(&card_features, &photo_features, config.match_ratio_threshold);
    log::debug!(
        "card features: {} card, {} photo, {} good matches",
        card_features.len(),
        photo_features.len(),
        matches.len(),
    );

    if matches.len() < config.min_good_matches {
        log::debug!(
            "card not found: {} good matches, need {}",
            matches.len(),
            config.min_good_matches,
        );
        return CardDetection::not_found(matches.len());
    }

    let (src, dst): (Vec<Point>, Vec<Point>) = matches
        .iter()
        .map(|m| {
            (
                card_features[m.query].keypoint.position,
                photo_features[m.train].keypoint.position,
            )
        })
        .unzip();

    let fit = match fit_homography_ransac(&src, &dst, &config.ransac) {
        Ok(fit) => fit,
        Err(e) => {
            log::warn!("card homography failed: {e}");
            return CardDetection::not_found(matches.len());
        }
    };

    let (w, h) = (f64::from(card.width()), f64::from(card.height()));
    let corners = [
        Point::new(0.0, 0.0),
        Point::new(w, 0.0),
        Point::new(w, h),
        Point::new(0.0, h),
    ];
    let mut projected = [Point::default(); 4];
    for (out, corner) in projected.iter_mut().zip(corners) {
        let Some(p) = fit.homography.apply(corner) else {
            log::warn!("card corner projects to infinity");
            return CardDetection::not_found(matches.len());
        };
        *out = p / ratio;
    }
    let polygon = Quad::new(projected);
    let confidence = confidence_score(Some(&polygon));

    CardDetection {
        polygon: Some(polygon),
        confidence,
        good_matches: matches.len(),
        inliers: fit.inlier_count,
    }
}

/// How close `polygon` is to a rectangle, in `[0, 1]` for convex
/// quadrilaterals (lower for badly skewed ones).
///
/// Sums `| |angle mod 180| − 90 |` over the four interior angles and
/// maps the total deviation onto `(360 − Σ) / 360`. `None` scores 0.
#[must_use]
pub fn confidence_score(polygon: Option<&Quad>) -> f64 {
    let Some(quad) = polygon else {
        return 0.0;
    };
    let deviation: f64 = (0..4)
        .map(|i| {
            let angle = angle_between_3_points(quad[(i + 3) % 4], quad[i], quad[(i + 1) % 4]);
            ((angle % 180.0).abs() - 90.0).abs()
        })
        .sum();
    (360.0 - deviation) / 360.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn quad(points: [(f64, f64); 4]) -> Quad {
        Quad::new(points.map(|(x, y)| Point::new(x, y)))
    }

    #[test]
    fn rectangle_scores_one() {
        let q = quad([(0.0, 0.0), (100.0, 0.0), (100.0, 60.0), (0.0, 60.0)]);
        assert!((confidence_score(Some(&q)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn missing_polygon_scores_zero() {
        assert!(confidence_score(None).abs() < f64::EPSILON);
    }

    #[test]
    fn score_is_translation_invariant() {
        let a = quad([(0.0, 0.0), (100.0, 10.0), (95.0, 70.0), (-5.0, 60.0)]);
        let b = Quad::new(a.points().map(|p| p + Point::new(250.0, -40.0)));
        assert!((confidence_score(Some(&a)) - confidence_score(Some(&b))).abs() < 1e-9);
    }

    #[test]
    fn score_decreases_as_a_corner_skews() {
        let mut previous = f64::INFINITY;
        for shift in [0.0, 5.0, 10.0, 20.0, 30.0] {
            let q = quad([(0.0, 0.0), (100.0, 0.0), (100.0 + shift, 60.0), (0.0, 60.0)]);
            let score = confidence_score(Some(&q));
            assert!(score < previous, "shift {shift}: {score} >= {previous}");
            previous = score;
        }
    }

    #[test]
    fn blank_photo_is_not_found() {
        let photo = GrayImage::from_pixel(400, 300, image::Luma([200]));
        let card = GrayImage::from_fn(120, 76, |x, y| image::Luma([((x * 7 + y * 13) % 256) as u8]));
        let detection = locate_card(&photo, &card, &CardLocatorConfig::default());
        assert!(!detection.is_found());
        assert!(detection.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn empty_inputs_are_not_found() {
        let photo = GrayImage::new(0, 0);
        let card = GrayImage::from_pixel(10, 10, image::Luma([0]));
        assert!(!locate_card(&photo, &card, &CardLocatorConfig::default()).is_found());
        assert!(!locate_card(&card, &photo, &CardLocatorConfig::default()).is_found());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(CardLocatorConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_ratio() {
        let config = CardLocatorConfig {
            match_ratio_threshold: 0.0,
            ..CardLocatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(MeasureError::InvalidConfig(_))));
    }

    #[test]
    fn config_deserializes_from_partial_json() {
        let config: CardLocatorConfig =
            serde_json::from_str(r#"{"working_width": 640, "ransac": {"seed": 3}}"#).unwrap();
        assert_eq!(config.working_width, 640);
        assert_eq!(config.ransac.seed, 3);
        assert_eq!(config.min_good_matches, CardLocatorConfig::DEFAULT_MIN_GOOD_MATCHES);
    }
}
