//! Planar homography estimation: normalized DLT and a RANSAC wrapper.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::geometry::points_distance;
use crate::types::Point;

/// Points per minimal sample.
const SAMPLE_SIZE: usize = 4;

/// Errors from homography fitting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HomographyError {
    /// Fewer correspondences than a fit needs.
    #[error("too few points: need {needed}, got {got}")]
    TooFewPoints {
        /// Required correspondences.
        needed: usize,
        /// Supplied correspondences.
        got: usize,
    },

    /// The correspondences do not determine a finite transform.
    #[error("degenerate point configuration")]
    Degenerate,

    /// The best model had too little support.
    #[error("insufficient inliers: need {needed}, found {found}")]
    InsufficientInliers {
        /// Required inliers.
        needed: usize,
        /// Inliers of the best model.
        found: usize,
    },
}

/// A 3×3 projective transform with `h[(2, 2)] = 1` where possible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    /// Row-major matrix.
    pub h: Matrix3<f64>,
}

impl Homography {
    /// Wrap a matrix.
    #[must_use]
    pub const fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    /// Map a point. `None` when it lands on the line at infinity.
    #[must_use]
    pub fn apply(&self, p: Point) -> Option<Point> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        if v[2].abs() < 1e-12 {
            return None;
        }
        let out = Point::new(v[0] / v[2], v[1] / v[2]);
        out.is_finite().then_some(out)
    }

    /// Distance between `apply(src)` and `dst`; infinite when the
    /// projection is undefined.
    #[must_use]
    pub fn reprojection_error(&self, src: Point, dst: Point) -> f64 {
        self.apply(src)
            .map_or(f64::INFINITY, |p| points_distance(p, dst))
    }
}

/// Translate to the centroid and scale to a mean distance of √2.
#[allow(clippy::cast_precision_loss)]
fn normalize_points(points: &[Point]) -> (Matrix3<f64>, Vec<Point>) {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let centroid = Point::new(cx, cy);
    let mean_dist = points.iter().map(|p| p.distance(centroid)).sum::<f64>() / n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Point::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    (t, normalized)
}

/// Direct linear transform from four or more correspondences.
///
/// # Errors
///
/// [`HomographyError::TooFewPoints`] for fewer than four pairs or
/// mismatched slices, [`HomographyError::Degenerate`] when the solution
/// is not finite.
pub fn estimate_homography(src: &[Point], dst: &[Point]) -> Result<Homography, HomographyError> {
    let n = src.len().min(dst.len());
    if n < SAMPLE_SIZE || src.len() != dst.len() {
        return Err(HomographyError::TooFewPoints {
            needed: SAMPLE_SIZE,
            got: n,
        });
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
        let r = 2 * i;
        a[(r, 3)] = -s.x;
        a[(r, 4)] = -s.y;
        a[(r, 5)] = -1.0;
        a[(r, 6)] = d.y * s.x;
        a[(r, 7)] = d.y * s.y;
        a[(r, 8)] = d.y;

        a[(r + 1, 0)] = s.x;
        a[(r + 1, 1)] = s.y;
        a[(r + 1, 2)] = 1.0;
        a[(r + 1, 6)] = -d.x * s.x;
        a[(r + 1, 7)] = -d.x * s.y;
        a[(r + 1, 8)] = -d.x;
    }

    // Null vector of A: eigenvector of AᵀA with the smallest eigenvalue.
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.abs().total_cmp(&y.1.abs()))
        .map_or(0, |(i, _)| i);
    let v = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let t_dst_inv = t_dst.try_inverse().ok_or(HomographyError::Degenerate)?;
    let mut h = t_dst_inv * h_norm * t_src;
    let scale = h[(2, 2)];
    if scale.abs() > 1e-12 {
        h /= scale;
    }
    if h.iter().all(|x| x.is_finite()) {
        Ok(Homography::new(h))
    } else {
        Err(HomographyError::Degenerate)
    }
}

/// RANSAC parameters for homography fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Iteration cap.
    pub max_iters: usize,
    /// Reprojection error below which a pair counts as an inlier, in
    /// destination pixels.
    pub inlier_threshold: f64,
    /// Minimum inliers for an accepted model.
    pub min_inliers: usize,
    /// Probability of drawing at least one all-inlier sample; shortens
    /// the run once a good model is found.
    pub confidence: f64,
    /// Sampling seed.
    pub seed: u64,
}

impl RansacConfig {
    /// Default iteration cap.
    pub const DEFAULT_MAX_ITERS: usize = 2000;
    /// Default inlier threshold.
    pub const DEFAULT_INLIER_THRESHOLD: f64 = 3.0;
    /// Default minimum inliers.
    pub const DEFAULT_MIN_INLIERS: usize = 4;
    /// Default confidence.
    pub const DEFAULT_CONFIDENCE: f64 = 0.995;
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: Self::DEFAULT_MAX_ITERS,
            inlier_threshold: Self::DEFAULT_INLIER_THRESHOLD,
            min_inliers: Self::DEFAULT_MIN_INLIERS,
            confidence: Self::DEFAULT_CONFIDENCE,
            seed: 0,
        }
    }
}

/// A RANSAC fit and its support.
#[derive(Debug, Clone)]
pub struct RansacFit {
    /// Model refit on all inliers.
    pub homography: Homography,
    /// Inlier flag per correspondence.
    pub inliers: Vec<bool>,
    /// Number of `true` entries in `inliers`.
    pub inlier_count: usize,
}

/// Whether any three of the four points are (nearly) collinear.
fn has_collinear_triple(points: &[Point; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().any(|&[a, b, c]| {
        let ab = points[b] - points[a];
        let ac = points[c] - points[a];
        ab.cross(ac).abs() < 1e-6
    })
}

fn count_inliers(h: &Homography, src: &[Point], dst: &[Point], threshold: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(&s, &d)| h.reprojection_error(s, d) < threshold)
        .collect()
}

/// Iterations needed to draw an all-inlier sample with `confidence`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn adaptive_iterations(inliers: usize, total: usize, confidence: f64, cap: usize) -> usize {
    let ratio = inliers as f64 / total as f64;
    let good_sample = ratio.powi(SAMPLE_SIZE as i32);
    if good_sample >= 1.0 - f64::EPSILON {
        return 1;
    }
    if good_sample <= f64::EPSILON {
        return cap;
    }
    let needed = (1.0 - confidence).ln() / (1.0 - good_sample).ln();
    if needed.is_finite() && needed >= 0.0 {
        (needed.ceil() as usize).min(cap)
    } else {
        cap
    }
}

/// Robustly fit a homography mapping `src` onto `dst`.
///
/// Minimal samples with a collinear triple on either side are skipped.
/// The best model is refit on its inliers; if the refit loses support
/// the sample model is kept.
///
/// # Errors
///
/// [`HomographyError::TooFewPoints`] with fewer than four pairs,
/// [`HomographyError::InsufficientInliers`] when no model reaches
/// `min_inliers`.
pub fn fit_homography_ransac(
    src: &[Point],
    dst: &[Point],
    config: &RansacConfig,
) -> Result<RansacFit, HomographyError> {
    let n = src.len().min(dst.len());
    if n < SAMPLE_SIZE || src.len() != dst.len() {
        return Err(HomographyError::TooFewPoints {
            needed: SAMPLE_SIZE,
            got: n,
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(Homography, Vec<bool>, usize)> = None;
    let mut iterations = config.max_iters;
    let mut iter = 0;

    while iter < iterations {
        iter += 1;
        let picked = rand::seq::index::sample(&mut rng, n, SAMPLE_SIZE);
        let mut s4 = [Point::default(); SAMPLE_SIZE];
        let mut d4 = [Point::default(); SAMPLE_SIZE];
        for (k, i) in picked.iter().enumerate() {
            s4[k] = src[i];
            d4[k] = dst[i];
        }
        if has_collinear_triple(&s4) || has_collinear_triple(&d4) {
            continue;
        }
        let Ok(h) = estimate_homography(&s4, &d4) else {
            continue;
        };
        let mask = count_inliers(&h, src, dst, config.inlier_threshold);
        let count = mask.iter().filter(|&&m| m).count();
        if best.as_ref().is_none_or(|b| count > b.2) {
            iterations = adaptive_iterations(count, n, config.confidence, config.max_iters);
            best = Some((h, mask, count));
        }
    }

    let found = best.as_ref().map_or(0, |b| b.2);
    let needed = config.min_inliers.max(SAMPLE_SIZE);
    let Some((h, mask, count)) = best.filter(|b| b.2 >= needed) else {
        return Err(HomographyError::InsufficientInliers { needed, found });
    };

    let (in_src, in_dst): (Vec<Point>, Vec<Point>) = src
        .iter()
        .zip(dst)
        .zip(&mask)
        .filter(|(_, m)| **m)
        .map(|((s, d), _)| (*s, *d))
        .unzip();

    let refit = estimate_homography(&in_src, &in_dst).ok().and_then(|r| {
        let refit_mask = count_inliers(&r, src, dst, config.inlier_threshold);
        let refit_count = refit_mask.iter().filter(|&&m| m).count();
        (refit_count >= count).then_some((r, refit_mask, refit_count))
    });
    let (homography, inliers, inlier_count) = refit.unwrap_or((h, mask, count));
    log::debug!("ransac: {inlier_count}/{n} inliers after {iter} iterations");

    Ok(RansacFit {
        homography,
        inliers,
        inlier_count,
    })
}
