//! Standard Hough transform restricted to near-vertical lines.
//!
//! Every edge pixel votes for each `(rho, theta)` with
//! `x·cos(theta) + y·sin(theta) = rho`, for `theta` in whole degrees
//! within `±max_tilt_degrees` of vertical and `rho` rounded to whole
//! pixels. Peaks are accumulator cells above the vote threshold that
//! beat their left and upper neighbours strictly and their right and
//! lower neighbours or ties. Each peak's `rho` is then refined to
//! sub-pixel precision by a parabola through the cell and its two `rho`
//! neighbours. The result is sorted strongest first, so index 0 is the
//! most strongly supported line.
//!
//! `imageproc::hough::detect_lines` is not used because it neither
//! ranks lines by votes nor restricts the angle range, and both matter
//! to trunk-edge disambiguation.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::types::PolarLine;

/// Hough accumulator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughConfig {
    /// Minimum votes for a peak to be reported.
    pub vote_threshold: u32,
    /// Largest deviation from vertical, in whole degrees (at most 89).
    pub max_tilt_degrees: u32,
}

impl HoughConfig {
    /// Default vote threshold.
    pub const DEFAULT_VOTE_THRESHOLD: u32 = 50;
    /// Default maximum tilt, about one radian.
    pub const DEFAULT_MAX_TILT_DEGREES: u32 = 57;
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            vote_threshold: Self::DEFAULT_VOTE_THRESHOLD,
            max_tilt_degrees: Self::DEFAULT_MAX_TILT_DEGREES,
        }
    }
}

/// A detected line and the number of edge pixels on it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoughLine {
    /// Line parameters.
    pub line: PolarLine,
    /// Accumulator votes.
    pub votes: u32,
}

/// Detect lines in a binary edge map (non-zero = edge).
///
/// Lines are returned strongest first; equal vote counts keep
/// accumulator order (smaller angle first, then smaller `rho`).
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
pub fn detect_lines(edges: &GrayImage, config: &HoughConfig) -> Vec<HoughLine> {
    let (w, h) = edges.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let tilt = config.max_tilt_degrees.min(89) as i32;
    let angles: Vec<f64> = (-tilt..=tilt).map(|d| f64::from(d).to_radians()).collect();
    let trig: Vec<(f64, f64)> = angles.iter().map(|t| t.sin_cos()).collect();

    let max_rho = f64::from(w).hypot(f64::from(h)).ceil() as i64;
    let num_rho = (2 * max_rho + 1) as usize;
    let num_theta = angles.len();
    // One cell of zero padding on every side simplifies the peak test.
    let stride = num_rho + 2;
    let mut acc = vec![0u32; (num_theta + 2) * stride];
    let cell = |t: usize, r: usize| (t + 1) * stride + r + 1;

    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        let (fx, fy) = (f64::from(x), f64::from(y));
        for (t, &(sin, cos)) in trig.iter().enumerate() {
            let rho = fx.mul_add(cos, fy * sin).round() as i64;
            let r = (rho + max_rho) as usize;
            acc[cell(t, r)] += 1;
        }
    }

    let mut peaks: Vec<(u32, usize, usize)> = Vec::new();
    for t in 0..num_theta {
        for r in 0..num_rho {
            let base = cell(t, r);
            let votes = acc[base];
            if votes >= config.vote_threshold
                && votes > acc[base - 1]
                && votes >= acc[base + 1]
                && votes > acc[base - stride]
                && votes >= acc[base + stride]
            {
                peaks.push((votes, t, r));
            }
        }
    }
    // Stable sort keeps (theta, rho) scan order among equal votes.
    peaks.sort_by(|a, b| b.0.cmp(&a.0));

    peaks
        .into_iter()
        .map(|(votes, t, r)| {
            let base = cell(t, r);
            let offset = parabolic_offset(
                f64::from(acc[base - 1]),
                f64::from(votes),
                f64::from(acc[base + 1]),
            );
            HoughLine {
                line: PolarLine::new((r as i64 - max_rho) as f64 + offset, angles[t]),
                votes,
            }
        })
        .collect()
}

/// Sub-sample position of a peak from its two neighbours, in
/// `[-0.5, 0.5]` sample steps.
///
/// A tie with one neighbour (an edge two pixels thick) lands halfway
/// between the two samples.
pub(crate) fn parabolic_offset(left: f64, center: f64, right: f64) -> f64 {
    let denom = (-2.0f64).mul_add(center, left + right);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}
