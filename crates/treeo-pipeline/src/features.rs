//! Scale- and rotation-tolerant keypoints with binary descriptors.
//!
//! Keypoints are FAST-9 corners ([`imageproc::corners::corners_fast9`])
//! found on every level of an image pyramid, thinned by greedy 3×3
//! non-maximum suppression. Each keypoint gets an orientation from the
//! intensity centroid of a circular patch and a 256-bit descriptor made
//! of pairwise brightness comparisons (BRIEF) rotated by that
//! orientation and sampled on a smoothed copy of the level.
//!
//! Descriptors are compared by Hamming distance;
//! [`match_ratio_test`] keeps only matches clearly better than the
//! runner-up.

use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::blur::gaussian_blur;
use crate::types::Point;

/// Number of brightness comparisons per descriptor.
const DESCRIPTOR_BITS: usize = 256;

/// Keypoint detection and description parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Upper bound on keypoints across all pyramid levels.
    pub max_features: usize,
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Number of pyramid levels (level 0 is the input).
    pub pyramid_levels: usize,
    /// Downscale factor between consecutive levels.
    pub scale_factor: f64,
    /// Radius of the orientation and descriptor patch in pixels.
    pub patch_radius: u32,
    /// Smoothing applied to a level before descriptor sampling.
    pub descriptor_sigma: f32,
    /// Seed of the comparison pattern. Images can only be matched
    /// against descriptors built with the same seed.
    pub pattern_seed: u64,
}

impl FeatureConfig {
    /// Default keypoint budget.
    pub const DEFAULT_MAX_FEATURES: usize = 1000;
    /// Default FAST threshold.
    pub const DEFAULT_FAST_THRESHOLD: u8 = 20;
    /// Default pyramid depth.
    pub const DEFAULT_PYRAMID_LEVELS: usize = 6;
    /// Default scale step between levels.
    pub const DEFAULT_SCALE_FACTOR: f64 = 1.2;
    /// Default patch radius.
    pub const DEFAULT_PATCH_RADIUS: u32 = 15;
    /// Default descriptor smoothing.
    pub const DEFAULT_DESCRIPTOR_SIGMA: f32 = 2.0;

    /// Pixels excluded along every border of a level.
    const fn border(&self) -> u32 {
        self.patch_radius + 1
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_features: Self::DEFAULT_MAX_FEATURES,
            fast_threshold: Self::DEFAULT_FAST_THRESHOLD,
            pyramid_levels: Self::DEFAULT_PYRAMID_LEVELS,
            scale_factor: Self::DEFAULT_SCALE_FACTOR,
            patch_radius: Self::DEFAULT_PATCH_RADIUS,
            descriptor_sigma: Self::DEFAULT_DESCRIPTOR_SIGMA,
            pattern_seed: 0,
        }
    }
}

/// A detected keypoint in input-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// Position in the input image.
    pub position: Point,
    /// Patch orientation in radians.
    pub angle: f64,
    /// Pyramid level the keypoint was found on.
    pub level: usize,
    /// FAST corner score.
    pub response: f32,
}

/// A 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor([u64; 4]);

impl Descriptor {
    /// Number of differing bits.
    #[must_use]
    pub fn hamming(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// A keypoint with its descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    /// Where the feature is.
    pub keypoint: Keypoint,
    /// What it looks like.
    pub descriptor: Descriptor,
}

/// A query feature paired with its best train feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureMatch {
    /// Index into the query features.
    pub query: usize,
    /// Index into the train features.
    pub train: usize,
    /// Hamming distance of the pair.
    pub distance: u32,
}

/// The fixed set of point pairs compared by every descriptor.
struct Pattern {
    pairs: Vec<[(f64, f64); 2]>,
}

impl Pattern {
    /// Sample point pairs uniformly inside a disk that stays within
    /// `radius` after any rotation and rounding.
    fn new(radius: u32, seed: u64) -> Self {
        let limit = f64::from(radius.max(2)) - 1.0;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sample = move || loop {
            let x: f64 = rng.gen_range(-limit..=limit);
            let y: f64 = rng.gen_range(-limit..=limit);
            if x.mul_add(x, y * y) <= limit * limit {
                return (x, y);
            }
        };
        let pairs = (0..DESCRIPTOR_BITS).map(|_| [sample(), sample()]).collect();
        Self { pairs }
    }
}

/// Detect keypoints on an image pyramid and compute their descriptors.
///
/// Returns an empty list for images too small to hold a single patch.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn detect_and_describe(image: &GrayImage, config: &FeatureConfig) -> Vec<Feature> {
    let border = config.border();
    let min_side = 2 * border + 1;
    let (w0, h0) = image.dimensions();
    if w0 < min_side || h0 < min_side {
        return Vec::new();
    }

    let scale_factor = config.scale_factor.max(1.01);
    let mut levels: Vec<GrayImage> = Vec::new();
    for level in 0..config.pyramid_levels.max(1) {
        let scale = scale_factor.powi(level as i32);
        let w = (f64::from(w0) / scale).round() as u32;
        let h = (f64::from(h0) / scale).round() as u32;
        if w < min_side || h < min_side {
            break;
        }
        let img = if level == 0 {
            image.clone()
        } else {
            image::imageops::resize(image, w, h, image::imageops::FilterType::Triangle)
        };
        levels.push(img);
    }

    let total_area: f64 = levels
        .iter()
        .map(|l| f64::from(l.width()) * f64::from(l.height()))
        .sum();
    let pattern = Pattern::new(config.patch_radius, config.pattern_seed);

    let mut features = Vec::new();
    for (level, img) in levels.iter().enumerate() {
        let area = f64::from(img.width()) * f64::from(img.height());
        let budget = (config.max_features as f64 * area / total_area).round() as usize;
        if budget == 0 {
            continue;
        }
        let corners = strongest_corners(img, config.fast_threshold, border, budget);
        let smooth = gaussian_blur(img, config.descriptor_sigma);
        let sx = f64::from(w0) / f64::from(img.width());
        let sy = f64::from(h0) / f64::from(img.height());

        for (x, y, response) in corners {
            let angle = centroid_angle(img, x, y, config.patch_radius);
            let descriptor = describe(&smooth, x, y, angle, &pattern);
            features.push(Feature {
                keypoint: Keypoint {
                    position: Point::new(f64::from(x) * sx, f64::from(y) * sy),
                    angle,
                    level,
                    response,
                },
                descriptor,
            });
        }
    }
    log::debug!(
        "detected {} features over {} pyramid levels",
        features.len(),
        levels.len(),
    );
    features
}

/// FAST corners away from the border, strongest first, with greedy
/// 3×3 non-maximum suppression, truncated to `budget`.
fn strongest_corners(
    img: &GrayImage,
    threshold: u8,
    border: u32,
    budget: usize,
) -> Vec<(u32, u32, f32)> {
    let (w, h) = img.dimensions();
    let mut corners: Vec<(u32, u32, f32)> = imageproc::corners::corners_fast9(img, threshold)
        .into_iter()
        .filter(|c| c.x >= border && c.y >= border && c.x < w - border && c.y < h - border)
        .map(|c| (c.x, c.y, c.score))
        .collect();
    corners.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.1.cmp(&b.1)).then(a.0.cmp(&b.0)));

    let mut taken = vec![false; w as usize * h as usize];
    let mut kept = Vec::with_capacity(budget.min(corners.len()));
    for (x, y, score) in corners {
        let blocked = (y - 1..=y + 1)
            .any(|ny| (x - 1..=x + 1).any(|nx| taken[ny as usize * w as usize + nx as usize]));
        if blocked {
            continue;
        }
        taken[y as usize * w as usize + x as usize] = true;
        kept.push((x, y, score));
        if kept.len() == budget {
            break;
        }
    }
    kept
}

/// Orientation of the vector from the keypoint to the intensity
/// centroid of the surrounding disk.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn centroid_angle(img: &GrayImage, x: u32, y: u32, radius: u32) -> f64 {
    let r = i64::from(radius);
    let (cx, cy) = (i64::from(x), i64::from(y));
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let value = f64::from(img.get_pixel((cx + dx) as u32, (cy + dy) as u32).0[0]);
            m10 += dx as f64 * value;
            m01 += dy as f64 * value;
        }
    }
    m01.atan2(m10)
}

/// Rotated BRIEF: bit `i` is set when the first point of pair `i` is
/// darker than the second, both rotated by `angle` around the keypoint.
#[allow(clippy::cast_possible_truncation)]
fn describe(smooth: &GrayImage, x: u32, y: u32, angle: f64, pattern: &Pattern) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let (fx, fy) = (f64::from(x), f64::from(y));
    let sample = |(px, py): (f64, f64)| {
        let rx = px.mul_add(cos, -(py * sin));
        let ry = px.mul_add(sin, py * cos);
        let sx = (fx + rx).round().clamp(0.0, f64::from(smooth.width() - 1)) as u32;
        let sy = (fy + ry).round().clamp(0.0, f64::from(smooth.height() - 1)) as u32;
        smooth.get_pixel(sx, sy).0[0]
    };

    let mut bits = [0u64; 4];
    for (i, [a, b]) in pattern.pairs.iter().enumerate() {
        if sample(*a) < sample(*b) {
            bits[i / 64] |= 1 << (i % 64);
        }
    }
    Descriptor(bits)
}

/// Two-nearest-neighbour matching with a ratio test.
///
/// For every query feature the closest and second-closest train
/// features are found by brute force; the match is kept when
/// `best < ratio · second_best`. Queries with fewer than two candidates
/// are dropped because their ambiguity cannot be judged.
#[must_use]
pub fn match_ratio_test(query: &[Feature], train: &[Feature], ratio: f64) -> Vec<FeatureMatch> {
    if train.len() < 2 {
        return Vec::new();
    }
    let mut matches = Vec::new();
    for (qi, q) in query.iter().enumerate() {
        let mut best = (u32::MAX, 0usize);
        let mut second = u32::MAX;
        for (ti, t) in train.iter().enumerate() {
            let d = q.descriptor.hamming(&t.descriptor);
            if d < best.0 {
                second = best.0;
                best = (d, ti);
            } else if d < second {
                second = d;
            }
        }
        if f64::from(best.0) < ratio * f64::from(second) {
            matches.push(FeatureMatch {
                query: qi,
                train: best.1,
                distance: best.0,
            });
        }
    }
    matches
}
