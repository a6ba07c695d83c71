//! Trunk boundary localisation relative to a located card.
//!
//! A horizontal band above or below the card is segmented with GrabCut,
//! seeded by a vertical strip centered on the card (probable trunk) and
//! a vegetation color mask (certain background). The two trunk edges
//! are the strongest pair of near-vertical Hough lines in the
//! segmentation's edge map that do not cross inside the image.

use serde::{Deserialize, Serialize};

use crate::blur::gaussian_blur_rgb;
use crate::color::{HsvRange, in_range};
use crate::edge::{canny, count_edge_pixels};
use crate::geometry::order_card_points;
use crate::grabcut::{GrabCut, GrabLabel, LabelMap};
use crate::hough::{HoughConfig, HoughLine, detect_lines, parabolic_offset};
use crate::morphology::{Rect, close, open};
use crate::resize::{ResizeFilter, resize_to_width};
use crate::types::{
    GrayImage, LabeledCorners, MeasureError, Point, PolarLine, Quad, RgbImage, SearchRegion,
    TrunkEdges,
};

/// Bands with fewer rows than this are not searched.
const MIN_BAND_ROWS: u32 = 3;

/// Trunk locator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrunkLocatorConfig {
    /// Width the photograph is resized to.
    pub working_width: u32,
    /// Blur applied to the resized photograph.
    pub blur_sigma: f32,
    /// Half-width of the probable-trunk seed strip as a fraction of the
    /// band width.
    pub seed_band_half_width: f64,
    /// Colors marked as certain background.
    pub vegetation: HsvRange,
    /// Side of the square opening applied to the vegetation mask.
    pub green_open_size: u32,
    /// GrabCut iterations.
    pub grabcut_iterations: u32,
    /// Width of the rectangle cleaning the segmentation mask.
    pub mask_kernel_width: u32,
    /// Height of the rectangle cleaning the segmentation mask.
    pub mask_kernel_height: u32,
    /// Canny hysteresis low threshold.
    pub canny_low: f32,
    /// Canny hysteresis high threshold.
    pub canny_high: f32,
    /// Line detector.
    pub hough: HoughConfig,
    /// How far, in working pixels, a boundary line may slide onto the
    /// color step it was found near. `0` keeps the Hough lines as is.
    pub edge_refine_radius: u32,
}

impl TrunkLocatorConfig {
    /// Default working width in pixels.
    pub const DEFAULT_WORKING_WIDTH: u32 = 600;
    /// Default blur sigma (about a 3×3 kernel).
    pub const DEFAULT_BLUR_SIGMA: f32 = 0.8;
    /// Default seed strip half-width fraction.
    pub const DEFAULT_SEED_BAND_HALF_WIDTH: f64 = 0.11;
    /// Default vegetation opening size.
    pub const DEFAULT_GREEN_OPEN_SIZE: u32 = 3;
    /// Default GrabCut iterations.
    pub const DEFAULT_GRABCUT_ITERATIONS: u32 = 5;
    /// Default cleaning rectangle width.
    pub const DEFAULT_MASK_KERNEL_WIDTH: u32 = 3;
    /// Default cleaning rectangle height.
    pub const DEFAULT_MASK_KERNEL_HEIGHT: u32 = 7;
    /// Default Canny low threshold.
    pub const DEFAULT_CANNY_LOW: f32 = 50.0;
    /// Default Canny high threshold.
    pub const DEFAULT_CANNY_HIGH: f32 = 200.0;
    /// Default boundary refinement reach.
    pub const DEFAULT_EDGE_REFINE_RADIUS: u32 = 3;

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::InvalidConfig`] naming the offending
    /// field.
    pub fn validate(&self) -> Result<(), MeasureError> {
        if self.working_width == 0 {
            return Err(MeasureError::InvalidConfig(
                "trunk.working_width must be positive".to_string(),
            ));
        }
        if !(self.seed_band_half_width > 0.0 && self.seed_band_half_width <= 0.5) {
            return Err(MeasureError::InvalidConfig(format!(
                "trunk.seed_band_half_width must be in (0, 0.5], got {}",
                self.seed_band_half_width,
            )));
        }
        if self.grabcut_iterations == 0 {
            return Err(MeasureError::InvalidConfig(
                "trunk.grabcut_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.canny_low > 0.0 && self.canny_low <= self.canny_high) {
            return Err(MeasureError::InvalidConfig(format!(
                "trunk canny thresholds must satisfy 0 < low <= high, got {} / {}",
                self.canny_low, self.canny_high,
            )));
        }
        if self.hough.max_tilt_degrees > 89 {
            return Err(MeasureError::InvalidConfig(format!(
                "trunk.hough.max_tilt_degrees must be at most 89, got {}",
                self.hough.max_tilt_degrees,
            )));
        }
        Ok(())
    }
}

impl Default for TrunkLocatorConfig {
    fn default() -> Self {
        Self {
            working_width: Self::DEFAULT_WORKING_WIDTH,
            blur_sigma: Self::DEFAULT_BLUR_SIGMA,
            seed_band_half_width: Self::DEFAULT_SEED_BAND_HALF_WIDTH,
            vegetation: HsvRange::VEGETATION,
            green_open_size: Self::DEFAULT_GREEN_OPEN_SIZE,
            grabcut_iterations: Self::DEFAULT_GRABCUT_ITERATIONS,
            mask_kernel_width: Self::DEFAULT_MASK_KERNEL_WIDTH,
            mask_kernel_height: Self::DEFAULT_MASK_KERNEL_HEIGHT,
            canny_low: Self::DEFAULT_CANNY_LOW,
            canny_high: Self::DEFAULT_CANNY_HIGH,
            hough: HoughConfig::default(),
            edge_refine_radius: Self::DEFAULT_EDGE_REFINE_RADIUS,
        }
    }
}

/// Intermediate rasters from one band search, in working-image scale.
#[derive(Debug, Clone)]
pub struct TrunkArtifacts {
    /// Band that was searched.
    pub region: SearchRegion,
    /// First working-image row of the band.
    pub row_offset: u32,
    /// The band itself.
    pub crop: RgbImage,
    /// GrabCut seed labels (see [`GrabLabel::to_luma`]).
    pub seed_labels: GrayImage,
    /// Opened vegetation mask.
    pub green_mask: GrayImage,
    /// Cleaned foreground mask; `None` when segmentation failed.
    pub segmentation: Option<GrayImage>,
    /// Canny edges of the segmentation.
    pub edges: Option<GrayImage>,
    /// Every Hough line, strongest first, in band coordinates.
    pub lines: Vec<HoughLine>,
}

/// Something that can search a band of the photograph for the trunk.
///
/// The orchestrator drives its retry loop through this trait.
pub trait TrunkFinder {
    /// Locate both trunk edges in `region`, in photo coordinates.
    ///
    /// # Errors
    ///
    /// Any [`MeasureError`]; the caller decides whether to try another
    /// region.
    fn find_trunk(&mut self, region: SearchRegion) -> Result<TrunkEdges, MeasureError>;

    /// Artifacts recorded by previous searches, oldest first.
    fn take_artifacts(&mut self) -> Vec<TrunkArtifacts> {
        Vec::new()
    }
}

/// GrabCut + Hough trunk search on a downscaled copy of the photograph.
#[derive(Debug, Clone)]
pub struct TrunkLocator {
    config: TrunkLocatorConfig,
    working: RgbImage,
    ratio: f64,
    corners: LabeledCorners,
    record_artifacts: bool,
    artifacts: Vec<TrunkArtifacts>,
}

impl TrunkLocator {
    /// Prepare a search around `card`, given in photo coordinates.
    ///
    /// # Errors
    ///
    /// [`MeasureError::InvalidInput`] for an empty photograph or a card
    /// polygon with non-finite corners.
    pub fn new(
        photo: &RgbImage,
        card: &Quad,
        config: &TrunkLocatorConfig,
    ) -> Result<Self, MeasureError> {
        if photo.width() == 0 || photo.height() == 0 {
            return Err(MeasureError::InvalidInput("photograph is empty".to_string()));
        }
        if !card.is_finite() {
            return Err(MeasureError::InvalidInput(
                "card polygon has non-finite corners".to_string(),
            ));
        }
        let (resized, ratio) = resize_to_width(photo, config.working_width, ResizeFilter::Triangle);
        let working = gaussian_blur_rgb(&resized, config.blur_sigma);
        let corners = order_card_points(*card.scaled(ratio).points());
        log::debug!(
            "trunk locator: working image {}x{}, ratio {ratio:.4}, card {corners:?}",
            working.width(),
            working.height(),
        );
        Ok(Self {
            config: config.clone(),
            working,
            ratio,
            corners,
            record_artifacts: false,
            artifacts: Vec::new(),
        })
    }

    /// Keep intermediate rasters from every search.
    #[must_use]
    pub const fn with_artifacts(mut self, enabled: bool) -> Self {
        self.record_artifacts = enabled;
        self
    }

    /// Labeled card corners in working-image coordinates.
    #[must_use]
    pub const fn card_corners(&self) -> &LabeledCorners {
        &self.corners
    }

    /// First row and one-past-last row of `region` in the working image.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn band_rows(&self, region: SearchRegion) -> (u32, u32) {
        let rows = self.working.height();
        let clamp_row = |y: f64| y.round().clamp(0.0, f64::from(rows)) as u32;
        match region {
            SearchRegion::Above => (0, clamp_row(self.corners.top_left.y)),
            SearchRegion::Below => (
                clamp_row(self.corners.bottom_right.y),
                rows.saturating_sub(1),
            ),
        }
    }

    /// Probable-trunk strip `[cx − hw, cx + hw)` clamped to the band.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn seed_columns(&self, width: u32) -> (u32, u32) {
        let half = (self.config.seed_band_half_width * f64::from(width)).round();
        let cx = self.corners.center().x;
        let clamp_col = |x: f64| x.round().clamp(0.0, f64::from(width)) as u32;
        (clamp_col(cx - half), clamp_col(cx + half))
    }

    fn search(&mut self, region: SearchRegion) -> Result<TrunkEdges, MeasureError> {
        let width = self.working.width();
        let (y0, y1) = self.band_rows(region);
        if y1 <= y0 || y1 - y0 < MIN_BAND_ROWS {
            return Err(MeasureError::EmptySearchRegion(region));
        }
        let height = y1 - y0;
        let crop = image::imageops::crop_imm(&self.working, 0, y0, width, height).to_image();

        // ───── Seeds ─────
        let mut labels = LabelMap::new(width, height, GrabLabel::ProbableBackground);
        let (x_start, x_end) = self.seed_columns(width);
        labels.fill_columns(x_start, x_end, GrabLabel::ProbableForeground);
        let green_size = self.config.green_open_size;
        let green = open(
            &in_range(&crop, &self.config.vegetation),
            Rect::new(green_size, green_size),
        );
        labels.apply_mask(&green, GrabLabel::Background);
        log::debug!(
            "{region}: rows {y0}..{y1}, seed columns {x_start}..{x_end}, {} probable trunk pixels",
            labels.foreground_count(),
        );

        let mut artifacts = self.record_artifacts.then(|| TrunkArtifacts {
            region,
            row_offset: y0,
            crop: crop.clone(),
            seed_labels: labels.to_image(),
            green_mask: green.clone(),
            segmentation: None,
            edges: None,
            lines: Vec::new(),
        });

        // ───── Segmentation ─────
        let grabcut = GrabCut::with_iterations(self.config.grabcut_iterations);
        if let Err(e) = grabcut.run(&crop, &mut labels) {
            self.artifacts.extend(artifacts);
            return Err(e.into());
        }
        let kernel = Rect::new(self.config.mask_kernel_width, self.config.mask_kernel_height);
        let mask = close(&open(&labels.foreground_mask(), kernel), kernel);

        // ───── Lines ─────
        let edges = canny(&mask, self.config.canny_low, self.config.canny_high);
        let lines = detect_lines(&edges, &self.config.hough);
        log::debug!(
            "{region}: {} edge pixels, {} hough lines",
            count_edge_pixels(&edges),
            lines.len(),
        );

        if let Some(a) = artifacts.as_mut() {
            a.segmentation = Some(mask);
            a.edges = Some(edges);
            a.lines.clone_from(&lines);
        }
        self.artifacts.extend(artifacts);

        if lines.len() < 2 {
            return Err(MeasureError::AmbiguousGeometry(format!(
                "{} line(s) detected {region}, need 2",
                lines.len(),
            )));
        }
        let (first, second) = select_boundary_pair(
            &lines,
            f64::from(y0),
            f64::from(width),
            f64::from(self.working.height()),
        )
        .ok_or_else(|| {
            MeasureError::AmbiguousGeometry(format!(
                "no line {region} stays clear of the strongest one inside the image",
            ))
        })?;
        let radius = self.config.edge_refine_radius;
        let (first, second) = (
            refine_boundary(&crop, first, radius),
            refine_boundary(&crop, second, radius),
        );
        log::debug!(
            "{region}: boundaries at rho {:.2} / {:.2}",
            first.rho,
            second.rho,
        );

        let bottom_row = f64::from(height - 1);
        let segment = |line: PolarLine| {
            line.segment_between(0.0, bottom_row).ok_or_else(|| {
                MeasureError::AmbiguousGeometry(format!("horizontal trunk line {line:?}"))
            })
        };
        let edges = TrunkEdges::from_unordered(segment(first)?, segment(second)?);
        let offset = Point::new(0.0, f64::from(y0));
        let scale = 1.0 / self.ratio;
        Ok(TrunkEdges {
            left: edges.left.translated(offset).scaled(scale),
            right: edges.right.translated(offset).scaled(scale),
        })
    }
}

impl TrunkFinder for TrunkLocator {
    fn find_trunk(&mut self, region: SearchRegion) -> Result<TrunkEdges, MeasureError> {
        self.search(region)
    }

    fn take_artifacts(&mut self) -> Vec<TrunkArtifacts> {
        std::mem::take(&mut self.artifacts)
    }
}

/// Pick the two trunk boundaries from lines sorted strongest first.
///
/// The strongest line is one boundary. The other is the first later
/// line whose intersection with it, shifted down by `row_offset`, lies
/// outside the open rectangle `0 < x < width, 0 < y < height`. Parallel
/// lines never intersect and always qualify.
#[must_use]
pub fn select_boundary_pair(
    lines: &[HoughLine],
    row_offset: f64,
    width: f64,
    height: f64,
) -> Option<(PolarLine, PolarLine)> {
    let (seed, rest) = lines.split_first()?;
    rest.iter()
        .find(|candidate| {
            seed.line
                .intersection(&candidate.line)
                .is_none_or(|p| {
                    let y = p.y + row_offset;
                    !(p.x > 0.0 && p.x < width && y > 0.0 && y < height)
                })
        })
        .map(|other| (seed.line, other.line))
}

/// Slide a boundary line sideways onto the strongest color step of
/// `crop` within `radius` pixels.
///
/// The segmentation can drop or add a column of blended pixels along
/// each trunk edge, while the color transition itself stays centered on
/// the true boundary. The step strength is summed over every row whose
/// search window lies inside the crop, sampled every half pixel, and
/// its peak located to sub-sample precision. The line is returned
/// unchanged when that peak sits on the window border or the crop is
/// flat around the line.
#[must_use]
pub fn refine_boundary(crop: &RgbImage, line: PolarLine, radius: u32) -> PolarLine {
    let width = crop.width();
    if radius == 0 || width < 2 {
        return line;
    }
    let reach = f64::from(radius) + 0.5;
    let last = f64::from(width - 1);
    let rows: Vec<(u32, f64)> = (0..crop.height())
        .filter_map(|y| line.x_at(f64::from(y)).map(|x| (y, x)))
        .filter(|&(_, x)| x - reach >= 0.0 && x + reach <= last)
        .collect();
    if rows.is_empty() {
        return line;
    }

    let start = -f64::from(radius);
    let profile: Vec<f64> = (0..=4 * radius)
        .map(|i| {
            let shift = 0.5f64.mul_add(f64::from(i), start);
            rows.iter()
                .map(|&(y, x)| {
                    color_distance(
                        sample_row(crop, y, x + shift - 0.5),
                        sample_row(crop, y, x + shift + 0.5),
                    )
                })
                .sum::<f64>()
        })
        .collect();

    let Some((peak, &best)) = profile
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
    else {
        return line;
    };
    if best <= f64::EPSILON || peak == 0 || peak + 1 == profile.len() {
        return line;
    }
    let steps = parabolic_offset(profile[peak - 1], best, profile[peak + 1]);
    let Ok(peak) = u32::try_from(peak) else {
        return line;
    };
    let shift = 0.5f64.mul_add(f64::from(peak) + steps, start);
    PolarLine::new(shift.mul_add(line.theta.cos(), line.rho), line.theta)
}

/// Color at fractional column `x` of row `y`, interpolated linearly.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_row(image: &RgbImage, y: u32, x: f64) -> [f64; 3] {
    let left = x.floor();
    let t = x - left;
    let k = left as u32;
    let a = image.get_pixel(k, y).0;
    let b = image.get_pixel((k + 1).min(image.width() - 1), y).0;
    [0, 1, 2].map(|c| f64::from(a[c]).mul_add(1.0 - t, f64::from(b[c]) * t))
}

fn color_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(&b)
        .map(|(p, q)| (p - q) * (p - q))
        .sum::<f64>()
        .sqrt()
}
