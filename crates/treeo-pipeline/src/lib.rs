//! treeo-pipeline: Trunk diameter measurement from a single photograph (sans-IO).
//!
//! A photograph showing a tree trunk and a reference card of known
//! physical width (an ID-1 card, 85.6 mm) is measured through:
//! card matching -> homography -> trunk band search -> segmentation ->
//! edge and line detection -> boundary pair selection -> diameter.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! images or byte slices and returns structured data. File handling and
//! the command line live in `treeo-bench`.

pub mod blur;
pub mod card;
pub mod color;
pub mod decode;
pub mod diagnostics;
pub mod edge;
pub mod features;
pub mod geometry;
pub mod gmm;
pub mod grabcut;
pub mod homography;
pub mod hough;
pub mod maxflow;
pub mod morphology;
pub mod pipeline;
pub mod render;
pub mod resize;
pub mod trunk;
pub mod types;

pub use card::{CardDetection, CardLocatorConfig, confidence_score, locate_card};
pub use diagnostics::{Clock, MeasureDiagnostics, MeasureReport, WebClock, measure_with_diagnostics};
pub use pipeline::{Diameter, Measurement, TrunkAttempt, measure_diameter};
pub use render::render_result;
pub use trunk::{TrunkArtifacts, TrunkFinder, TrunkLocator, TrunkLocatorConfig};
pub use types::{
    GrayImage, LabeledCorners, LineSegment, MeasureConfig, MeasureError, MeasurementResult, Point,
    PolarLine, Quad, RgbImage, SearchRegion, Status, TrunkEdges,
};

/// Measure the trunk diameter in `photo` against the reference `card`.
///
/// Runs every stage of [`Measurement`] in order. Never fails: an error
/// in any stage becomes a [`MeasurementResult`] carrying the matching
/// [`Status`] and no geometry.
///
/// # Pipeline steps
///
/// 1. Validate the configuration
/// 2. Locate the card (keypoint matching + RANSAC homography)
/// 3. Search the configured bands for the trunk (GrabCut, Canny, Hough)
/// 4. Convert the trunk width to millimetres using the card width
#[must_use]
pub fn measure(photo: &RgbImage, card: &RgbImage, config: &MeasureConfig) -> MeasurementResult {
    match run_stages(photo, card, config) {
        Ok(result) => result,
        Err(e) => {
            log::warn!("measurement failed ({}): {e}", e.status().code());
            MeasurementResult::failure(&e)
        }
    }
}

fn run_stages(
    photo: &RgbImage,
    card: &RgbImage,
    config: &MeasureConfig,
) -> Result<MeasurementResult, MeasureError> {
    Ok(Measurement::new(photo, card, config)?
        .locate_card()?
        .locate_trunk()?
        .compute_diameter()?
        .into_result())
}

/// Decode both images and [`measure`].
///
/// A reference card that is empty or cannot be decoded is reported as a
/// card-not-found result rather than an error.
///
/// # Errors
///
/// Returns [`MeasureError::EmptyInput`] if `photo_bytes` is empty.
/// Returns [`MeasureError::ImageDecode`] if the photograph's format is
/// unrecognized.
pub fn measure_bytes(
    photo_bytes: &[u8],
    card_bytes: &[u8],
    config: &MeasureConfig,
) -> Result<MeasurementResult, MeasureError> {
    let photo = decode::decode_rgb(photo_bytes)?;
    if let Err(e) = config.validate() {
        return Ok(MeasurementResult::failure(&e));
    }
    let card = match decode::decode_rgb(card_bytes) {
        Ok(card) => card,
        Err(e) => {
            log::warn!("reference card unusable: {e}");
            return Ok(MeasurementResult::failure(&MeasureError::NotFound(format!(
                "reference card image unusable: {e}"
            ))));
        }
    };
    Ok(measure(&photo, &card, config))
}
