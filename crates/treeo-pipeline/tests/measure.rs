//! End-to-end measurements on synthetic photographs: a textured card
//! pasted onto a brown trunk standing in front of green foliage.

#![allow(clippy::unwrap_used, clippy::panic)]

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use treeo_pipeline::{
    MeasureConfig, MeasureError, Measurement, Point, SearchRegion, Status, WebClock, measure,
    measure_bytes, measure_with_diagnostics, render_result,
};

const GREEN: Rgb<u8> = Rgb([40, 140, 40]);
const BROWN: Rgb<u8> = Rgb([110, 75, 45]);

const PHOTO_WIDTH: u32 = 600;
const PHOTO_HEIGHT: u32 = 560;
const TRUNK_COLUMNS: (u32, u32) = (200, 400);
const CARD_WIDTH: u32 = 160;
const CARD_HEIGHT: u32 = 100;
const CARD_ORIGIN: (u32, u32) = (220, 240);

/// 200 px of trunk against 160 px of card.
const EXPECTED_DIAMETER_MM: f64 = 200.0 / 160.0 * 85.6;

/// Random gray 8×8 blocks: plenty of corners, no repetition.
fn card_image() -> RgbImage {
    let mut rng = StdRng::seed_from_u64(7);
    let cols = CARD_WIDTH.div_ceil(8);
    let rows = CARD_HEIGHT.div_ceil(8);
    let blocks: Vec<u8> = (0..cols * rows).map(|_| rng.gen_range(0..=255)).collect();
    RgbImage::from_fn(CARD_WIDTH, CARD_HEIGHT, |x, y| {
        let v = blocks[(y / 8 * cols + x / 8) as usize];
        Rgb([v, v, v])
    })
}

/// Foliage with a vertical trunk over [`TRUNK_COLUMNS`] starting at row
/// `trunk_from`, and the card pasted at [`CARD_ORIGIN`].
fn scene(trunk_from: u32) -> RgbImage {
    scene_with(TRUNK_COLUMNS, trunk_from)
}

fn scene_with(trunk: (u32, u32), trunk_from: u32) -> RgbImage {
    let mut photo = RgbImage::from_fn(PHOTO_WIDTH, PHOTO_HEIGHT, |x, y| {
        if y >= trunk_from && (trunk.0..trunk.1).contains(&x) {
            BROWN
        } else {
            GREEN
        }
    });
    image::imageops::overlay(
        &mut photo,
        &card_image(),
        i64::from(CARD_ORIGIN.0),
        i64::from(CARD_ORIGIN.1),
    );
    photo
}

fn config() -> MeasureConfig {
    let mut config = MeasureConfig::default();
    config.card.working_width = PHOTO_WIDTH;
    config.trunk.working_width = 300;
    config
}

fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[test]
fn measures_trunk_above_card() {
    let result = measure(&scene(0), &card_image(), &config());
    assert_eq!(result.status, Status::Success, "{result:?}");
    assert_eq!(result.status_code(), 0);
    assert_eq!(result.search_region, Some(SearchRegion::Above));
    assert!(result.message.is_none());

    let card = result.card_polygon.unwrap();
    let (x0, y0) = (f64::from(CARD_ORIGIN.0), f64::from(CARD_ORIGIN.1));
    let (w, h) = (f64::from(CARD_WIDTH), f64::from(CARD_HEIGHT));
    let expected = [
        Point::new(x0, y0),
        Point::new(x0 + w, y0),
        Point::new(x0 + w, y0 + h),
        Point::new(x0, y0 + h),
    ];
    for (found, want) in card.points().iter().zip(expected) {
        assert!(found.distance(want) < 3.0, "corner {found:?}, expected {want:?}");
    }
    assert!(result.card_confidence > 0.9, "{}", result.card_confidence);

    let diameter = result.diameter_mm.unwrap();
    assert!(
        (diameter - EXPECTED_DIAMETER_MM).abs() < EXPECTED_DIAMETER_MM * 0.05,
        "diameter {diameter}, expected about {EXPECTED_DIAMETER_MM}"
    );

    // Left-top, left-bottom, right-top, right-bottom; the band ends at the card.
    let trunk = result.trunk_polygon.unwrap();
    assert!((trunk[0].x - 200.0).abs() < 4.0, "{trunk:?}");
    assert!((trunk[2].x - 400.0).abs() < 4.0, "{trunk:?}");
    assert!(trunk[0].y.abs() < 1e-9);
    assert!(trunk[1].y < y0 && trunk[1].y > y0 - 5.0, "{trunk:?}");
}

#[test]
fn falls_back_to_band_below_card() {
    let result = measure(&scene(CARD_ORIGIN.1), &card_image(), &config());
    assert_eq!(result.status, Status::Success, "{result:?}");
    assert_eq!(result.search_region, Some(SearchRegion::Below));
    let trunk = result.trunk_polygon.unwrap();
    assert!(trunk[0].y > f64::from(CARD_ORIGIN.1 + CARD_HEIGHT) - 5.0, "{trunk:?}");
    let diameter = result.diameter_mm.unwrap();
    assert!((diameter - EXPECTED_DIAMETER_MM).abs() < EXPECTED_DIAMETER_MM * 0.05);
}

#[test]
fn diameter_matches_ground_truth() {
    let cases = [
        // Width.
        ((240, 360), 0),
        ((150, 450), 0),
        // Offset from the card center.
        ((180, 380), 0),
        ((260, 420), 0),
        // Trunk only below the card.
        (TRUNK_COLUMNS, CARD_ORIGIN.1),
        ((150, 450), CARD_ORIGIN.1),
        ((260, 420), CARD_ORIGIN.1),
    ];
    for (trunk, trunk_from) in cases {
        let result = measure(&scene_with(trunk, trunk_from), &card_image(), &config());
        let expected = f64::from(trunk.1 - trunk.0) / f64::from(CARD_WIDTH) * 85.6;
        let diameter = result
            .diameter_mm
            .unwrap_or_else(|| panic!("{trunk:?} from row {trunk_from}: {result:?}"));
        assert!(
            (diameter - expected).abs() < expected * 0.02,
            "{trunk:?} from row {trunk_from}: {diameter} mm, expected {expected}"
        );
        let polygon = result.trunk_polygon.unwrap();
        assert!((polygon[0].x - f64::from(trunk.0)).abs() < 2.0, "{polygon:?}");
        assert!((polygon[2].x - f64::from(trunk.1)).abs() < 2.0, "{polygon:?}");
    }
}

#[test]
fn no_trunk_anywhere_reports_status_two() {
    let mut photo = RgbImage::from_pixel(PHOTO_WIDTH, PHOTO_HEIGHT, GREEN);
    image::imageops::overlay(&mut photo, &card_image(), 220, 240);
    let result = measure(&photo, &card_image(), &config());
    assert_eq!(result.status, Status::TrunkNotFound, "{result:?}");
    assert_eq!(result.status_code(), 2);
    assert!(result.card_polygon.is_none());
    assert!(result.trunk_polygon.is_none());
    assert!(result.diameter_mm.is_none());
}

#[test]
fn blank_photo_reports_card_not_found() {
    let photo = RgbImage::from_pixel(PHOTO_WIDTH, PHOTO_HEIGHT, GREEN);
    let result = measure(&photo, &card_image(), &config());
    assert_eq!(result.status, Status::CardNotFound);
    assert!(result.card_polygon.is_none());
    assert!(result.trunk_polygon.is_none());
    assert!(result.diameter_mm.is_none());
    assert!(result.card_confidence.abs() < f64::EPSILON);
}

#[test]
fn blank_card_reports_card_not_found() {
    let card = RgbImage::from_pixel(CARD_WIDTH, CARD_HEIGHT, Rgb([128, 128, 128]));
    let result = measure(&scene(0), &card, &config());
    assert_eq!(result.status, Status::CardNotFound);
    assert!(result.card_polygon.is_none());
    assert!(result.diameter_mm.is_none());
}

#[test]
fn staged_measurement_agrees_with_measure() {
    let photo = scene(0);
    let card = card_image();
    let config = config();
    let located = Measurement::new(&photo, &card, &config)
        .unwrap()
        .locate_card()
        .unwrap();
    assert!(located.detection().inliers >= 4);
    let trunk = located.locate_trunk().unwrap();
    assert_eq!(trunk.region(), SearchRegion::Above);
    assert_eq!(trunk.attempts().len(), 1);
    let staged = trunk.compute_diameter().unwrap().into_result();
    assert_eq!(staged, measure(&photo, &card, &config));
}

#[test]
fn trunk_search_failure_lists_every_band() {
    let mut photo = RgbImage::from_pixel(PHOTO_WIDTH, PHOTO_HEIGHT, GREEN);
    image::imageops::overlay(&mut photo, &card_image(), 220, 240);
    let card = card_image();
    let config = config();
    let err = Measurement::new(&photo, &card, &config)
        .unwrap()
        .locate_card()
        .unwrap()
        .locate_trunk()
        .unwrap_err();
    let MeasureError::TrunkNotFound(message) = &err else {
        panic!("unexpected error {err:?}");
    };
    assert!(message.contains("above"), "{message}");
    assert!(message.contains("below"), "{message}");
}

#[test]
fn repeated_runs_are_identical() {
    let photo = scene(0);
    let card = card_image();
    let config = config();
    assert_eq!(measure(&photo, &card, &config), measure(&photo, &card, &config));
}

#[test]
fn measure_bytes_decodes_png_inputs() {
    let photo = scene(0);
    let card = card_image();
    let config = config();
    let result = measure_bytes(&encode_png(&photo), &encode_png(&card), &config).unwrap();
    assert_eq!(result, measure(&photo, &card, &config));
}

#[test]
fn diagnostics_cover_every_stage() {
    let mut config = config();
    config.produce_debug_artifacts = true;
    let report = measure_with_diagnostics(&scene(CARD_ORIGIN.1), &card_image(), &config, &WebClock);
    assert!(report.result.is_success());
    assert!(report.diagnostics.trunk_location.is_some());
    assert!(report.diagnostics.diameter.is_some());
    assert_eq!(report.diagnostics.summary.image_width, PHOTO_WIDTH);
    // Above failed, Below succeeded: both searches keep their rasters.
    let artifacts = report.artifacts.unwrap();
    assert_eq!(artifacts.trunk_searches.len(), 2);
    assert_eq!(artifacts.trunk_searches[0].region, SearchRegion::Above);
    assert_eq!(artifacts.trunk_searches[1].region, SearchRegion::Below);

    let text = report.diagnostics.report();
    assert!(text.contains("Card Location"), "{text}");
    let json = serde_json::to_string(&report.diagnostics).unwrap();
    assert!(json.contains("\"status\""), "{json}");
}

#[test]
fn overlay_keeps_photo_size() {
    let photo = scene(0);
    let result = measure(&photo, &card_image(), &config());
    let overlay = render_result(&photo, &result);
    assert_eq!(overlay.dimensions(), photo.dimensions());
    // Background far from any drawing is untouched.
    let corner = overlay.get_pixel(5, PHOTO_HEIGHT - 5).0;
    assert_eq!(corner, [GREEN.0[0], GREEN.0[1], GREEN.0[2], 255]);
}
