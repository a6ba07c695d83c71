//! Measurement diagnostics: timing and metrics for each stage.
//!
//! [`measure_with_diagnostics`] runs the same stages as
//! [`crate::measure`] while timing each one through a caller-supplied
//! [`Clock`], so the library itself never reads the system time.
//! [`WebClock`] is a ready-made clock backed by the `web-time` crate
//! (`performance.now()` on WASM, `std::time::Instant` elsewhere).
//!
//! Durations are serialized as fractional seconds (`f64`) because
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::{Measurement, TrunkAttempt};
use crate::trunk::{TrunkArtifacts, TrunkFinder};
use crate::types::{
    MeasureConfig, MeasureError, MeasurementResult, RgbImage, SearchRegion, Status,
};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A monotonic time source.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`web_time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> Self::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &Self::Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from a single measurement.
///
/// Stages after a failure did not run and are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureDiagnostics {
    /// Stage 1: reference card search.
    pub card_location: StageDiagnostics,
    /// Stage 2: trunk search over the configured bands.
    pub trunk_location: Option<StageDiagnostics>,
    /// Stage 3: diameter computation.
    pub diameter: Option<StageDiagnostics>,
    /// Total wall-clock duration of the measurement (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary of inputs and outcome.
    pub summary: MeasureSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Card search metrics.
    CardLocation {
        /// Matches surviving the ratio test.
        good_matches: usize,
        /// Matches consistent with the homography.
        inliers: usize,
        /// Rectangularity of the located card.
        confidence: f64,
    },
    /// Trunk search metrics.
    TrunkLocation {
        /// Every band tried, in order.
        attempts: Vec<TrunkAttempt>,
        /// The band that produced the edges.
        region_used: SearchRegion,
    },
    /// Diameter metrics.
    Diameter {
        /// Trunk width in pixels.
        trunk_width_px: f64,
        /// Card width in pixels.
        card_width_px: f64,
        /// Resulting diameter.
        diameter_mm: f64,
    },
    /// The stage failed.
    Failed {
        /// Why.
        error: String,
    },
}

/// High-level summary of a measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureSummary {
    /// Photograph width in pixels.
    pub image_width: u32,
    /// Photograph height in pixels.
    pub image_height: u32,
    /// Reference card image width in pixels.
    pub card_width: u32,
    /// Reference card image height in pixels.
    pub card_height: u32,
    /// Outcome.
    pub status: Status,
    /// Diameter when the measurement succeeded.
    pub diameter_mm: Option<f64>,
}

/// Intermediate rasters kept when `produce_debug_artifacts` is set.
#[derive(Debug, Clone, Default)]
pub struct DebugArtifacts {
    /// One entry per band search that got as far as seeding.
    pub trunk_searches: Vec<TrunkArtifacts>,
}

/// Everything [`measure_with_diagnostics`] produces.
#[derive(Debug, Clone)]
pub struct MeasureReport {
    /// The measurement itself, identical to [`crate::measure`]'s.
    pub result: MeasurementResult,
    /// Per-stage timing and metrics.
    pub diagnostics: MeasureDiagnostics,
    /// Debug rasters, when requested by the configuration.
    pub artifacts: Option<DebugArtifacts>,
}

/// Run a measurement, timing every stage with `clock`.
#[must_use]
pub fn measure_with_diagnostics<C: Clock>(
    photo: &RgbImage,
    card: &RgbImage,
    config: &MeasureConfig,
    clock: &C,
) -> MeasureReport {
    let total_start = clock.now();
    let mut artifacts = config.produce_debug_artifacts.then(DebugArtifacts::default);
    let mut trunk_location = None;
    let mut diameter = None;

    // ───── Stage 1: card ─────
    let start = clock.now();
    let card_stage = Measurement::new(photo, card, config).and_then(|p| p.locate_card());
    let card_location = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: match &card_stage {
            Ok(located) => StageMetrics::CardLocation {
                good_matches: located.detection().good_matches,
                inliers: located.detection().inliers,
                confidence: located.detection().confidence,
            },
            Err(e) => failed(e),
        },
    };

    let outcome = card_stage.and_then(|located| {
        // ───── Stage 2: trunk ─────
        let start = clock.now();
        let mut locator = match located.trunk_locator() {
            Ok(locator) => locator,
            Err(e) => {
                trunk_location = Some(StageDiagnostics {
                    duration: clock.elapsed(&start),
                    metrics: failed(&e),
                });
                return Err(e);
            }
        };
        let trunk_stage = located.locate_trunk_with(&mut locator);
        if let Some(a) = artifacts.as_mut() {
            a.trunk_searches = locator.take_artifacts();
        }
        trunk_location = Some(StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: match &trunk_stage {
                Ok(t) => StageMetrics::TrunkLocation {
                    attempts: t.attempts().to_vec(),
                    region_used: t.region(),
                },
                Err(e) => failed(e),
            },
        });

        // ───── Stage 3: diameter ─────
        let start = clock.now();
        let computed = trunk_stage?.compute_diameter();
        diameter = Some(StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: match &computed {
                Ok(c) => StageMetrics::Diameter {
                    trunk_width_px: c.diameter().trunk_width_px,
                    card_width_px: c.diameter().card_width_px,
                    diameter_mm: c.diameter().diameter_mm,
                },
                Err(e) => failed(e),
            },
        });
        computed
    });

    let result = match outcome {
        Ok(computed) => computed.into_result(),
        Err(e) => {
            log::warn!("measurement failed with status {}: {e}", e.status().code());
            MeasurementResult::failure(&e)
        }
    };

    let diagnostics = MeasureDiagnostics {
        card_location,
        trunk_location,
        diameter,
        total_duration: clock.elapsed(&total_start),
        summary: MeasureSummary {
            image_width: photo.width(),
            image_height: photo.height(),
            card_width: card.width(),
            card_height: card.height(),
            status: result.status,
            diameter_mm: result.diameter_mm,
        },
    };
    MeasureReport {
        result,
        diagnostics,
        artifacts,
    }
}

fn failed(error: &MeasureError) -> StageMetrics {
    StageMetrics::Failed {
        error: error.to_string(),
    }
}

impl MeasureDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Measurement Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Photo: {}x{}  Card: {}x{}",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.card_width,
            self.summary.card_height,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut stages = vec![("Card Location", &self.card_location)];
        if let Some(ref t) = self.trunk_location {
            stages.push(("Trunk Location", t));
        }
        if let Some(ref d) = self.diameter {
            stages.push(("Diameter", d));
        }
        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        let outcome = self
            .summary
            .diameter_mm
            .map_or_else(|| "no diameter".to_string(), |d| format!("{d:.1} mm"));
        lines.push(format!(
            "Status: {} ({:?})  |  {outcome}",
            self.summary.status.code(),
            self.summary.status,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::CardLocation {
            good_matches,
            inliers,
            confidence,
        } => format!("{good_matches} matches, {inliers} inliers, confidence={confidence:.3}"),
        StageMetrics::TrunkLocation {
            attempts,
            region_used,
        } => format!("{region_used} after {} attempt(s)", attempts.len()),
        StageMetrics::Diameter {
            trunk_width_px,
            card_width_px,
            diameter_mm,
        } => format!("{trunk_width_px:.1}px / {card_width_px:.1}px -> {diameter_mm:.1}mm"),
        StageMetrics::Failed { error } => format!("FAILED: {error}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// Clock that advances one millisecond per reading.
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn failed_card_stage_skips_later_stages() {
        let photo = RgbImage::from_pixel(200, 150, image::Rgb([90, 90, 90]));
        let card = RgbImage::from_pixel(60, 40, image::Rgb([200, 200, 200]));
        let report = measure_with_diagnostics(
            &photo,
            &card,
            &MeasureConfig::default(),
            &TickClock(Cell::new(0)),
        );
        assert_eq!(report.result.status, Status::CardNotFound);
        assert!(matches!(
            report.diagnostics.card_location.metrics,
            StageMetrics::Failed { .. }
        ));
        assert!(report.diagnostics.trunk_location.is_none());
        assert!(report.diagnostics.diameter.is_none());
        assert!(report.artifacts.is_none());
        assert!(report.diagnostics.total_duration >= report.diagnostics.card_location.duration);
    }

    #[test]
    fn report_mentions_every_stage_that_ran() {
        let diag = MeasureDiagnostics {
            card_location: StageDiagnostics {
                duration: Duration::from_millis(40),
                metrics: StageMetrics::CardLocation {
                    good_matches: 30,
                    inliers: 25,
                    confidence: 0.98,
                },
            },
            trunk_location: Some(StageDiagnostics {
                duration: Duration::from_millis(50),
                metrics: StageMetrics::TrunkLocation {
                    attempts: vec![TrunkAttempt {
                        region: SearchRegion::Above,
                        error: None,
                    }],
                    region_used: SearchRegion::Above,
                },
            }),
            diameter: Some(StageDiagnostics {
                duration: Duration::from_micros(10),
                metrics: StageMetrics::Diameter {
                    trunk_width_px: 300.0,
                    card_width_px: 200.0,
                    diameter_mm: 128.4,
                },
            }),
            total_duration: Duration::from_millis(91),
            summary: MeasureSummary {
                image_width: 600,
                image_height: 560,
                card_width: 120,
                card_height: 76,
                status: Status::Success,
                diameter_mm: Some(128.4),
            },
        };
        let report = diag.report();
        assert!(report.contains("Card Location"));
        assert!(report.contains("Trunk Location"));
        assert!(report.contains("Diameter"));
        assert!(report.contains("128.4 mm"));
    }

    #[test]
    fn diagnostics_json_roundtrip_keeps_durations() {
        let diag = StageDiagnostics {
            duration: Duration::from_millis(1500),
            metrics: StageMetrics::Failed {
                error: "reference card not found".to_string(),
            },
        };
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("1.5"), "{json}");
        let back: StageDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{"duration": -1.0, "metrics": {"Failed": {"error": "x"}}}"#;
        assert!(serde_json::from_str::<StageDiagnostics>(json).is_err());
    }
}
