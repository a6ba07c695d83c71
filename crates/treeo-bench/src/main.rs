//! treeo-bench: CLI tool for trunk measurements and diagnostics.
//!
//! Measures the trunk diameter in a photograph with configurable
//! parameters, printing per-stage diagnostics. Useful for:
//!
//! - Tuning working widths and the match ratio on real photographs
//! - Inspecting the intermediate rasters of every trunk band search
//! - Measuring per-stage durations to identify bottlenecks
//!
//! The process exit code is the measurement's status code (0 success,
//! 1 card not found, 2 trunk not found, 3 diameter or input failure).
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin treeo-bench -- --card <CARD> [OPTIONS] <PHOTO>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{ArgAction, Parser, ValueEnum};
use serde::Serialize;
use treeo_pipeline::diagnostics::{Clock, DebugArtifacts, MeasureDiagnostics};
use treeo_pipeline::{
    CardLocatorConfig, MeasureConfig, MeasurementResult, RgbImage, SearchRegion, Status,
    TrunkLocatorConfig,
};

/// Trunk diameter measurement and diagnostics for treeo.
///
/// Locates the reference card and the trunk in a photograph and prints
/// the diameter along with per-stage timing and match diagnostics.
#[derive(Parser)]
#[command(name = "treeo-bench", version)]
struct Cli {
    /// Path to the photograph (PNG, JPEG, BMP, WebP).
    photo: PathBuf,

    /// Path to the reference card image.
    #[arg(long)]
    card: PathBuf,

    /// Width the photograph is resized to for card matching.
    #[arg(long, default_value_t = CardLocatorConfig::DEFAULT_WORKING_WIDTH, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    card_working_width: u32,

    /// Width the photograph is resized to for the trunk search.
    #[arg(long, default_value_t = TrunkLocatorConfig::DEFAULT_WORKING_WIDTH, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    trunk_working_width: u32,

    /// Lowe ratio-test threshold for keypoint matches (0.0-1.0].
    #[arg(long, default_value_t = CardLocatorConfig::DEFAULT_MATCH_RATIO_THRESHOLD)]
    match_ratio: f64,

    /// Fewest good matches worth fitting a homography to.
    #[arg(long, default_value_t = CardLocatorConfig::DEFAULT_MIN_GOOD_MATCHES)]
    min_matches: usize,

    /// Physical width of the reference card in millimetres.
    #[arg(long, default_value_t = MeasureConfig::DEFAULT_CARD_PHYSICAL_WIDTH_MM)]
    card_width_mm: f64,

    /// Bands to search for the trunk, in order.
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = [Region::Above, Region::Below])]
    search_order: Vec<Region>,

    /// Write the photograph with the result drawn over it (PNG).
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Write intermediate trunk search rasters into this directory.
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output the result and diagnostics as JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// Full measurement config as a JSON string.
    ///
    /// When provided, all other measurement parameter flags are ignored.
    /// The JSON may be partial; missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Trunk search band selection.
#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum Region {
    /// Between the top of the photograph and the card.
    Above,
    /// Between the card and the bottom of the photograph.
    Below,
}

impl From<Region> for SearchRegion {
    fn from(region: Region) -> Self {
        match region {
            Region::Above => Self::Above,
            Region::Below => Self::Below,
        }
    }
}

/// Build a [`MeasureConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. `--debug-dir` switches on
/// debug artifacts either way.
fn config_from_cli(cli: &Cli) -> Result<MeasureConfig, String> {
    let mut config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        let mut config = MeasureConfig {
            search_order: cli.search_order.iter().copied().map(SearchRegion::from).collect(),
            card_physical_width_mm: cli.card_width_mm,
            ..MeasureConfig::default()
        };
        config.card.working_width = cli.card_working_width;
        config.card.match_ratio_threshold = cli.match_ratio;
        config.card.min_good_matches = cli.min_matches;
        config.trunk.working_width = cli.trunk_working_width;
        config
    };
    if cli.debug_dir.is_some() {
        config.produce_debug_artifacts = true;
    }
    config
        .validate()
        .map_err(|e| format!("Invalid configuration: {e}"))?;
    Ok(config)
}

/// Decode the reference card, falling back to an empty image so the
/// measurement reports the card as not found.
fn load_card(path: &Path) -> RgbImage {
    let decoded = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| treeo_pipeline::decode::decode_rgb(&bytes).map_err(|e| e.to_string()));
    match decoded {
        Ok(card) => card,
        Err(e) => {
            eprintln!("Error loading card {}: {e}", path.display());
            RgbImage::new(0, 0)
        }
    }
}

/// JSON document printed by `--json`.
#[derive(Serialize)]
struct JsonOutput<'a> {
    result: &'a MeasurementResult,
    diagnostics: &'a MeasureDiagnostics,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let failure = ExitCode::from(Status::DiameterFailed.code());

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return failure;
        }
    };

    let photo_bytes = match std::fs::read(&cli.photo) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.photo.display());
            return failure;
        }
    };
    let photo = match treeo_pipeline::decode::decode_rgb(&photo_bytes) {
        Ok(photo) => photo,
        Err(e) => {
            eprintln!("Error decoding {}: {e}", cli.photo.display());
            return ExitCode::from(e.status().code());
        }
    };
    let card = load_card(&cli.card);

    eprintln!(
        "Photo: {} ({}x{})",
        cli.photo.display(),
        photo.width(),
        photo.height(),
    );
    eprintln!(
        "Card: {} ({}x{})",
        cli.card.display(),
        card.width(),
        card.height(),
    );
    log::debug!("config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);
    let mut status = Status::DiameterFailed;

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let report =
            treeo_pipeline::measure_with_diagnostics(&photo, &card, &config, &StdClock);

        if cli.json {
            let output = JsonOutput {
                result: &report.result,
                diagnostics: &report.diagnostics,
            };
            match serde_json::to_string_pretty(&output) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return failure;
                }
            }
        } else {
            println!("{}", report.diagnostics.report());
            print_result(&report.result);
        }

        // Write files on the first run only.
        if run == 0 {
            if let Some(ref path) = cli.overlay {
                let overlay = treeo_pipeline::render_result(&photo, &report.result);
                match overlay.save(path) {
                    Ok(()) => eprintln!("Overlay written to {}", path.display()),
                    Err(e) => eprintln!("Error writing overlay to {}: {e}", path.display()),
                }
            }
            if let (Some(dir), Some(artifacts)) = (&cli.debug_dir, &report.artifacts)
                && let Err(e) = write_artifacts(dir, artifacts)
            {
                eprintln!("Error writing debug artifacts to {}: {e}", dir.display());
            }
        }

        status = report.result.status;
        all_diagnostics.push(report.diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::from(status.code())
}

fn print_result(result: &MeasurementResult) {
    println!();
    match (result.diameter_mm, result.search_region) {
        (Some(d), Some(region)) => {
            println!("Diameter: {d:.1} mm (trunk {region})");
        }
        _ => println!(
            "No measurement: {}",
            result.message.as_deref().unwrap_or("unknown failure"),
        ),
    }
    if let Some(card) = result.card_polygon {
        println!(
            "Card: {:?}  confidence {:.3}",
            card.points(),
            result.card_confidence
        );
    }
    if let Some(trunk) = result.trunk_polygon {
        println!("Trunk: {:?}", trunk.points());
    }
}

/// Save every trunk search's rasters as PNG files named
/// `<index>-<band>-<stage>.png`, plus its Hough lines as JSON.
fn write_artifacts(dir: &Path, artifacts: &DebugArtifacts) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    for (i, search) in artifacts.trunk_searches.iter().enumerate() {
        let band = match search.region {
            SearchRegion::Above => "above",
            SearchRegion::Below => "below",
        };
        let path = |stage: &str| dir.join(format!("{i}-{band}-{stage}.png"));
        let save = |result: image::ImageResult<()>| result.map_err(|e| e.to_string());

        save(search.crop.save(path("crop")))?;
        save(search.seed_labels.save(path("seeds")))?;
        save(search.green_mask.save(path("vegetation")))?;
        if let Some(ref mask) = search.segmentation {
            save(mask.save(path("segmentation")))?;
        }
        if let Some(ref edges) = search.edges {
            save(edges.save(path("edges")))?;
        }
        let lines = serde_json::to_string_pretty(&search.lines).map_err(|e| e.to_string())?;
        std::fs::write(dir.join(format!("{i}-{band}-lines.json")), lines)
            .map_err(|e| e.to_string())?;
        eprintln!(
            "Debug artifacts for search {i} ({band}, row offset {}) written to {}",
            search.row_offset,
            dir.display(),
        );
    }
    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&MeasureDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[MeasureDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Card Location", |d| Some(d.card_location.duration)),
        ("Trunk Location", |d| d.trunk_location.as_ref().map(|s| s.duration)),
        ("Diameter", |d| d.diameter.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
