//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! [`process_staged_with_diagnostics`] runs the staged pipeline and
//! records how long each stage took alongside the stage's own metrics.
//! Time is read through the [`Clock`] trait so the library never touches
//! a wall clock itself; binaries supply an `Instant`-backed clock and
//! tests a fixed one.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::hash::Hasher;
use std::time::Duration;

use geo::Coord;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::calibrate::Calibration;
use crate::cleanup::CleanupStats;
use crate::pipeline::Pipeline;
use crate::resample::ResampleStats;
use crate::types::{Dimensions, PipelineConfig, PipelineError, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of elapsed time.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: region-of-interest crop (and config validation).
    pub crop: StageDiagnostics,
    /// Stage 2: center/scale detection.
    pub calibration: StageDiagnostics,
    /// Stage 3: projection setup and resampling.
    pub resample: StageDiagnostics,
    /// Stage 4: color cleanup and center marker.
    pub cleanup: StageDiagnostics,
    /// Total wall-clock duration of the run.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
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
    /// Crop metrics.
    Crop {
        /// Source size before cropping.
        original: Dimensions,
        /// Size after cropping.
        cropped: Dimensions,
        /// Whether a crop rectangle was configured.
        applied: bool,
    },
    /// Center/scale detection metrics.
    Calibration {
        /// The detected calibration.
        calibration: Calibration,
        /// Whether the calibration is reliable.
        reliable: bool,
    },
    /// Resampling metrics.
    Resample {
        /// Effective source pixels per radian.
        pixels_per_radian: f64,
        /// Output size.
        output: Dimensions,
        /// Mapping counts.
        stats: ResampleStats,
    },
    /// Cleanup metrics.
    Cleanup {
        /// Decision counts.
        stats: CleanupStats,
        /// Output pixel of the center marker, if painted.
        marker: Option<(u32, u32)>,
    },
}

/// High-level summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Cropped source size.
    pub source: Dimensions,
    /// Output size.
    pub output: Dimensions,
    /// Mercator bounds as `[min_x, min_y, max_x, max_y]`.
    pub bounds: [f64; 4],
    /// [`raster_digest`] of the output, as 16 hex digits.
    pub output_digest: String,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Source: {}  ->  Output: {}",
            self.summary.source, self.summary.output,
        ));
        let [min_x, min_y, max_x, max_y] = self.summary.bounds;
        lines.push(format!(
            "Mercator bounds: ({min_x:.3}, {min_y:.3}) - ({max_x:.3}, {max_y:.3})"
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Crop", &self.crop),
            ("Calibration", &self.calibration),
            ("Resample", &self.resample),
            ("Cleanup", &self.cleanup),
        ];
        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!("Output digest: {}", self.summary.output_digest));

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
        StageMetrics::Crop {
            original,
            cropped,
            applied,
        } => {
            if *applied {
                format!("{original} -> {cropped}")
            } else {
                format!("{original} (no crop)")
            }
        }
        StageMetrics::Calibration {
            calibration,
            reliable,
        } => {
            let spacing = calibration
                .grid_spacing
                .map_or_else(|| "none".to_owned(), |s| s.to_string());
            format!(
                "center=({}, {}) scale={:.4} spacing={spacing} candidates={}x{}{}",
                calibration.center_x,
                calibration.center_y,
                calibration.scale,
                calibration.column_candidates,
                calibration.row_candidates,
                if *reliable { "" } else { " UNRELIABLE" },
            )
        }
        StageMetrics::Resample {
            pixels_per_radian,
            output,
            stats,
        } => {
            format!(
                "ppr={pixels_per_radian:.1} {output} mapped={} unmapped={}",
                stats.mapped, stats.unmapped,
            )
        }
        StageMetrics::Cleanup { stats, marker } => {
            let marker = marker.map_or_else(String::new, |(x, y)| format!(" marker=({x}, {y})"));
            format!(
                "boundary={} kept={} replaced={} cleared={}{marker}",
                stats.boundary, stats.kept, stats.replaced, stats.cleared,
            )
        }
    }
}

/// Stable 64-bit fingerprint of a raster's size and pixels.
///
/// SipHash-1-3 with fixed zero keys, so equal rasters hash equal across
/// runs and processes.
#[must_use]
pub fn raster_digest(image: &RgbaImage) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write_u32(image.width());
    hasher.write_u32(image.height());
    hasher.write(image.as_raw());
    hasher.finish()
}

fn timed<C: Clock>(clock: &C, start: &C::Instant, metrics: StageMetrics) -> StageDiagnostics {
    StageDiagnostics {
        duration: clock.elapsed(start),
        metrics,
    }
}

/// Run the staged pipeline and collect per-stage diagnostics.
///
/// # Errors
///
/// Returns the first [`PipelineError`] raised by any stage.
pub fn process_staged_with_diagnostics<C: Clock>(
    source: RgbaImage,
    stencil: RgbaImage,
    earth_center_deg: Coord<f64>,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let total_start = clock.now();

    let start = clock.now();
    let cropped = Pipeline::new(source, stencil, earth_center_deg, config.clone()).crop()?;
    let crop = timed(clock, &start, cropped.metrics());

    let start = clock.now();
    let calibrated = cropped.calibrate()?;
    let calibration = timed(clock, &start, calibrated.metrics());

    let start = clock.now();
    let resampled = calibrated.resample()?;
    let resample = timed(clock, &start, resampled.metrics());

    let start = clock.now();
    let cleaned = resampled.clean()?;
    let cleanup = timed(clock, &start, cleaned.metrics());

    let staged = cleaned.into_result();
    let total_duration = clock.elapsed(&total_start);

    let summary = PipelineSummary {
        source: Dimensions::of(&staged.source),
        output: staged.dimensions,
        bounds: [
            staged.bounds.min().x,
            staged.bounds.min().y,
            staged.bounds.max().x,
            staged.bounds.max().y,
        ],
        output_digest: format!("{:016x}", raster_digest(staged.final_image())),
    };

    Ok((
        staged,
        PipelineDiagnostics {
            crop,
            calibration,
            resample,
            cleanup,
            total_duration,
            summary,
        },
    ))
}
