//! Center and scale detection from background and grid-line statistics.
//!
//! The source rendering draws the map on a neutral background inside a
//! darker scanner margin and overlays grid lines at a fixed angular
//! spacing. The map center sits where the margin is thinnest, and the
//! pixel distance between grid lines reveals the rendering scale.
//!
//! Detection works on four 1-D histograms (outer background and line
//! pixels per column and per row):
//!
//! 1. Smooth the background histograms with a box window whose indices
//!    clamp at the edges.
//! 2. Columns (rows) whose line count exceeds a percentage of the peak
//!    line count are grid-line candidates.
//! 3. The candidate with the lowest smoothed background density is the
//!    center. The running best starts at index 0, even when index 0 is
//!    not itself a candidate.
//! 4. Gaps between consecutive candidates on both axes are pooled; the
//!    most frequent gap divided by the nominal grid spacing is the scale.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::color::ColorModel;

/// Tuning parameters for [`detect_center`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Half-width of the background smoothing window in pixels.
    pub smoothing_radius: u32,
    /// A column or row is a grid-line candidate when its line count is
    /// strictly above this percentage of the peak count.
    pub candidate_percent: u32,
    /// Grid spacing in pixels at scale 1.0.
    pub default_grid_spacing: u32,
}

impl DetectorParams {
    /// Default smoothing half-width.
    pub const DEFAULT_SMOOTHING_RADIUS: u32 = 50;
    /// Default candidate threshold.
    pub const DEFAULT_CANDIDATE_PERCENT: u32 = 70;
    /// Default nominal grid spacing.
    pub const DEFAULT_GRID_SPACING: u32 = 120;
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            smoothing_radius: Self::DEFAULT_SMOOTHING_RADIUS,
            candidate_percent: Self::DEFAULT_CANDIDATE_PERCENT,
            default_grid_spacing: Self::DEFAULT_GRID_SPACING,
        }
    }
}

/// Detected mapping between source pixels and the local projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Column of the projection center in source pixels.
    pub center_x: u32,
    /// Row of the projection center in source pixels.
    pub center_y: u32,
    /// Multiplier applied to the base pixels-per-radian.
    pub scale: f64,
    /// Most frequent gap between grid lines, if any was measured.
    pub grid_spacing: Option<u32>,
    /// Number of grid-line candidate columns.
    pub column_candidates: usize,
    /// Number of grid-line candidate rows.
    pub row_candidates: usize,
}

impl Calibration {
    /// Whether both axes produced candidates and a grid spacing was
    /// measured.
    ///
    /// An unreliable calibration still carries a center but its scale is
    /// the 1.0 fallback.
    #[must_use]
    pub const fn is_reliable(&self) -> bool {
        self.grid_spacing.is_some() && self.column_candidates > 0 && self.row_candidates > 0
    }
}

/// Per-column and per-row pixel counts.
struct Histograms {
    background_columns: Vec<u32>,
    background_rows: Vec<u32>,
    line_columns: Vec<u32>,
    line_rows: Vec<u32>,
}

impl Histograms {
    fn collect(image: &RgbaImage, colors: &ColorModel) -> Self {
        let width = image.width() as usize;
        let height = image.height() as usize;
        let mut h = Self {
            background_columns: vec![0; width],
            background_rows: vec![0; height],
            line_columns: vec![0; width],
            line_rows: vec![0; height],
        };
        for (x, y, &pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            if colors.is_outer_background(pixel) {
                h.background_columns[x] += 1;
                h.background_rows[y] += 1;
            }
            if colors.is_line(pixel) {
                h.line_columns[x] += 1;
                h.line_rows[y] += 1;
            }
        }
        h
    }
}

/// Grid-line candidates along one axis and the densest-margin-free pick.
#[derive(Debug, PartialEq, Eq)]
struct AxisScan {
    center: u32,
    candidates: Vec<u32>,
}

/// Box-filter `values` with a window of `2 * radius + 1` bins.
///
/// Indices outside the array are clamped to the first or last bin, so
/// edge bins are counted repeatedly rather than padded with zeros.
#[must_use]
pub fn smooth(values: &[u32], radius: u32) -> Vec<u64> {
    let Some(last) = values.len().checked_sub(1) else {
        return Vec::new();
    };
    let radius = radius as usize;
    (0..values.len())
        .map(|i| {
            (0..=2 * radius)
                .map(|j| {
                    let pos = (i + j).saturating_sub(radius).min(last);
                    u64::from(values[pos])
                })
                .sum()
        })
        .collect()
}

/// Indices whose line count exceeds `percent` of the peak count.
fn candidates(lines: &[u32], percent: u32) -> Vec<u32> {
    let peak = lines.iter().copied().max().unwrap_or(0);
    let threshold = u64::from(peak) * u64::from(percent);
    (0u32..)
        .zip(lines)
        .filter(|&(_, &count)| u64::from(count) * 100 > threshold)
        .map(|(i, _)| i)
        .collect()
}

fn scan_axis(lines: &[u32], density: &[u64], percent: u32) -> AxisScan {
    let candidates = candidates(lines, percent);
    let mut center = 0u32;
    for &i in &candidates {
        if density[i as usize] < density[center as usize] {
            center = i;
        }
    }
    AxisScan { center, candidates }
}

/// Add the gaps between consecutive candidates to `deltas`.
fn record_gaps(candidates: &[u32], deltas: &mut BTreeMap<u32, u32>) {
    for pair in candidates.windows(2) {
        *deltas.entry(pair[1] - pair[0]).or_insert(0) += 1;
    }
}

/// Most frequent gap; ties go to the smallest gap.
fn mode_delta(deltas: &BTreeMap<u32, u32>) -> Option<u32> {
    deltas
        .iter()
        .max_by_key(|&(&delta, &count)| (count, Reverse(delta)))
        .map(|(&delta, _)| delta)
}

/// Ratio of the measured to the nominal grid spacing, computed in single
/// precision and then widened. Source-pixel truncation depends on this
/// exact rounding.
#[allow(clippy::cast_precision_loss)]
fn grid_scale(delta: u32, default_spacing: u32) -> f64 {
    f64::from(delta as f32 / default_spacing as f32)
}

/// Detect the projection center and scale of a source rendering.
///
/// Never fails. When no grid spacing can be measured the result has
/// scale 1.0 and [`Calibration::is_reliable`] returns `false`; the
/// caller decides whether that is fatal.
#[must_use]
pub fn detect_center(image: &RgbaImage, colors: &ColorModel, params: &DetectorParams) -> Calibration {
    let h = Histograms::collect(image, colors);
    let density_columns = smooth(&h.background_columns, params.smoothing_radius);
    let density_rows = smooth(&h.background_rows, params.smoothing_radius);

    let columns = scan_axis(&h.line_columns, &density_columns, params.candidate_percent);
    let rows = scan_axis(&h.line_rows, &density_rows, params.candidate_percent);
    tracing::debug!(candidates = ?columns.candidates, "column grid-line candidates");
    tracing::debug!(candidates = ?rows.candidates, "row grid-line candidates");

    let mut deltas = BTreeMap::new();
    record_gaps(&columns.candidates, &mut deltas);
    record_gaps(&rows.candidates, &mut deltas);
    tracing::debug!(?deltas, "grid-line gaps");

    let grid_spacing = mode_delta(&deltas);
    let scale = grid_spacing.map_or(1.0, |delta| grid_scale(delta, params.default_grid_spacing));

    let calibration = Calibration {
        center_x: columns.center,
        center_y: rows.center,
        scale,
        grid_spacing,
        column_candidates: columns.candidates.len(),
        row_candidates: rows.candidates.len(),
    };
    if calibration.is_reliable() {
        tracing::info!(
            center_x = calibration.center_x,
            center_y = calibration.center_y,
            scale = calibration.scale,
            "detected calibration",
        );
    } else {
        tracing::warn!(
            column_candidates = calibration.column_candidates,
            row_candidates = calibration.row_candidates,
            "no grid spacing detected, falling back to scale 1.0",
        );
    }
    calibration
}
