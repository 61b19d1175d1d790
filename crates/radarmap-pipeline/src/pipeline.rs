//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`], which runs everything in one call and
//! keeps only the final raster, [`Pipeline`] lets the caller drive
//! execution one step at a time:
//!
//! ```rust
//! # use radarmap_pipeline::{Coord, Pipeline, PipelineConfig, PipelineError, RgbaImage};
//! # fn run(source: RgbaImage, stencil: RgbaImage) -> Result<(), PipelineError> {
//! let center = Coord { x: 37.549, y: 55.648 };
//! let staged = Pipeline::new(source, stencil, center, PipelineConfig::default())
//!     .crop()?
//!     .calibrate()?
//!     .resample()?
//!     .clean()?
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state,
//! carrying the intermediates the caller may still want to inspect.
//! Skipping a stage or running them out of order does not compile.
//!
//! # Memory
//!
//! From [`Resampled`] onward the cropped source, the stencil and the
//! resampled raster are all held until [`Cleaned::into_result`]. Callers
//! that only need the final raster should prefer [`crate::process`].

use geo::Coord;
use image::RgbaImage;

use crate::calibrate::{Calibration, detect_center};
use crate::cleanup::{CleanupStats, clean};
use crate::color::CENTER_MARKER;
use crate::diagnostics::StageMetrics;
use crate::resample::{
    ProjectionSet, ResampleOutput, ResampleStats, TargetGeometry, center_pixel, mark_center,
    resample,
};
use crate::types::{CropRect, Dimensions, PipelineConfig, PipelineError, StagedResult};

/// Crop `source` to `crop` or return it unchanged when `crop` is `None`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the rectangle does not fit
/// the source.
pub fn crop_source(source: RgbaImage, crop: Option<CropRect>) -> Result<RgbaImage, PipelineError> {
    let Some(rect) = crop else {
        return Ok(source);
    };
    let dimensions = Dimensions::of(&source);
    if !rect.fits_within(dimensions) {
        return Err(PipelineError::InvalidConfig(format!(
            "crop {rect} does not fit a {dimensions} source"
        )));
    }
    Ok(image::imageops::crop_imm(&source, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Fail on an unreliable calibration when the configuration demands it.
pub(crate) fn check_calibration(
    calibration: &Calibration,
    config: &PipelineConfig,
) -> Result<(), PipelineError> {
    if config.require_reliable_calibration && !calibration.is_reliable() {
        return Err(PipelineError::UnreliableCalibration {
            column_candidates: calibration.column_candidates,
            row_candidates: calibration.row_candidates,
        });
    }
    Ok(())
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`crop`](Self::crop) to advance.
#[must_use = "pipeline stages are consumed by advancing, call .crop() to continue"]
pub struct Pending {
    config: PipelineConfig,
    source: RgbaImage,
    stencil: RgbaImage,
    earth_center_deg: Coord<f64>,
}

impl Pending {
    /// The uncropped source raster.
    #[must_use]
    pub const fn source(&self) -> &RgbaImage {
        &self.source
    }

    /// Validate the configuration and crop the source to the region of
    /// interest.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the configuration is
    /// invalid or the crop rectangle does not fit the source.
    pub fn crop(self) -> Result<Cropped, PipelineError> {
        self.config.validate()?;
        let original = Dimensions::of(&self.source);
        let applied = self.config.crop.is_some();
        let source = crop_source(self.source, self.config.crop)?;
        tracing::debug!(%original, cropped = %Dimensions::of(&source), "cropped source");
        Ok(Cropped {
            config: self.config,
            stencil: self.stencil,
            earth_center_deg: self.earth_center_deg,
            original,
            applied,
            source,
        })
    }
}

// ───────────────────────── Stage 1: Cropped ──────────────────────────

/// Pipeline state after cropping.
///
/// Call [`calibrate`](Self::calibrate) to advance.
#[must_use = "pipeline stages are consumed by advancing, call .calibrate() to continue"]
pub struct Cropped {
    config: PipelineConfig,
    stencil: RgbaImage,
    earth_center_deg: Coord<f64>,
    original: Dimensions,
    applied: bool,
    source: RgbaImage,
}

impl Cropped {
    /// The cropped source raster.
    #[must_use]
    pub const fn cropped(&self) -> &RgbaImage {
        &self.source
    }

    /// Whether a crop rectangle was applied.
    #[must_use]
    pub const fn applied(&self) -> bool {
        self.applied
    }

    /// Stage metrics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Crop {
            original: self.original,
            cropped: Dimensions::of(&self.source),
            applied: self.applied,
        }
    }

    /// Detect the source center and scale.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnreliableCalibration`] if detection found
    /// no grid spacing and `require_reliable_calibration` is set.
    pub fn calibrate(self) -> Result<Calibrated, PipelineError> {
        let calibration = detect_center(&self.source, &self.config.colors, &self.config.detector);
        check_calibration(&calibration, &self.config)?;
        Ok(Calibrated {
            config: self.config,
            stencil: self.stencil,
            earth_center_deg: self.earth_center_deg,
            source: self.source,
            calibration,
        })
    }
}

// ──────────────────────── Stage 2: Calibrated ────────────────────────

/// Pipeline state after center/scale detection.
///
/// Call [`resample`](Self::resample) to advance.
#[must_use = "pipeline stages are consumed by advancing, call .resample() to continue"]
pub struct Calibrated {
    config: PipelineConfig,
    stencil: RgbaImage,
    earth_center_deg: Coord<f64>,
    source: RgbaImage,
    calibration: Calibration,
}

impl Calibrated {
    /// The detected calibration.
    #[must_use]
    pub const fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Stage metrics.
    #[must_use]
    pub const fn metrics(&self) -> StageMetrics {
        StageMetrics::Calibration {
            calibration: self.calibration,
            reliable: self.calibration.is_reliable(),
        }
    }

    /// Create the projections and resample onto Web-Mercator. The
    /// projections are released when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Projection`] if a projection cannot be
    /// created, [`PipelineError::DegenerateOutput`] if the output would
    /// be empty, or [`PipelineError::ThreadPool`] if a dedicated pool
    /// cannot be built.
    pub fn resample(self) -> Result<Resampled, PipelineError> {
        let projections = ProjectionSet::new(&self.config.projections, self.earth_center_deg)?;
        let geometry = TargetGeometry::plan(
            Dimensions::of(&self.source),
            self.earth_center_deg,
            &self.calibration,
            self.config.base_pixels_per_radian,
            self.config.output_height,
            &projections,
        )?;
        let output = resample(&self.source, &projections, &geometry, self.config.processing)?;
        let center = center_pixel(&projections, &geometry);
        Ok(Resampled {
            config: self.config,
            stencil: self.stencil,
            source: self.source,
            calibration: self.calibration,
            geometry,
            center,
            output,
        })
    }
}

// ───────────────────────── Stage 3: Resampled ────────────────────────

/// Pipeline state after resampling.
///
/// The projections are already released; only the output pixel of the
/// earth center is kept for the marker. Call [`clean`](Self::clean) to
/// advance.
#[must_use = "pipeline stages are consumed by advancing, call .clean() to continue"]
pub struct Resampled {
    config: PipelineConfig,
    stencil: RgbaImage,
    source: RgbaImage,
    calibration: Calibration,
    geometry: TargetGeometry,
    center: Option<(u32, u32)>,
    output: ResampleOutput,
}

impl Resampled {
    /// The resampled raster, before cleanup.
    #[must_use]
    pub const fn resampled(&self) -> &RgbaImage {
        &self.output.image
    }

    /// Output extent and size.
    #[must_use]
    pub const fn geometry(&self) -> &TargetGeometry {
        &self.geometry
    }

    /// Mapping counts.
    #[must_use]
    pub const fn stats(&self) -> ResampleStats {
        self.output.stats
    }

    /// Output pixel of the earth center, if it lies inside the output.
    #[must_use]
    pub const fn center(&self) -> Option<(u32, u32)> {
        self.center
    }

    /// Stage metrics.
    #[must_use]
    pub const fn metrics(&self) -> StageMetrics {
        StageMetrics::Resample {
            pixels_per_radian: self.geometry.pixels_per_radian,
            output: self.geometry.dimensions,
            stats: self.output.stats,
        }
    }

    /// Clean the resampled raster and paint the center marker if
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ThreadPool`] if a dedicated pool cannot be
    /// built.
    pub fn clean(self) -> Result<Cleaned, PipelineError> {
        let cleaned = clean(
            &self.output.image,
            &self.stencil,
            &self.config.colors,
            self.config.processing,
        )?;
        let mut image = cleaned.image;
        let marker = if self.config.mark_center {
            let marker = mark_center(&mut image, self.center, CENTER_MARKER);
            if marker.is_none() {
                tracing::warn!("earth center falls outside the output, no marker painted");
            }
            marker
        } else {
            None
        };
        Ok(Cleaned {
            source: self.source,
            calibration: self.calibration,
            geometry: self.geometry,
            resampled: self.output.image,
            cleaned: image,
            stats: cleaned.stats,
            marker,
        })
    }
}

// ───────────────────────── Stage 4: Cleaned ──────────────────────────

/// Final pipeline state.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`StagedResult`].
#[must_use = "call .into_result() to extract the StagedResult"]
pub struct Cleaned {
    source: RgbaImage,
    calibration: Calibration,
    geometry: TargetGeometry,
    resampled: RgbaImage,
    cleaned: RgbaImage,
    stats: CleanupStats,
    marker: Option<(u32, u32)>,
}

impl Cleaned {
    /// The final raster.
    #[must_use]
    pub const fn cleaned(&self) -> &RgbaImage {
        &self.cleaned
    }

    /// Decision counts of the cleanup pass.
    #[must_use]
    pub const fn stats(&self) -> CleanupStats {
        self.stats
    }

    /// Output pixel of the center marker, if one was painted.
    #[must_use]
    pub const fn marker(&self) -> Option<(u32, u32)> {
        self.marker
    }

    /// Stage metrics.
    #[must_use]
    pub const fn metrics(&self) -> StageMetrics {
        StageMetrics::Cleanup {
            stats: self.stats,
            marker: self.marker,
        }
    }

    /// Consume the pipeline and return every intermediate.
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            source: self.source,
            calibration: self.calibration,
            resampled: self.resampled,
            cleaned: self.cleaned,
            bounds: self.geometry.bounds,
            dimensions: self.geometry.dimensions,
        }
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental reprojection pipeline.
///
/// Created via [`Pipeline::new`], which stores the inputs without doing
/// any processing.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline.
    ///
    /// `earth_center_deg` is the geographic position of the source
    /// projection center as (longitude, latitude) in degrees.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(
        source: RgbaImage,
        stencil: RgbaImage,
        earth_center_deg: Coord<f64>,
        config: PipelineConfig,
    ) -> Pending {
        Pending {
            config,
            source,
            stencil,
            earth_center_deg,
        }
    }
}
