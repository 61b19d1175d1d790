//! radarmap-pipeline: reprojection and color cleanup of radar-coverage
//! renderings (sans-IO).
//!
//! Converts a raster drawn in a local azimuthal-equidistant projection
//! into a Web-Mercator raster through:
//! crop -> center/scale detection -> inverse-mapping resample ->
//! legend-color cleanup -> optional center marker.
//!
//! This crate has **no I/O dependencies**. It operates on in-memory
//! rasters and returns structured data. File decoding and encoding live
//! in `radarmap-io`.

pub mod calibrate;
pub mod cleanup;
pub mod color;
pub mod diagnostics;
pub mod parallel;
pub mod pipeline;
pub mod projection;
pub mod resample;
pub mod types;

pub use calibrate::{Calibration, DetectorParams};
pub use color::{ColorModel, Tolerances};
pub use parallel::ProcessingMode;
pub use pipeline::Pipeline;
pub use projection::{Projection, ProjectionError};
pub use resample::ProjectionDefinitions;
pub use types::{
    Coord, CropRect, Dimensions, MercatorBounds, PipelineConfig, PipelineError, ProcessResult,
    RgbaImage, StagedResult,
};

/// Run the full reprojection pipeline.
///
/// `source` is the screenshot to reproject, `stencil` the reference
/// raster consulted during cleanup, and `earth_center_deg` the
/// geographic position of the source projection center as (longitude,
/// latitude) in degrees.
///
/// # Pipeline steps
///
/// 1. Validate the configuration and crop the source
/// 2. Detect the source center and scale from grid lines
/// 3. Create the geodetic, local and global projections
/// 4. Resample onto Web-Mercator (nearest pixel)
/// 5. Clean up legend colors against the stencil
/// 6. Optionally mark the earth center
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid configuration
/// or a crop that does not fit, [`PipelineError::UnreliableCalibration`]
/// when strict calibration is requested and fails,
/// [`PipelineError::Projection`] when a projection cannot be created,
/// and [`PipelineError::DegenerateOutput`] when the output would be
/// empty.
pub fn process(
    source: &RgbaImage,
    stencil: &RgbaImage,
    earth_center_deg: Coord<f64>,
    config: &PipelineConfig,
) -> Result<ProcessResult, PipelineError> {
    // 1. Validate and crop.
    config.validate()?;
    let cropped = pipeline::crop_source(source.clone(), config.crop)?;

    // 2. Center and scale.
    let calibration = calibrate::detect_center(&cropped, &config.colors, &config.detector);
    pipeline::check_calibration(&calibration, config)?;

    // 3-4. Projections live only for the resampling block.
    let (geometry, resampled, center) = {
        let projections = resample::ProjectionSet::new(&config.projections, earth_center_deg)?;
        let geometry = resample::TargetGeometry::plan(
            Dimensions::of(&cropped),
            earth_center_deg,
            &calibration,
            config.base_pixels_per_radian,
            config.output_height,
            &projections,
        )?;
        let resampled =
            resample::resample(&cropped, &projections, &geometry, config.processing)?;
        let center = resample::center_pixel(&projections, &geometry);
        (geometry, resampled, center)
    };

    // 5. Cleanup reads the frozen resampled raster.
    let mut image =
        cleanup::clean(&resampled.image, stencil, &config.colors, config.processing)?.image;

    // 6. Optional center marker.
    if config.mark_center {
        resample::mark_center(&mut image, center, color::CENTER_MARKER);
    }

    Ok(ProcessResult {
        image,
        bounds: geometry.bounds,
        calibration,
    })
}

/// Run the full pipeline and keep every intermediate raster.
///
/// # Errors
///
/// Same as [`process`].
pub fn process_staged(
    source: RgbaImage,
    stencil: RgbaImage,
    earth_center_deg: Coord<f64>,
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError> {
    Ok(Pipeline::new(source, stencil, earth_center_deg, config.clone())
        .crop()?
        .calibrate()?
        .resample()?
        .clean()?
        .into_result())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgba;

    use super::*;

    const CENTER: Coord<f64> = Coord { x: 41.016, y: 57.809 };

    fn grid_source() -> RgbaImage {
        RgbaImage::from_fn(300, 240, |x, y| {
            if x % 60 == 30 || y % 60 == 30 {
                Rgba([115, 115, 115, 255])
            } else {
                Rgba([0, 102, 204, 255])
            }
        })
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            crop: None,
            output_height: 60,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn process_matches_process_staged() {
        let source = grid_source();
        let stencil = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let direct = process(&source, &stencil, CENTER, &config()).unwrap();
        let staged = process_staged(source, stencil, CENTER, &config()).unwrap();
        assert_eq!(direct.image, staged.cleaned);
        assert_eq!(direct.bounds, staged.bounds);
        assert_eq!(direct.calibration, staged.calibration);
    }

    #[test]
    fn process_rejects_invalid_config() {
        let config = PipelineConfig {
            base_pixels_per_radian: -1.0,
            ..config()
        };
        let result = process(&grid_source(), &RgbaImage::new(1, 1), CENTER, &config);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn process_rejects_oversized_crop() {
        let config = PipelineConfig {
            crop: Some(PipelineConfig::DEFAULT_CROP),
            ..config()
        };
        let result = process(&grid_source(), &RgbaImage::new(1, 1), CENTER, &config);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn process_output_has_requested_height_and_palette_only() {
        let result = process(&grid_source(), &RgbaImage::new(1, 1), CENTER, &config()).unwrap();
        assert_eq!(result.image.height(), 60);
        let colors = ColorModel::default();
        for p in result.image.pixels() {
            assert!(
                colors.is_palette_color(*p) || *p == color::TRANSPARENT || *p == colors.boundary,
                "unexpected pixel {p:?}",
            );
        }
    }
}
