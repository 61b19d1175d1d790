//! Shared types for the radarmap pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::calibrate::{Calibration, DetectorParams};
use crate::color::ColorModel;
use crate::parallel::ProcessingMode;
use crate::projection::ProjectionError;
use crate::resample::ProjectionDefinitions;

/// Re-export `RgbaImage` so downstream crates can pass rasters around
/// without depending on `image` directly.
pub use image::RgbaImage;

/// Re-export the `geo` coordinate used for every projected point.
pub use geo::Coord;

/// Bounding box of the output raster in Web-Mercator metres.
///
/// `min().y` is the southern edge (bottom image row), `max().y` the
/// northern edge (top image row).
pub type MercatorBounds = geo::Rect<f64>;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an existing raster.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Region of interest cut out of the source screenshot before any
/// processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    /// Left edge in source pixels.
    pub x: u32,
    /// Top edge in source pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl CropRect {
    /// Whether the rectangle lies entirely inside an image of the given
    /// size.
    #[must_use]
    pub fn fits_within(self, dimensions: Dimensions) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(dimensions.width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(dimensions.height)
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for CropRect {
    type Err = String;

    /// Parse `"X,Y,W,H"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, width, height] = parts.as_slice() else {
            return Err(format!("crop must be 'X,Y,W,H', got: '{s}'"));
        };
        let parse = |name: &str, raw: &str| -> Result<u32, String> {
            raw.parse()
                .map_err(|e| format!("invalid crop {name} '{raw}': {e}"))
        };
        Ok(Self {
            x: parse("x", x)?,
            y: parse("y", y)?,
            width: parse("width", width)?,
            height: parse("height", height)?,
        })
    }
}

/// Configuration for the reprojection pipeline.
///
/// Defaults match the radar screenshots the tool was built for: a
/// 1180x960 map area at offset (185, 54), rendered at 12750 pixels per
/// radian with grid lines every 120 pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Region of interest applied to the source before processing.
    /// `None` processes the whole source image.
    pub crop: Option<CropRect>,

    /// Pixels per radian of the source rendering at calibration scale
    /// 1.0.
    pub base_pixels_per_radian: f64,

    /// Height of the output raster in pixels. The width follows from the
    /// aspect ratio of the Mercator bounding box.
    pub output_height: u32,

    /// Palette, reference colors and tolerances.
    pub colors: ColorModel,

    /// Center/scale detection parameters.
    pub detector: DetectorParams,

    /// Projection definitions for the geodetic and global frames.
    pub projections: ProjectionDefinitions,

    /// Sequential or row-parallel sweeps.
    pub processing: ProcessingMode,

    /// Abort with [`PipelineError::UnreliableCalibration`] instead of
    /// continuing with a default calibration.
    pub require_reliable_calibration: bool,

    /// Paint the projected earth center into the output.
    pub mark_center: bool,
}

impl PipelineConfig {
    /// Default region of interest.
    pub const DEFAULT_CROP: CropRect = CropRect {
        x: 185,
        y: 54,
        width: 1365 - 185,
        height: 1014 - 54,
    };
    /// Default pixels per radian of the source rendering.
    pub const DEFAULT_BASE_PIXELS_PER_RADIAN: f64 = 12_750.0;
    /// Default output height.
    pub const DEFAULT_OUTPUT_HEIGHT: u32 = 1000;

    /// Check the configuration for values that cannot produce an output.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first invalid
    /// field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if !(self.base_pixels_per_radian.is_finite() && self.base_pixels_per_radian > 0.0) {
            return invalid(format!(
                "base_pixels_per_radian must be positive, got {}",
                self.base_pixels_per_radian
            ));
        }
        if self.output_height == 0 {
            return invalid("output_height must be at least 1".to_owned());
        }
        if let Some(crop) = self.crop
            && (crop.width == 0 || crop.height == 0)
        {
            return invalid(format!("crop {crop} is empty"));
        }
        if self.detector.default_grid_spacing == 0 {
            return invalid("detector.default_grid_spacing must be at least 1".to_owned());
        }
        if self.detector.candidate_percent > 100 {
            return invalid(format!(
                "detector.candidate_percent must be at most 100, got {}",
                self.detector.candidate_percent
            ));
        }
        self.colors
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(format!("colors: {e}")))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            crop: Some(Self::DEFAULT_CROP),
            base_pixels_per_radian: Self::DEFAULT_BASE_PIXELS_PER_RADIAN,
            output_height: Self::DEFAULT_OUTPUT_HEIGHT,
            colors: ColorModel::default(),
            detector: DetectorParams::default(),
            projections: ProjectionDefinitions::default(),
            processing: ProcessingMode::default(),
            require_reliable_calibration: false,
            mark_center: false,
        }
    }
}

/// Result of running the full pipeline.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// The cleaned Web-Mercator raster.
    pub image: RgbaImage,
    /// Mercator extent of `image`.
    pub bounds: MercatorBounds,
    /// Calibration detected on the source.
    pub calibration: Calibration,
}

/// Result of running the pipeline with every intermediate preserved.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Stage 1: source cropped to the region of interest.
    pub source: RgbaImage,
    /// Stage 2: detected calibration.
    pub calibration: Calibration,
    /// Stage 3: nearest-pixel resampled raster, before cleanup.
    pub resampled: RgbaImage,
    /// Stage 4: cleaned raster (with the center marker when enabled).
    pub cleaned: RgbaImage,
    /// Mercator extent of the output rasters.
    pub bounds: MercatorBounds,
    /// Output raster dimensions.
    pub dimensions: Dimensions,
}

impl StagedResult {
    /// The final output raster.
    #[must_use]
    pub const fn final_image(&self) -> &RgbaImage {
        &self.cleaned
    }
}

impl From<StagedResult> for ProcessResult {
    fn from(staged: StagedResult) -> Self {
        Self {
            image: staged.cleaned,
            bounds: staged.bounds,
            calibration: staged.calibration,
        }
    }
}

/// Errors that can occur during pipeline processing.
///
/// All of them are fatal for the run; per-pixel fallbacks (unmapped or
/// unresolvable pixels) are not errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A projection could not be created.
    #[error("projection setup failed: {0}")]
    Projection(#[from] ProjectionError),

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Center/scale detection found no usable grid lines and the
    /// configuration requires a reliable calibration.
    #[error(
        "calibration is unreliable: {column_candidates} column and {row_candidates} row grid-line candidates"
    )]
    UnreliableCalibration {
        /// Number of column candidates found.
        column_candidates: usize,
        /// Number of row candidates found.
        row_candidates: usize,
    },

    /// The output raster would be empty or of non-finite size.
    #[error("degenerate output raster: {0}")]
    DegenerateOutput(String),

    /// A dedicated thread pool could not be created.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_crop_matches_screenshot_layout() {
        let crop = PipelineConfig::DEFAULT_CROP;
        assert_eq!((crop.x, crop.y, crop.width, crop.height), (185, 54, 1180, 960));
    }

    #[test]
    fn crop_parses_and_displays() {
        let crop: CropRect = "10, 20,30,40".parse().unwrap();
        assert_eq!(
            crop,
            CropRect {
                x: 10,
                y: 20,
                width: 30,
                height: 40
            }
        );
        assert_eq!(crop.to_string(), "10,20,30,40");
        assert!("1,2,3".parse::<CropRect>().is_err());
        assert!("1,2,3,x".parse::<CropRect>().is_err());
    }

    #[test]
    fn crop_fits_within() {
        let crop = CropRect {
            x: 5,
            y: 5,
            width: 10,
            height: 10,
        };
        assert!(crop.fits_within(Dimensions {
            width: 15,
            height: 15
        }));
        assert!(!crop.fits_within(Dimensions {
            width: 14,
            height: 15
        }));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let cases = [
            PipelineConfig {
                base_pixels_per_radian: 0.0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                base_pixels_per_radian: f64::NAN,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                output_height: 0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                crop: Some(CropRect {
                    x: 0,
                    y: 0,
                    width: 0,
                    height: 10,
                }),
                ..PipelineConfig::default()
            },
            PipelineConfig {
                detector: DetectorParams {
                    default_grid_spacing: 0,
                    ..DetectorParams::default()
                },
                ..PipelineConfig::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(PipelineError::InvalidConfig(_))),
                "expected invalid: {config:?}",
            );
        }
    }

    #[test]
    fn config_json_round_trip() {
        let config = PipelineConfig {
            crop: None,
            output_height: 512,
            processing: ProcessingMode::ParallelWith(2),
            ..PipelineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"output_height": 200}"#).unwrap();
        assert_eq!(config.output_height, 200);
        assert_eq!(config.crop, Some(PipelineConfig::DEFAULT_CROP));
        assert_eq!(config.colors, ColorModel::default());
    }

    #[test]
    fn dimensions_display_and_count() {
        let d = Dimensions {
            width: 3,
            height: 4,
        };
        assert_eq!(d.to_string(), "3x4");
        assert_eq!(d.pixel_count(), 12);
    }
}
