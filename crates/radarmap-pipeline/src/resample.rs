//! Inverse-mapping resampler from the local azimuthal-equidistant source
//! onto a Web-Mercator grid.
//!
//! For every output pixel the Mercator coordinate is computed from the
//! output bounds, carried through geodetic longitude/latitude into the
//! unit-radius local projection, scaled to source pixels and sampled
//! with nearest-pixel lookup. Pixels that land outside the source, or
//! whose transform fails, are left transparent.

use geo::Coord;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::calibrate::Calibration;
use crate::color::TRANSPARENT;
use crate::parallel::{ProcessingMode, assemble_rows};
use crate::projection::{Projection, ProjectionError, transform};
use crate::types::{Dimensions, MercatorBounds, PipelineError};

/// Definitions of the three projections involved in resampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionDefinitions {
    /// Geodetic longitude/latitude, the common transform space.
    pub geodetic: String,
    /// Local projection of the source without its origin; `+lon_0` and
    /// `+lat_0` are appended from the earth center.
    pub local_base: String,
    /// Global projection of the output.
    pub global: String,
}

impl ProjectionDefinitions {
    /// Default geodetic definition.
    pub const DEFAULT_GEODETIC: &str = "+proj=latlong";
    /// Default local definition (unit sphere, so local units are radians).
    pub const DEFAULT_LOCAL_BASE: &str = "+proj=aeqd +R=1 +x_0=0 +y_0=0";
    /// Default global definition.
    pub const DEFAULT_GLOBAL: &str = "+init=epsg:3857";

    /// Full local definition centered on `earth_center_deg`
    /// (longitude, latitude in degrees).
    #[must_use]
    pub fn local(&self, earth_center_deg: Coord<f64>) -> String {
        format!(
            "{} +lon_0={} +lat_0={}",
            self.local_base, earth_center_deg.x, earth_center_deg.y
        )
    }
}

impl Default for ProjectionDefinitions {
    fn default() -> Self {
        Self {
            geodetic: Self::DEFAULT_GEODETIC.to_owned(),
            local_base: Self::DEFAULT_LOCAL_BASE.to_owned(),
            global: Self::DEFAULT_GLOBAL.to_owned(),
        }
    }
}

/// The geodetic, local and global projections for one run.
///
/// Owned by the resampling stage and dropped with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionSet {
    geodetic: Projection,
    local: Projection,
    global: Projection,
}

impl ProjectionSet {
    /// Create all three projections.
    ///
    /// # Errors
    ///
    /// Returns the [`ProjectionError`] of the first definition that
    /// cannot be parsed.
    pub fn new(
        definitions: &ProjectionDefinitions,
        earth_center_deg: Coord<f64>,
    ) -> Result<Self, ProjectionError> {
        let set = Self {
            geodetic: Projection::from_definition(&definitions.geodetic)?,
            local: Projection::from_definition(&definitions.local(earth_center_deg))?,
            global: Projection::from_definition(&definitions.global)?,
        };
        if !set.geodetic.is_geodetic() {
            return Err(ProjectionError::Unsupported(format!(
                "'{}' is not a geodetic projection",
                definitions.geodetic
            )));
        }
        Ok(set)
    }

    /// Geodetic radians to global coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::OutOfDomain`] for points the global
    /// projection cannot represent.
    pub fn geodetic_to_global(&self, point: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        transform(&self.geodetic, &self.global, point)
    }

    /// Geodetic radians to local coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::OutOfDomain`] for non-finite results.
    pub fn geodetic_to_local(&self, point: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        transform(&self.geodetic, &self.local, point)
    }

    /// Global coordinates to local coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::OutOfDomain`] when either step fails.
    pub fn global_to_local(&self, point: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        transform(&self.global, &self.local, point)
    }

    /// Local coordinates to global coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::OutOfDomain`] when either step fails.
    pub fn local_to_global(&self, point: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        transform(&self.local, &self.global, point)
    }
}

/// Size and extent of the output raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetGeometry {
    /// Source pixels per radian of the local projection.
    pub pixels_per_radian: f64,
    /// Projection center in source pixel coordinates.
    pub source_center: Coord<f64>,
    /// Mercator extent of the output.
    pub bounds: MercatorBounds,
    /// Output size.
    pub dimensions: Dimensions,
}

impl TargetGeometry {
    /// Work out the output extent for a source of the given size.
    ///
    /// The source half-extent is converted to an angular radius around
    /// the earth center (widened in longitude by `1 / cos(lat)`), the
    /// resulting geodetic box is projected to Mercator, and the output
    /// width follows from the box aspect ratio.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateOutput`] if a corner cannot be
    /// projected or the output size is empty or not finite.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::suboptimal_flops
    )]
    pub fn plan(
        source: Dimensions,
        earth_center_deg: Coord<f64>,
        calibration: &Calibration,
        base_pixels_per_radian: f64,
        output_height: u32,
        projections: &ProjectionSet,
    ) -> Result<Self, PipelineError> {
        let pixels_per_radian = base_pixels_per_radian * calibration.scale;
        let center = Coord {
            x: earth_center_deg.x.to_radians(),
            y: earth_center_deg.y.to_radians(),
        };
        let radius = Coord {
            x: f64::from(source.width) / 2.0 / pixels_per_radian / center.y.cos(),
            y: f64::from(source.height) / 2.0 / pixels_per_radian,
        };
        tracing::debug!(pixels_per_radian, ?radius, "angular radius of the source");
        if let (Ok(local), Ok(global)) = (
            projections.geodetic_to_local(center),
            projections.geodetic_to_global(center),
        ) {
            tracing::debug!(?local, ?global, "earth center in local and global projections");
        }

        let corner = |p: Coord<f64>| {
            projections.geodetic_to_global(p).map_err(|e| {
                PipelineError::DegenerateOutput(format!("output corner {p:?} cannot be projected: {e}"))
            })
        };
        let south_west = corner(center - radius)?;
        let north_east = corner(center + radius)?;
        let bounds = MercatorBounds::new(south_west, north_east);
        tracing::debug!(min = ?bounds.min(), max = ?bounds.max(), "output bounds");

        if output_height == 0 {
            return Err(PipelineError::DegenerateOutput(
                "output height is zero".to_owned(),
            ));
        }
        let width = f64::from(output_height) / bounds.height() * bounds.width();
        if !(width.is_finite() && width >= 1.0 && width <= f64::from(u32::MAX)) {
            return Err(PipelineError::DegenerateOutput(format!(
                "output width {width} for height {output_height}"
            )));
        }
        let dimensions = Dimensions {
            width: width as u32,
            height: output_height,
        };
        tracing::debug!(%dimensions, "target size");

        Ok(Self {
            pixels_per_radian,
            source_center: Coord {
                x: f64::from(calibration.center_x),
                y: f64::from(calibration.center_y),
            },
            bounds,
            dimensions,
        })
    }

    /// Mercator coordinate of output pixel `(x, y)`. Row 0 is the
    /// northern edge. Pixels past the output extrapolate linearly.
    #[must_use]
    pub fn mercator_point(&self, x: u32, y: u32) -> Coord<f64> {
        let min = self.bounds.min();
        let Dimensions { width, height } = self.dimensions;
        let rows_from_south = f64::from(height) - f64::from(y);
        Coord {
            x: min.x + (self.bounds.width() * f64::from(x)) / f64::from(width),
            y: min.y + (self.bounds.height() * rows_from_south) / f64::from(height),
        }
    }

    /// Output pixel nearest to a Mercator coordinate, if inside the
    /// output.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn pixel_of(&self, point: Coord<f64>) -> Option<(u32, u32)> {
        let Dimensions { width, height } = self.dimensions;
        let x = ((point.x - self.bounds.min().x) / self.bounds.width() * f64::from(width) + 0.5)
            .trunc();
        let y = ((self.bounds.max().y - point.y) / self.bounds.height() * f64::from(height) + 0.5)
            .trunc();
        let inside = (0.0..f64::from(width)).contains(&x) && (0.0..f64::from(height)).contains(&y);
        inside.then(|| (x as u32, y as u32))
    }

    /// Source pixel for a point in local coordinates, rounding half up
    /// and truncating toward zero.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::suboptimal_flops
    )]
    pub fn source_pixel(&self, local: Coord<f64>, source: Dimensions) -> Option<(u32, u32)> {
        let x = (local.x * self.pixels_per_radian + self.source_center.x + 0.5).trunc();
        let y = (-local.y * self.pixels_per_radian + self.source_center.y + 0.5).trunc();
        let inside = (0.0..f64::from(source.width)).contains(&x)
            && (0.0..f64::from(source.height)).contains(&y);
        inside.then(|| (x as u32, y as u32))
    }
}

/// Pixel counts of one resampling sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResampleStats {
    /// Pixels copied from the source.
    pub mapped: u64,
    /// Pixels left transparent.
    pub unmapped: u64,
}

/// Output of [`resample`].
#[derive(Debug, Clone)]
pub struct ResampleOutput {
    /// Resampled raster in Web-Mercator.
    pub image: RgbaImage,
    /// Mercator extent of `image`.
    pub bounds: MercatorBounds,
    /// Mapping counts.
    pub stats: ResampleStats,
}

/// Nearest-pixel resample of `source` onto `geometry`.
///
/// # Errors
///
/// Returns [`PipelineError::ThreadPool`] if a dedicated pool cannot be
/// created, or [`PipelineError::DegenerateOutput`] if the rows cannot be
/// assembled.
pub fn resample(
    source: &RgbaImage,
    projections: &ProjectionSet,
    geometry: &TargetGeometry,
    mode: ProcessingMode,
) -> Result<ResampleOutput, PipelineError> {
    let source_dims = Dimensions::of(source);
    let Dimensions { width, height } = geometry.dimensions;

    let rows = mode.map_rows(height, |y| {
        let mut mapped = 0u64;
        let row: Vec<Rgba<u8>> = (0..width)
            .map(|x| {
                let sampled = projections
                    .global_to_local(geometry.mercator_point(x, y))
                    .ok()
                    .and_then(|local| geometry.source_pixel(local, source_dims))
                    .map(|(sx, sy)| *source.get_pixel(sx, sy));
                mapped += u64::from(sampled.is_some());
                sampled.unwrap_or(TRANSPARENT)
            })
            .collect();
        (row, mapped)
    })?;

    let mapped: u64 = rows.iter().map(|(_, m)| m).sum();
    let stats = ResampleStats {
        mapped,
        unmapped: geometry.dimensions.pixel_count() - mapped,
    };
    let image = assemble_rows(width, height, rows.into_iter().map(|(row, _)| row).collect())?;
    tracing::debug!(mapped = stats.mapped, unmapped = stats.unmapped, "resampled");

    Ok(ResampleOutput {
        image,
        bounds: geometry.bounds,
        stats,
    })
}

/// Output pixel of the local projection origin.
///
/// `None` if the origin falls outside the output or cannot be projected.
#[must_use]
pub fn center_pixel(projections: &ProjectionSet, geometry: &TargetGeometry) -> Option<(u32, u32)> {
    let origin = projections.local_to_global(Coord { x: 0.0, y: 0.0 }).ok()?;
    let (x, y) = geometry.pixel_of(origin)?;
    tracing::debug!(x, y, "earth center in output");
    Some((x, y))
}

/// Paint `color` at `center`, if there is one.
pub fn mark_center(
    image: &mut RgbaImage,
    center: Option<(u32, u32)>,
    color: Rgba<u8>,
) -> Option<(u32, u32)> {
    let (x, y) = center?;
    let pixel = image.get_pixel_mut_checked(x, y)?;
    *pixel = color;
    Some((x, y))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const EARTH_CENTER: Coord<f64> = Coord { x: 37.549, y: 55.648 };
    const FILL: Rgba<u8> = Rgba([0, 152, 0, 255]);

    fn calibration(center_x: u32, center_y: u32) -> Calibration {
        Calibration {
            center_x,
            center_y,
            scale: 1.0,
            grid_spacing: Some(120),
            column_candidates: 2,
            row_candidates: 2,
        }
    }

    fn projections() -> ProjectionSet {
        ProjectionSet::new(&ProjectionDefinitions::default(), EARTH_CENTER).unwrap()
    }

    fn geometry(source: Dimensions, height: u32) -> TargetGeometry {
        TargetGeometry::plan(
            source,
            EARTH_CENTER,
            &calibration(source.width / 2, source.height / 2),
            12_750.0,
            height,
            &projections(),
        )
        .unwrap()
    }

    #[test]
    fn local_definition_appends_origin() {
        let defs = ProjectionDefinitions::default();
        assert_eq!(
            defs.local(Coord { x: 37.5, y: 55.25 }),
            "+proj=aeqd +R=1 +x_0=0 +y_0=0 +lon_0=37.5 +lat_0=55.25"
        );
    }

    #[test]
    fn unparsable_definition_is_an_error() {
        let defs = ProjectionDefinitions {
            global: "+proj=tmerc".to_owned(),
            ..ProjectionDefinitions::default()
        };
        assert!(ProjectionSet::new(&defs, EARTH_CENTER).is_err());
    }

    #[test]
    fn non_geodetic_transform_space_is_rejected() {
        let defs = ProjectionDefinitions {
            geodetic: "+init=epsg:3857".to_owned(),
            ..ProjectionDefinitions::default()
        };
        assert!(matches!(
            ProjectionSet::new(&defs, EARTH_CENTER),
            Err(ProjectionError::Unsupported(_))
        ));
    }

    #[test]
    fn plan_keeps_requested_height_and_positive_width() {
        let g = geometry(Dimensions { width: 1180, height: 960 }, 1000);
        assert_eq!(g.dimensions.height, 1000);
        assert!(g.dimensions.width > 0);
        assert!(g.bounds.width() > 0.0 && g.bounds.height() > 0.0);
    }

    #[test]
    fn output_bounds_contain_earth_center() {
        let set = projections();
        let g = geometry(Dimensions { width: 200, height: 100 }, 100);
        let center = set
            .geodetic_to_global(Coord {
                x: EARTH_CENTER.x.to_radians(),
                y: EARTH_CENTER.y.to_radians(),
            })
            .unwrap();
        assert!(g.bounds.min().x < center.x && center.x < g.bounds.max().x);
        assert!(g.bounds.min().y < center.y && center.y < g.bounds.max().y);
    }

    #[test]
    fn row_zero_is_the_northern_edge() {
        let g = geometry(Dimensions { width: 200, height: 100 }, 100);
        let top = g.mercator_point(0, 0);
        assert!((top.x - g.bounds.min().x).abs() < 1e-9);
        assert!((top.y - g.bounds.max().y).abs() < 1e-6);
        let bottom = g.mercator_point(0, 100);
        assert!((bottom.y - g.bounds.min().y).abs() < 1e-6);
    }

    #[test]
    fn pole_is_degenerate() {
        let center = Coord { x: 0.0, y: 90.0 };
        let set = ProjectionSet::new(&ProjectionDefinitions::default(), center).unwrap();
        let result = TargetGeometry::plan(
            Dimensions { width: 100, height: 100 },
            center,
            &calibration(50, 50),
            12_750.0,
            100,
            &set,
        );
        assert!(matches!(result, Err(PipelineError::DegenerateOutput(_))));
    }

    #[test]
    fn source_pixel_rounds_and_bounds_checks() {
        let g = TargetGeometry {
            pixels_per_radian: 10.0,
            source_center: Coord { x: 5.0, y: 5.0 },
            bounds: MercatorBounds::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }),
            dimensions: Dimensions { width: 1, height: 1 },
        };
        let source = Dimensions { width: 10, height: 10 };
        assert_eq!(g.source_pixel(Coord { x: 0.0, y: 0.0 }, source), Some((5, 5)));
        // Positive local y points up, rows grow downward.
        assert_eq!(g.source_pixel(Coord { x: 0.1, y: 0.1 }, source), Some((6, 4)));
        // -5 + 5 + 0.5 = 0.5 lands on column 0.
        assert_eq!(g.source_pixel(Coord { x: -0.5, y: 0.0 }, source), Some((0, 5)));
        // -5.7 + 5.5 = -0.2 truncates toward zero, also column 0.
        assert_eq!(g.source_pixel(Coord { x: -0.57, y: 0.0 }, source).map(|p| p.0), Some(0));
        // Exactly one past the last column.
        assert_eq!(g.source_pixel(Coord { x: 0.5, y: 0.0 }, source), None);
        assert_eq!(g.source_pixel(Coord { x: f64::NAN, y: 0.0 }, source), None);
    }

    #[test]
    fn uniform_source_fills_the_center() {
        let source = RgbaImage::from_pixel(120, 80, FILL);
        let g = geometry(Dimensions::of(&source), 60);
        let out = resample(&source, &projections(), &g, ProcessingMode::Sequential).unwrap();

        assert_eq!(Dimensions::of(&out.image), g.dimensions);
        assert_eq!(out.stats.mapped + out.stats.unmapped, g.dimensions.pixel_count());
        assert!(out.stats.mapped > out.stats.unmapped);
        let (cx, cy) = (g.dimensions.width / 2, g.dimensions.height / 2);
        assert_eq!(*out.image.get_pixel(cx, cy), FILL);
        for p in out.image.pixels() {
            assert!(*p == FILL || *p == TRANSPARENT);
        }
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let source = RgbaImage::from_fn(90, 70, |x, y| Rgba([(x * 2) as u8, (y * 3) as u8, 7, 255]));
        let g = geometry(Dimensions::of(&source), 50);
        let set = projections();
        let a = resample(&source, &set, &g, ProcessingMode::Sequential).unwrap();
        let b = resample(&source, &set, &g, ProcessingMode::Parallel).unwrap();
        let c = resample(&source, &set, &g, ProcessingMode::ParallelWith(2)).unwrap();
        assert_eq!(a.image, b.image);
        assert_eq!(a.image, c.image);
        assert_eq!(a.stats, b.stats);
    }

    #[test]
    fn marker_lands_near_the_middle() {
        let source = RgbaImage::from_pixel(120, 80, FILL);
        let g = geometry(Dimensions::of(&source), 60);
        let mut image = RgbaImage::new(g.dimensions.width, g.dimensions.height);
        let center = center_pixel(&projections(), &g);
        let (x, y) = mark_center(&mut image, center, Rgba([255, 0, 255, 255])).unwrap();
        assert!(x.abs_diff(g.dimensions.width / 2) <= 1);
        assert!(y.abs_diff(g.dimensions.height / 2) <= 1);
        assert_eq!(*image.get_pixel(x, y), Rgba([255, 0, 255, 255]));
    }

    #[test]
    fn marker_outside_the_image_is_not_painted() {
        let mut image = RgbaImage::new(4, 4);
        assert_eq!(mark_center(&mut image, Some((4, 1)), Rgba([255, 0, 255, 255])), None);
        assert_eq!(mark_center(&mut image, None, Rgba([255, 0, 255, 255])), None);
        assert!(image.pixels().all(|p| *p == Rgba([0, 0, 0, 0])));
    }

    #[test]
    fn mercator_point_extrapolates_below_the_southern_edge() {
        let source = RgbaImage::from_pixel(120, 80, FILL);
        let g = geometry(Dimensions::of(&source), 60);
        let height = g.dimensions.height;
        let south = g.mercator_point(0, height);
        let below = g.mercator_point(0, height + 10);
        assert!((south.y - g.bounds.min().y).abs() < 1e-6);
        let step = g.bounds.height() / f64::from(height);
        assert!((south.y - below.y - 10.0 * step).abs() < 1e-6);
    }
}
