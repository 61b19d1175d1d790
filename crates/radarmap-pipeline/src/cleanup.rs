//! Legend-color cleanup of the resampled raster.
//!
//! Every output pixel is decided from the frozen resampled raster and
//! the stencil, never from pixels already rewritten by this pass. In
//! priority order:
//!
//! 1. A pixel whose 5x5 neighborhood contains more than five
//!    outer-background and more than five inner-background pixels sits on
//!    the seam between map and margin and becomes the boundary color.
//! 2. A pixel that is not a legend color (and is not intentional black),
//!    or that is the road-colored legend entry where the stencil shows a
//!    road, is replaced by the closest legend-colored neighbor, or made
//!    transparent when there is none.
//! 3. Everything else is kept.

use std::ops::AddAssign;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::color::{ColorModel, TRANSPARENT, colors_equal};
use crate::parallel::{ProcessingMode, assemble_rows};
use crate::types::{Dimensions, PipelineError};

/// Half-width of the boundary window (5x5).
const BOUNDARY_RADIUS: i64 = 2;

/// A window side needs more than this many matches of each background.
const BOUNDARY_MIN_COUNT: u32 = 5;

/// Neighbor offsets searched for replacements and stencil ink: `[-2, 2)`.
const NEIGHBOR_OFFSETS: std::ops::Range<i64> = -2..2;

/// Manhattan distance a replacement must beat.
const MAX_NEIGHBOR_DISTANCE: i64 = 10;

/// What happened to one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Painted with the boundary color.
    Boundary,
    /// Left as it was.
    Kept,
    /// Replaced by a neighboring legend color.
    Replaced(Rgba<u8>),
    /// Needed replacement but no neighbor qualified.
    Cleared,
}

impl Decision {
    /// Output color for a pixel originally colored `original`.
    #[must_use]
    pub fn color(self, original: Rgba<u8>, colors: &ColorModel) -> Rgba<u8> {
        match self {
            Self::Boundary => colors.boundary,
            Self::Kept => original,
            Self::Replaced(c) => c,
            Self::Cleared => TRANSPARENT,
        }
    }
}

/// Per-decision pixel counts of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Pixels painted as boundary.
    pub boundary: u64,
    /// Pixels kept unchanged.
    pub kept: u64,
    /// Pixels replaced by a neighbor color.
    pub replaced: u64,
    /// Pixels made transparent for lack of a replacement.
    pub cleared: u64,
}

impl CleanupStats {
    fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Boundary => self.boundary += 1,
            Decision::Kept => self.kept += 1,
            Decision::Replaced(_) => self.replaced += 1,
            Decision::Cleared => self.cleared += 1,
        }
    }
}

impl AddAssign for CleanupStats {
    fn add_assign(&mut self, rhs: Self) {
        self.boundary += rhs.boundary;
        self.kept += rhs.kept;
        self.replaced += rhs.replaced;
        self.cleared += rhs.cleared;
    }
}

/// Output of [`clean`].
#[derive(Debug, Clone)]
pub struct CleanupOutput {
    /// The cleaned raster.
    pub image: RgbaImage,
    /// Decision counts.
    pub stats: CleanupStats,
}

fn pixel_at(image: &RgbaImage, x: i64, y: i64) -> Option<Rgba<u8>> {
    let x = u32::try_from(x).ok()?;
    let y = u32::try_from(y).ok()?;
    image.get_pixel_checked(x, y).copied()
}

/// Whether `(x, y)` lies on the seam between map and outer margin.
///
/// Window pixels outside the image count as outer background, and so do
/// exactly transparent ones (left by resampling).
#[must_use]
pub fn is_boundary(image: &RgbaImage, x: u32, y: u32, colors: &ColorModel) -> bool {
    let (x, y) = (i64::from(x), i64::from(y));
    let mut outer = 0u32;
    let mut inner = 0u32;
    for dy in -BOUNDARY_RADIUS..=BOUNDARY_RADIUS {
        for dx in -BOUNDARY_RADIUS..=BOUNDARY_RADIUS {
            match pixel_at(image, x + dx, y + dy) {
                Some(p) => {
                    if colors.is_outer_background(p) || p == TRANSPARENT {
                        outer += 1;
                    }
                    if colors.is_inner_background(p) {
                        inner += 1;
                    }
                }
                None => outer += 1,
            }
        }
    }
    outer > BOUNDARY_MIN_COUNT && inner > BOUNDARY_MIN_COUNT
}

/// Whether a black pixel is intentional ink: the stencil has no black
/// nearby. Stencil pixels outside the stencil are treated as no ink.
#[must_use]
pub fn is_kept_black(
    image: &RgbaImage,
    stencil: &RgbaImage,
    x: u32,
    y: u32,
    colors: &ColorModel,
) -> bool {
    if !colors_equal(*image.get_pixel(x, y), colors.black, colors.tolerances.exact) {
        return false;
    }
    let (x, y) = (i64::from(x), i64::from(y));
    let black_near = NEIGHBOR_OFFSETS.flat_map(|dx| NEIGHBOR_OFFSETS.map(move |dy| (dx, dy))).any(
        |(dx, dy)| {
            pixel_at(stencil, x + dx, y + dy)
                .is_some_and(|s| colors_equal(s, colors.black, colors.tolerances.loose))
        },
    );
    !black_near
}

/// Whether the pixel is the road-colored legend entry where the stencil
/// shows a road.
#[must_use]
pub fn is_bad_road_color(
    image: &RgbaImage,
    stencil: &RgbaImage,
    x: u32,
    y: u32,
    colors: &ColorModel,
) -> bool {
    colors_equal(*image.get_pixel(x, y), colors.bad_color, colors.tolerances.exact)
        && stencil
            .get_pixel_checked(x, y)
            .is_some_and(|&s| colors_equal(s, colors.bad_color, colors.tolerances.road))
}

/// Closest legend-colored neighbor in the `[-2, 2)` window.
///
/// Offsets are scanned column-major (`dx` outer, `dy` inner) and a
/// candidate must be strictly closer than the best so far, so among
/// equally distant neighbors the first in scan order wins.
#[must_use]
pub fn nearest_palette_color(
    image: &RgbaImage,
    x: u32,
    y: u32,
    colors: &ColorModel,
) -> Option<Rgba<u8>> {
    let (x, y) = (i64::from(x), i64::from(y));
    let mut best = None;
    let mut best_distance = MAX_NEIGHBOR_DISTANCE;
    for dx in NEIGHBOR_OFFSETS {
        for dy in NEIGHBOR_OFFSETS {
            let distance = dx.abs() + dy.abs();
            if let Some(p) = pixel_at(image, x + dx, y + dy)
                && colors.is_replacement_candidate(p)
                && distance < best_distance
            {
                best_distance = distance;
                best = Some(p);
            }
        }
    }
    best
}

/// Decide the fate of pixel `(x, y)` of the frozen raster `image`.
#[must_use]
pub fn decide(
    image: &RgbaImage,
    stencil: &RgbaImage,
    x: u32,
    y: u32,
    colors: &ColorModel,
) -> Decision {
    if is_boundary(image, x, y, colors) {
        return Decision::Boundary;
    }
    let pixel = *image.get_pixel(x, y);
    let foreign = !colors.is_palette_color(pixel) && !is_kept_black(image, stencil, x, y, colors);
    if foreign || is_bad_road_color(image, stencil, x, y, colors) {
        return nearest_palette_color(image, x, y, colors)
            .map_or(Decision::Cleared, Decision::Replaced);
    }
    Decision::Kept
}

/// Run the cleanup pass over `image`.
///
/// # Errors
///
/// Returns [`PipelineError::ThreadPool`] if a dedicated pool cannot be
/// created, or [`PipelineError::DegenerateOutput`] if the rows cannot be
/// assembled.
pub fn clean(
    image: &RgbaImage,
    stencil: &RgbaImage,
    colors: &ColorModel,
    mode: ProcessingMode,
) -> Result<CleanupOutput, PipelineError> {
    let dimensions = Dimensions::of(image);
    let stencil_dimensions = Dimensions::of(stencil);
    if stencil_dimensions != dimensions {
        tracing::warn!(
            %dimensions,
            stencil = %stencil_dimensions,
            "stencil size differs from the resampled raster",
        );
    }

    let rows = mode.map_rows(dimensions.height, |y| {
        let mut stats = CleanupStats::default();
        let row: Vec<Rgba<u8>> = (0..dimensions.width)
            .map(|x| {
                let decision = decide(image, stencil, x, y, colors);
                stats.record(decision);
                decision.color(*image.get_pixel(x, y), colors)
            })
            .collect();
        (row, stats)
    })?;

    let mut stats = CleanupStats::default();
    let mut pixels = Vec::with_capacity(rows.len());
    for (row, row_stats) in rows {
        stats += row_stats;
        pixels.push(row);
    }
    let image = assemble_rows(dimensions.width, dimensions.height, pixels)?;
    tracing::debug!(
        boundary = stats.boundary,
        kept = stats.kept,
        replaced = stats.replaced,
        cleared = stats.cleared,
        "cleaned",
    );
    Ok(CleanupOutput { image, stats })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GREEN: Rgba<u8> = Rgba([0, 152, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const RED: Rgba<u8> = Rgba([116, 0, 0, 255]);
    const ROAD: Rgba<u8> = Rgba([0, 68, 136, 255]);
    const STRAY: Rgba<u8> = Rgba([50, 50, 50, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const OUTER: Rgba<u8> = Rgba([164, 160, 160, 255]);
    const INNER: Rgba<u8> = Rgba([208, 208, 208, 255]);

    fn blank_stencil(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, WHITE)
    }

    /// 7x7 palette-colored image with `outer` and `inner` pixels laid out
    /// inside the 5x5 window around (3, 3), never on (3, 3) itself.
    fn window_image(outer: usize, inner: usize) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(7, 7, GREEN);
        let slots = (1..6)
            .flat_map(|y| (1..6).map(move |x| (x, y)))
            .filter(|&p| p != (3, 3));
        for (i, (x, y)) in slots.enumerate() {
            if i < outer {
                img.put_pixel(x, y, OUTER);
            } else if i < outer + inner {
                img.put_pixel(x, y, INNER);
            }
        }
        img
    }

    #[test]
    fn six_and_six_is_boundary() {
        let colors = ColorModel::default();
        assert!(is_boundary(&window_image(6, 6), 3, 3, &colors));
        let img = window_image(6, 6);
        let out = clean(&img, &blank_stencil(7, 7), &colors, ProcessingMode::Sequential).unwrap();
        assert_eq!(*out.image.get_pixel(3, 3), colors.boundary);
    }

    #[test]
    fn three_and_three_is_not_boundary() {
        let colors = ColorModel::default();
        assert!(!is_boundary(&window_image(3, 3), 3, 3, &colors));
        assert!(!is_boundary(&window_image(12, 5), 3, 3, &colors));
    }

    #[test]
    fn transparent_and_out_of_bounds_count_as_outer() {
        let colors = ColorModel::default();
        let mut img = RgbaImage::from_pixel(7, 7, INNER);
        for x in 0..7 {
            img.put_pixel(x, 0, TRANSPARENT);
        }
        // Window around (3, 1): row -1 is outside (5), row 0 is
        // transparent (5), the rest is inner (15).
        assert!(is_boundary(&img, 3, 1, &colors));
        // Corner of a uniform inner image: 16 of 25 window pixels are
        // outside the image.
        let uniform = RgbaImage::from_pixel(7, 7, INNER);
        assert!(is_boundary(&uniform, 0, 0, &colors));
        assert!(!is_boundary(&uniform, 3, 3, &colors));
    }

    #[test]
    fn nearest_prefers_column_major_scan_order() {
        let colors = ColorModel::default();
        let mut img = RgbaImage::from_pixel(6, 6, STRAY);
        img.put_pixel(2, 3, BLUE); // dx = -1, dy = 0
        img.put_pixel(3, 2, RED); // dx = 0, dy = -1
        assert_eq!(nearest_palette_color(&img, 3, 3, &colors), Some(BLUE));
    }

    #[test]
    fn nearest_prefers_closer_over_earlier() {
        let colors = ColorModel::default();
        let mut img = RgbaImage::from_pixel(6, 6, STRAY);
        img.put_pixel(1, 1, BLUE); // dx = -2, dy = -2
        img.put_pixel(4, 3, RED); // dx = 1, dy = 0
        assert_eq!(nearest_palette_color(&img, 3, 3, &colors), Some(RED));
    }

    #[test]
    fn window_excludes_plus_two_offsets() {
        let colors = ColorModel::default();
        let mut img = RgbaImage::from_pixel(6, 6, STRAY);
        img.put_pixel(5, 3, BLUE); // dx = +2
        assert_eq!(nearest_palette_color(&img, 3, 3, &colors), None);
    }

    #[test]
    fn bad_color_never_used_as_fill() {
        let colors = ColorModel::default();
        let mut img = RgbaImage::from_pixel(6, 6, STRAY);
        img.put_pixel(2, 3, ROAD);
        assert_eq!(nearest_palette_color(&img, 3, 3, &colors), None);
        let out = clean(&img, &blank_stencil(6, 6), &colors, ProcessingMode::Sequential).unwrap();
        assert_eq!(*out.image.get_pixel(3, 3), TRANSPARENT);
        // The road-colored pixel itself is a legend color and stays.
        assert_eq!(*out.image.get_pixel(2, 3), ROAD);
    }

    #[test]
    fn stray_pixel_takes_neighbor_color() {
        let colors = ColorModel::default();
        let mut img = RgbaImage::from_pixel(6, 6, GREEN);
        img.put_pixel(3, 3, STRAY);
        let out = clean(&img, &blank_stencil(6, 6), &colors, ProcessingMode::Sequential).unwrap();
        assert_eq!(*out.image.get_pixel(3, 3), GREEN);
        assert_eq!(out.stats.replaced, 1);
        assert_eq!(out.stats.kept, 35);
    }

    #[test]
    fn bad_road_color_on_stencil_road_is_replaced() {
        let colors = ColorModel::default();
        let mut img = RgbaImage::from_pixel(6, 6, GREEN);
        img.put_pixel(3, 3, ROAD);
        let mut stencil = blank_stencil(6, 6);
        stencil.put_pixel(3, 3, Rgba([10, 70, 130, 255]));
        assert!(is_bad_road_color(&img, &stencil, 3, 3, &colors));
        assert_eq!(decide(&img, &stencil, 3, 3, &colors), Decision::Replaced(GREEN));

        // Without a road on the stencil the legend color stays.
        let plain = blank_stencil(6, 6);
        assert_eq!(decide(&img, &plain, 3, 3, &colors), Decision::Kept);
    }

    #[test]
    fn black_is_kept_unless_stencil_has_black_nearby() {
        let colors = ColorModel::default();
        let mut img = RgbaImage::from_pixel(6, 6, GREEN);
        img.put_pixel(3, 3, BLACK);

        let plain = blank_stencil(6, 6);
        assert!(is_kept_black(&img, &plain, 3, 3, &colors));
        assert_eq!(decide(&img, &plain, 3, 3, &colors), Decision::Kept);

        let mut inked = blank_stencil(6, 6);
        inked.put_pixel(2, 2, BLACK);
        assert!(!is_kept_black(&img, &inked, 3, 3, &colors));
        assert_eq!(decide(&img, &inked, 3, 3, &colors), Decision::Replaced(GREEN));

        // Stencil ink at +2 is outside the window.
        let mut far = blank_stencil(6, 6);
        far.put_pixel(5, 3, BLACK);
        assert!(is_kept_black(&img, &far, 3, 3, &colors));
    }

    #[test]
    fn smaller_stencil_reads_as_no_ink() {
        let colors = ColorModel::default();
        let mut img = RgbaImage::from_pixel(8, 8, GREEN);
        img.put_pixel(6, 6, BLACK);
        img.put_pixel(5, 5, ROAD);
        let stencil = RgbaImage::from_pixel(2, 2, BLACK);
        let out = clean(&img, &stencil, &colors, ProcessingMode::Sequential).unwrap();
        assert_eq!(*out.image.get_pixel(6, 6), BLACK);
        assert_eq!(*out.image.get_pixel(5, 5), ROAD);
    }

    #[test]
    fn cleanup_is_idempotent_on_conforming_input() {
        let colors = ColorModel::default();
        let img = RgbaImage::from_fn(24, 18, |x, y| {
            colors.palette[((x / 4 + y / 3) as usize) % colors.palette.len()]
        });
        let img = RgbaImage::from_fn(24, 18, |x, y| {
            let p = *img.get_pixel(x, y);
            if p == colors.bad_color { GREEN } else { p }
        });
        let stencil = blank_stencil(24, 18);
        let once = clean(&img, &stencil, &colors, ProcessingMode::Parallel).unwrap();
        assert_eq!(once.image, img);
        let twice = clean(&once.image, &stencil, &colors, ProcessingMode::Parallel).unwrap();
        assert_eq!(twice.image, once.image);
    }

    #[test]
    fn recleaning_with_itself_as_stencil_keeps_palette_pixels() {
        let colors = ColorModel::default();
        let img = RgbaImage::from_fn(20, 16, |x, y| {
            if x % 5 == 2 && y % 4 == 1 {
                ROAD
            } else if x % 7 == 5 && y % 5 == 3 {
                TRANSPARENT
            } else if x % 6 == 0 && y % 6 == 4 {
                colors.boundary
            } else if (x / 3) % 2 == 0 {
                GREEN
            } else {
                BLUE
            }
        });
        assert!(img.pixels().any(|p| *p == colors.boundary));

        let once = clean(&img, &img, &colors, ProcessingMode::Sequential).unwrap();
        let mut roads = 0;
        for (x, y, p) in img.enumerate_pixels() {
            let q = *once.image.get_pixel(x, y);
            if colors.is_replacement_candidate(*p) {
                assert_eq!(q, *p, "({x}, {y}) changed");
            }
            if *p == colors.bad_color {
                // The pixel matches its own road, so it is refilled.
                roads += 1;
                assert!(colors.is_replacement_candidate(q), "({x}, {y}): {q:?}");
            }
        }
        assert!(roads > 0);
        assert!(once.stats.replaced >= roads);

        let twice = clean(&once.image, &once.image, &colors, ProcessingMode::Sequential).unwrap();
        assert_eq!(twice.image, once.image);
        assert_eq!(twice.stats.kept, 20 * 16);
    }

    #[test]
    fn modes_produce_identical_output() {
        let colors = ColorModel::default();
        let img = RgbaImage::from_fn(40, 30, |x, y| match (x * 7 + y * 3) % 5 {
            0 => OUTER,
            1 => INNER,
            2 => STRAY,
            3 => GREEN,
            _ => BLUE,
        });
        let stencil = blank_stencil(40, 30);
        let a = clean(&img, &stencil, &colors, ProcessingMode::Sequential).unwrap();
        let b = clean(&img, &stencil, &colors, ProcessingMode::ParallelWith(3)).unwrap();
        assert_eq!(a.image, b.image);
        assert_eq!(a.stats, b.stats);
        let total = a.stats.boundary + a.stats.kept + a.stats.replaced + a.stats.cleared;
        assert_eq!(total, 40 * 30);
    }
}
