//! ESRI world files for georeferencing the Web-Mercator output.
//!
//! A world file holds six lines: x pixel size, two rotation terms
//! (always zero here), negative y pixel size, and the map coordinates of
//! the center of the upper-left pixel.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use radarmap_pipeline::{Dimensions, MercatorBounds};

use crate::IoError;

/// Path of the world file accompanying a PNG at `output`.
#[must_use]
pub fn world_file_path(output: &Path) -> PathBuf {
    output.with_extension("pgw")
}

/// Render the world file describing a raster of `dimensions` covering
/// `bounds`.
///
/// # Errors
///
/// Returns [`IoError::EmptyRaster`] if either dimension is zero.
pub fn world_file(bounds: &MercatorBounds, dimensions: Dimensions) -> Result<String, IoError> {
    if dimensions.width == 0 || dimensions.height == 0 {
        return Err(IoError::EmptyRaster {
            width: dimensions.width,
            height: dimensions.height,
        });
    }
    let pixel_width = bounds.width() / f64::from(dimensions.width);
    let pixel_height = bounds.height() / f64::from(dimensions.height);
    let origin_x = bounds.min().x + pixel_width / 2.0;
    let origin_y = bounds.max().y - pixel_height / 2.0;

    let mut text = String::new();
    for value in [pixel_width, 0.0, 0.0, -pixel_height, origin_x, origin_y] {
        let _ = writeln!(text, "{value:.10}");
    }
    Ok(text)
}

/// Write the world file for `output` next to it.
///
/// Returns the path written.
///
/// # Errors
///
/// Returns [`IoError::EmptyRaster`] for an empty raster or
/// [`IoError::Write`] if the file cannot be written.
pub fn save_world_file(
    output: &Path,
    bounds: &MercatorBounds,
    dimensions: Dimensions,
) -> Result<PathBuf, IoError> {
    let text = world_file(bounds, dimensions)?;
    let path = world_file_path(output);
    std::fs::write(&path, text).map_err(|source| IoError::Write {
        path: path.clone(),
        source,
    })?;
    tracing::info!(path = %path.display(), "wrote world file");
    Ok(path)
}
