//! radarmap-io: filesystem I/O for the radarmap pipeline.
//!
//! Decodes source and stencil images into RGBA, encodes results as PNG
//! and writes ESRI world files that georeference them. The pipeline
//! crate itself never touches the filesystem.

pub mod raster;
pub mod world_file;

use std::path::PathBuf;

pub use raster::{decode_rgba, encode_png, load_rgba, save_png};
pub use world_file::{save_world_file, world_file, world_file_path};

/// Errors that can occur while reading or writing files.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The input contained no bytes.
    #[error("{0}: input is empty")]
    EmptyInput(PathBuf),

    /// A file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A file could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Image bytes could not be decoded.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[source] image::ImageError),

    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    PngEncode(#[source] image::ImageError),

    /// The raster has no pixels, so it cannot be georeferenced.
    #[error("cannot georeference an empty {width}x{height} raster")]
    EmptyRaster {
        /// Raster width.
        width: u32,
        /// Raster height.
        height: u32,
    },
}
