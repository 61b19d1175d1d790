//! Row-parallel execution of the per-pixel sweeps.
//!
//! Both the resampling and the cleanup sweep compute each output row from
//! read-only inputs only, so rows can be produced in any order and
//! stitched back together. [`ProcessingMode`] selects between a plain
//! sequential loop and a rayon parallel iterator. The stitched result is
//! identical in every mode because rows are collected in index order.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// How the per-row sweeps are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Single-threaded, rows in order.
    Sequential,
    /// Rayon's global pool.
    #[default]
    Parallel,
    /// A dedicated pool with the given number of threads.
    ParallelWith(usize),
}

impl ProcessingMode {
    /// Evaluate `f` for every row index in `0..rows` and collect the
    /// results in row order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ThreadPool`] if a dedicated pool for
    /// [`ParallelWith`](Self::ParallelWith) cannot be created.
    pub fn map_rows<T, F>(self, rows: u32, f: F) -> Result<Vec<T>, PipelineError>
    where
        T: Send,
        F: Fn(u32) -> T + Sync + Send,
    {
        match self {
            Self::Sequential => Ok((0..rows).map(f).collect()),
            Self::Parallel => Ok((0..rows).into_par_iter().map(f).collect()),
            Self::ParallelWith(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;
                Ok(pool.install(|| (0..rows).into_par_iter().map(f).collect()))
            }
        }
    }
}

/// Stitch rows of pixels into an image.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateOutput`] if the rows do not add up
/// to `width * height` pixels.
pub(crate) fn assemble_rows(
    width: u32,
    height: u32,
    rows: Vec<Vec<Rgba<u8>>>,
) -> Result<RgbaImage, PipelineError> {
    let raw: Vec<u8> = rows.into_iter().flatten().flat_map(|p| p.0).collect();
    RgbaImage::from_raw(width, height, raw).ok_or_else(|| {
        PipelineError::DegenerateOutput(format!(
            "row data does not match a {width}x{height} raster"
        ))
    })
}
