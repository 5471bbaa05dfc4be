//! Dimension prober: width/height from file headers, no pixel decode.
//!
//! Small sets are probed serially; larger sets go through rayon in fixed
//! chunks so one slow file does not serialize the whole batch.

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Below this many images the chunked-parallel path is not worth the setup.
pub const PARALLEL_PROBE_THRESHOLD: usize = 20;

const PROBE_CHUNK: usize = 16;

/// Header-only probe. `None` means the dimensions could not be obtained;
/// callers decide whether that is a failed file or a conservative
/// classification.
pub fn probe_dimensions(path: &Path) -> Option<(u32, u32)> {
    match image::image_dimensions(path) {
        Ok(dims) => Some(dims),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read image dimensions");
            None
        }
    }
}

/// Probe every path, preserving order.
pub fn probe_all(paths: &[PathBuf]) -> Vec<Option<(u32, u32)>> {
    if paths.len() < PARALLEL_PROBE_THRESHOLD {
        paths.iter().map(|p| probe_dimensions(p)).collect()
    } else {
        paths
            .par_chunks(PROBE_CHUNK)
            .flat_map_iter(|chunk| {
                chunk
                    .iter()
                    .map(|p| probe_dimensions(p))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
