//! Directory analyzer: classify each input subdirectory before batching.
//!
//! A handful of images per directory is sampled and probed; any spread-width
//! sample marks the directory Isolated (per-image splitting, scheduled at
//! high priority). Unprobeable samples also classify as Isolated, the more
//! expensive handling, so a bad header never downgrades a spread directory.

use crate::cancel::CancelToken;
use crate::error::RunError;
use crate::fsutil;
use crate::probe;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sampled images per directory.
pub const SAMPLE_COUNT: usize = 5;

/// Sampled height at or above this marks the directory high-resolution.
pub const HIGH_RES_MIN_HEIGHT: u32 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirCategory {
    /// Wide spread pages; each image may split into two output pages.
    Isolated,
    /// Narrow pages, pooled across directories into the global batch.
    GlobalBatch,
}

#[derive(Debug, Clone)]
pub struct DirectoryScan {
    pub dir: PathBuf,
    pub images: Vec<PathBuf>,
    pub category: DirCategory,
    pub high_resolution: bool,
}

/// Scan the immediate subdirectories of `root` and classify each one.
///
/// Subdirectories without supported images are skipped with a warning. The
/// scan is cancellable between directories and between samples; on
/// cancellation the directories classified so far are returned and the
/// directory in flight is dropped. Failing to list `root` itself is fatal.
pub fn analyze_root(
    root: &Path,
    width_threshold: u32,
    cancel: &CancelToken,
) -> Result<Vec<DirectoryScan>, RunError> {
    let subdirs = fsutil::list_subdirectories(root).map_err(|source| RunError::InputScan {
        path: root.to_path_buf(),
        source,
    })?;

    let mut scans = Vec::new();
    for dir in subdirs {
        if cancel.is_cancelled() {
            info!(scanned = scans.len(), "analysis cancelled");
            return Ok(scans);
        }

        let images = fsutil::list_image_files(&dir);
        if images.is_empty() {
            warn!(dir = %dir.display(), "no supported images, skipping directory");
            continue;
        }

        let Some(scan) = classify_directory(dir, images, width_threshold, cancel) else {
            // Cancelled mid-sample; no partial-directory result.
            info!(scanned = scans.len(), "analysis cancelled");
            return Ok(scans);
        };
        debug!(
            dir = %scan.dir.display(),
            images = scan.images.len(),
            category = ?scan.category,
            high_resolution = scan.high_resolution,
            "directory classified"
        );
        scans.push(scan);
    }
    Ok(scans)
}

fn classify_directory(
    dir: PathBuf,
    images: Vec<PathBuf>,
    width_threshold: u32,
    cancel: &CancelToken,
) -> Option<DirectoryScan> {
    let mut category = DirCategory::GlobalBatch;
    let mut high_resolution = false;

    for sample in images.iter().take(SAMPLE_COUNT) {
        if cancel.is_cancelled() {
            return None;
        }
        match probe::probe_dimensions(sample) {
            Some((width, height)) => {
                if height >= HIGH_RES_MIN_HEIGHT {
                    high_resolution = true;
                }
                if width >= width_threshold {
                    category = DirCategory::Isolated;
                }
            }
            None => {
                category = DirCategory::Isolated;
            }
        }
    }

    Some(DirectoryScan {
        dir,
        images,
        category,
        high_resolution,
    })
}
