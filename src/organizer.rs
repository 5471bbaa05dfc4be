//! Batch task organizer: classified directories in, batch tasks out.
//!
//! Isolated directories are chunked per directory, each task writing into a
//! per-directory output subfolder. GlobalBatch images are pooled across
//! directories and chunked once, targeting the shared output root.

use crate::analyzer::{DirCategory, DirectoryScan};
use crate::config::RunConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BatchTask {
    pub images: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub global: bool,
}

/// Consecutive chunks of at most `size` images, preserving order; the last
/// chunk may be smaller. Empty input or a zero size yields no batches.
pub fn split_into_batches(images: &[PathBuf], size: usize) -> Vec<Vec<PathBuf>> {
    if images.is_empty() || size == 0 {
        return Vec::new();
    }
    images.chunks(size).map(|chunk| chunk.to_vec()).collect()
}

/// Turn directory scans into the run's full task list. Isolated tasks come
/// first, then the pooled global tasks; the queue re-sorts by priority and
/// cost afterwards, with this construction order as the tiebreak.
pub fn build_tasks(
    scans: &[DirectoryScan],
    output_root: &Path,
    worker_count: usize,
    config: &RunConfig,
) -> Vec<BatchTask> {
    let mut tasks = Vec::new();
    let mut global_pool: Vec<PathBuf> = Vec::new();

    for scan in scans {
        match scan.category {
            DirCategory::Isolated => {
                let out_dir = output_root.join(scan.dir.file_name().unwrap_or_default());
                let size = config.batch_size_for(scan.images.len(), worker_count);
                for chunk in split_into_batches(&scan.images, size) {
                    tasks.push(BatchTask {
                        images: chunk,
                        output_dir: out_dir.clone(),
                        batch_size: size,
                        global: false,
                    });
                }
            }
            DirCategory::GlobalBatch => {
                global_pool.extend(scan.images.iter().cloned());
            }
        }
    }

    if !global_pool.is_empty() {
        let size = config.batch_size_for(global_pool.len(), worker_count);
        for chunk in split_into_batches(&global_pool, size) {
            tasks.push(BatchTask {
                images: chunk,
                output_dir: output_root.to_path_buf(),
                batch_size: size,
                global: true,
            });
        }
    }

    debug!(
        tasks = tasks.len(),
        pooled = global_pool.len(),
        "batch tasks organized"
    );
    tasks
}
