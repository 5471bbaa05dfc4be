//! Run configuration and adaptive scheduling parameters.
//!
//! Conversion parameters mirror what the engine command line needs; the
//! scheduling side computes worker count and batch size when the user did
//! not pin them.

use std::path::PathBuf;

/// Unsharp mask parameters, rendered as `RxS+A+T` on the engine command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnsharpMask {
    pub radius: f32,
    pub sigma: f32,
    pub amount: f32,
    pub threshold: f32,
}

impl Default for UnsharpMask {
    fn default() -> Self {
        Self {
            radius: 0.0,
            sigma: 1.0,
            amount: 0.8,
            threshold: 0.016,
        }
    }
}

/// Per-image conversion parameters shared by every batch of a run.
#[derive(Debug, Clone)]
pub struct ConvertParams {
    /// Images at least this wide are treated as two-page spreads and split.
    pub width_threshold: u32,
    /// Target output height; width follows the aspect ratio.
    pub resize_height: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
    pub grayscale: bool,
    pub unsharp: Option<UnsharpMask>,
}

impl Default for ConvertParams {
    fn default() -> Self {
        Self {
            width_threshold: 2000,
            resize_height: 1600,
            quality: 85,
            grayscale: false,
            unsharp: Some(UnsharpMask::default()),
        }
    }
}

/// One processing run: where to read, where to write, how to convert, and
/// optional manual overrides for the scheduler.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub params: ConvertParams,
    /// Manual worker count; `None` selects the staircase below.
    pub workers: Option<usize>,
    /// Manual batch size (minimum 1); `None` selects [`auto_batch_size`].
    pub batch_size: Option<usize>,
}

impl RunConfig {
    pub fn worker_count(&self, total_images: usize) -> usize {
        match self.workers {
            Some(w) => w.max(1),
            None => auto_worker_count(total_images),
        }
    }

    pub fn batch_size_for(&self, image_count: usize, worker_count: usize) -> usize {
        match self.batch_size {
            Some(size) => size.max(1),
            None => auto_batch_size(image_count, worker_count),
        }
    }
}

/// Staircase from total image count to worker count, capped at the physical
/// core count. Tiny inputs stay single-threaded so subprocess overhead does
/// not dominate.
pub fn auto_worker_count(total_images: usize) -> usize {
    let cores = num_cpus::get_physical().max(1);
    let step = if total_images < 10 {
        1
    } else if total_images < 50 {
        2
    } else if total_images < 200 {
        4
    } else {
        cores
    };
    step.min(cores).max(1)
}

const IMAGES_PER_IDEAL_BATCH: usize = 40;
const MAX_BATCH_SIZE: usize = 1000;

/// Adaptive batch size: aim for roughly one batch per 40 images, round the
/// batch count up to a multiple of `worker_count` so batches divide evenly
/// across workers, then derive the size. Always in `1..=1000`.
pub fn auto_batch_size(image_count: usize, worker_count: usize) -> usize {
    if image_count == 0 {
        return 1;
    }
    let workers = worker_count.max(1);
    let ideal_batches = image_count.div_ceil(IMAGES_PER_IDEAL_BATCH);
    let adjusted_batches = ideal_batches.div_ceil(workers) * workers;
    image_count.div_ceil(adjusted_batches).clamp(1, MAX_BATCH_SIZE)
}
