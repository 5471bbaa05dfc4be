//! comicpress core library
//!
//! Batch comic-page conversion pipeline: directory classification, adaptive
//! batch sizing, a priority work-stealing task queue, and per-batch execution
//! against a GraphicsMagick `gm batch` subprocess.
//!
//! - Directory analysis and classification (Isolated vs GlobalBatch)
//! - Batch task organization with adaptive batch sizing
//! - Mutex-guarded priority task queue shared by a fixed worker pool
//! - Collision-free output path allocation
//! - Per-batch engine subprocess streaming with conservative failure policy
//! - Run coordination, aggregation, progress and cancellation

pub mod analyzer;
pub mod cancel;
pub mod collision;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fsutil;
pub mod logging;
pub mod organizer;
pub mod probe;
pub mod queue;
pub mod report;

#[cfg(test)]
pub(crate) mod testutil;

pub use analyzer::{analyze_root, DirCategory, DirectoryScan};
pub use cancel::CancelToken;
pub use collision::PathRegistry;
pub use config::{auto_batch_size, auto_worker_count, ConvertParams, RunConfig, UnsharpMask};
pub use coordinator::{Coordinator, RunOutcome, RunPhase};
pub use engine::{escape_path, Engine};
pub use error::{Result, RunError};
pub use executor::{run_batch, BatchOutcome};
pub use organizer::{build_tasks, split_into_batches, BatchTask};
pub use queue::{Priority, PrioritizedTask, TaskQueue};
pub use report::RunSummary;
