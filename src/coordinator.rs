//! Concurrency coordinator: one end-to-end processing run.
//!
//! Owns the worker pool and the only cross-worker mutable state (task queue,
//! path registry, aggregate counters). Workers have no assigned share of the
//! work: each loops pulling the next queued batch until the queue runs dry
//! or cancellation lands, so uneven batch durations self-balance.
//!
//! Progress advances per completed batch, not per image; a batch's images
//! complete atomically from the aggregator's point of view.

use crate::analyzer::{self, DirCategory};
use crate::cancel::CancelToken;
use crate::collision::PathRegistry;
use crate::config::RunConfig;
use crate::engine::Engine;
use crate::error::RunError;
use crate::executor;
use crate::fsutil;
use crate::organizer;
use crate::queue::TaskQueue;
use crate::report::{DirCount, RunSummary};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long the 100%-progress state stays observable before the coordinator
/// returns to Idle.
const COMPLETION_LINGER: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Analyzing,
    Organizing,
    Executing,
    Completing,
    Cancelled,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    Cancelled,
}

/// Aggregate processing state; exists only for the duration of one run and
/// is dropped (not zeroed) on teardown.
struct Aggregate {
    processed: usize,
    failures: Vec<String>,
}

pub struct Coordinator {
    engine: Engine,
    config: RunConfig,
    phase: Mutex<RunPhase>,
}

impl Coordinator {
    pub fn new(engine: Engine, config: RunConfig) -> Self {
        Self {
            engine,
            config,
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: RunPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Run the whole pipeline: analyze, organize, execute, complete.
    /// Run-fatal conditions surface as errors before any batch starts;
    /// cancellation is a normal outcome.
    pub fn run(&self, cancel: &CancelToken) -> Result<RunOutcome, RunError> {
        let started = Instant::now();

        self.set_phase(RunPhase::Analyzing);
        let scans = analyzer::analyze_root(
            &self.config.input_root,
            self.config.params.width_threshold,
            cancel,
        )
        .inspect_err(|_| self.set_phase(RunPhase::Idle))?;
        if cancel.is_cancelled() {
            return Ok(self.finish_cancelled());
        }

        self.set_phase(RunPhase::Organizing);
        let total_images: usize = scans.iter().map(|s| s.images.len()).sum();
        if total_images == 0 {
            info!("nothing to convert");
            self.set_phase(RunPhase::Completing);
            self.set_phase(RunPhase::Idle);
            return Ok(RunOutcome::Completed(RunSummary::empty()));
        }

        let worker_count = self.config.worker_count(total_images);
        info!(
            total_images,
            workers = worker_count,
            directories = scans.len(),
            "run organized"
        );

        // Output directories are a run-fatal precondition: nothing may have
        // started when creating one fails.
        self.ensure_output_dirs(&scans)
            .inspect_err(|_| self.set_phase(RunPhase::Idle))?;

        let tasks = organizer::build_tasks(
            &scans,
            &self.config.output_root,
            worker_count,
            &self.config,
        );
        let queue = TaskQueue::new(tasks);
        let registry = PathRegistry::new();
        let aggregate = Mutex::new(Aggregate {
            processed: 0,
            failures: Vec::new(),
        });
        let progress = batch_progress_bar(total_images as u64);

        if cancel.is_cancelled() {
            return Ok(self.finish_cancelled());
        }

        self.set_phase(RunPhase::Executing);
        std::thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let queue = &queue;
                let registry = &registry;
                let aggregate = &aggregate;
                let progress = &progress;
                scope.spawn(move || {
                    self.worker_loop(worker_id, queue, registry, aggregate, progress, cancel)
                });
            }
        });

        if cancel.is_cancelled() {
            progress.finish_and_clear();
            registry.reset();
            return Ok(self.finish_cancelled());
        }

        self.set_phase(RunPhase::Completing);
        progress.finish();
        registry.reset();

        let aggregate = aggregate.into_inner().unwrap_or_else(|e| e.into_inner());
        let summary = RunSummary {
            directories: scans
                .iter()
                .map(|s| DirCount {
                    name: s
                        .dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| s.dir.display().to_string()),
                    images: s.images.len(),
                    isolated: s.category == DirCategory::Isolated,
                })
                .collect(),
            global_images: scans
                .iter()
                .filter(|s| s.category == DirCategory::GlobalBatch)
                .map(|s| s.images.len())
                .sum(),
            total_images,
            processed: aggregate.processed,
            failed: aggregate.failures,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            processed = summary.processed,
            failed = summary.failed.len(),
            elapsed_secs = summary.elapsed_secs,
            "run complete"
        );

        std::thread::sleep(COMPLETION_LINGER);
        self.set_phase(RunPhase::Idle);
        Ok(RunOutcome::Completed(summary))
    }

    /// The work-stealing loop: pull, execute, record, repeat.
    fn worker_loop(
        &self,
        worker_id: usize,
        queue: &TaskQueue,
        registry: &PathRegistry,
        aggregate: &Mutex<Aggregate>,
        progress: &ProgressBar,
        cancel: &CancelToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let Some(prioritized) = queue.next_task(worker_id) else {
                return;
            };

            let outcome = executor::run_batch(
                &self.engine,
                &prioritized.task,
                &self.config.params,
                registry,
                cancel,
            );
            if outcome.cancelled {
                // Cancelled work is neither success nor failure.
                return;
            }

            let mut agg = aggregate.lock().unwrap_or_else(|e| e.into_inner());
            agg.processed += outcome.processed;
            agg.failures.extend(outcome.failed);
            progress.set_position(agg.processed as u64);
            drop(agg);

            queue.mark_completed();
        }
    }

    fn ensure_output_dirs(&self, scans: &[analyzer::DirectoryScan]) -> Result<(), RunError> {
        let mkdir = |path: &std::path::Path| {
            fsutil::ensure_dir(path).map_err(|source| RunError::OutputDir {
                path: path.to_path_buf(),
                source,
            })
        };
        mkdir(&self.config.output_root)?;
        for scan in scans {
            if scan.category == DirCategory::Isolated {
                mkdir(
                    &self
                        .config
                        .output_root
                        .join(scan.dir.file_name().unwrap_or_default()),
                )?;
            }
        }
        Ok(())
    }

    fn finish_cancelled(&self) -> RunOutcome {
        warn!("run cancelled");
        self.set_phase(RunPhase::Cancelled);
        self.set_phase(RunPhase::Idle);
        RunOutcome::Cancelled
    }
}

fn batch_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images ({eta})")
            .expect("Invalid progress bar template")
            .progress_chars("#>-"),
    );
    bar
}
