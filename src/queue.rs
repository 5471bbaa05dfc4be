//! Priority task queue shared by the worker pool.
//!
//! Tasks are sorted once at initialization: Isolated (High) before global
//! (Normal), expensive first within a priority band, insertion order as the
//! final tiebreak. Workers pull the head under a mutex; there is no static
//! task-to-worker assignment, so faster workers simply pull more tasks and
//! uneven batch durations self-balance.

use crate::organizer::BatchTask;
use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

pub const HIGH_COST_PER_IMAGE: u64 = 25;
pub const NORMAL_COST_PER_IMAGE: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
}

#[derive(Debug)]
pub struct PrioritizedTask {
    pub task: BatchTask,
    pub priority: Priority,
    pub original_index: usize,
    pub estimated_cost: u64,
}

impl PrioritizedTask {
    fn wrap(task: BatchTask, original_index: usize) -> Self {
        let (priority, per_image) = if task.global {
            (Priority::Normal, NORMAL_COST_PER_IMAGE)
        } else {
            (Priority::High, HIGH_COST_PER_IMAGE)
        };
        let estimated_cost = task.images.len() as u64 * per_image;
        Self {
            task,
            priority,
            original_index,
            estimated_cost,
        }
    }
}

struct QueueState {
    pending: VecDeque<PrioritizedTask>,
    completed: usize,
    total: usize,
}

/// Single-use per run; `new` on a fresh instance replaces all state.
pub struct TaskQueue {
    state: Mutex<QueueState>,
}

impl TaskQueue {
    pub fn new(tasks: Vec<BatchTask>) -> Self {
        let mut wrapped: Vec<PrioritizedTask> = tasks
            .into_iter()
            .enumerate()
            .map(|(i, t)| PrioritizedTask::wrap(t, i))
            .collect();
        // Longest-task-first within each priority band: a makespan heuristic
        // that keeps one straggling high-cost batch from finishing last.
        wrapped.sort_by_key(|t| (t.priority, Reverse(t.estimated_cost), t.original_index));

        let total = wrapped.len();
        Self {
            state: Mutex::new(QueueState {
                pending: wrapped.into(),
                completed: 0,
                total,
            }),
        }
    }

    /// Remove and return the head task. Atomic with respect to all other
    /// callers: no two workers ever receive the same task.
    pub fn next_task(&self, worker_id: usize) -> Option<PrioritizedTask> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let task = state.pending.pop_front();
        if let Some(ref t) = task {
            debug!(
                worker = worker_id,
                index = t.original_index,
                priority = ?t.priority,
                cost = t.estimated_cost,
                remaining = state.pending.len(),
                "task dequeued"
            );
        }
        task
    }

    /// Completion accounting only; never affects dequeue order.
    pub fn mark_completed(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.completed += 1;
    }

    pub fn completed(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .completed
    }

    pub fn total(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).total
    }

    pub fn remaining(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }
}
