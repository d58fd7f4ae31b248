//! One-shot scheduled tasks.
//!
//! A min-heap on `(fire_at, seq)`. Whoever owns the dispatch loop pops due
//! tasks and runs them; nothing runs on the call stack that scheduled it.
//! Ties on `fire_at` run in scheduling order.

use futures::future::BoxFuture;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// A deferred action. Built lazily when the task fires.
pub type Task = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct Scheduled {
    fire_at: u64,
    seq: u64,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered queue of pending one-shot tasks.
#[derive(Default)]
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<Scheduled>>,
    next_seq: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `f` to run at `fire_at` (ms on the owning clock).
    pub fn schedule<F, Fut>(&self, fire_at: u64, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule_task(fire_at, Box::new(move || Box::pin(f())));
    }

    pub fn schedule_task(&self, fire_at: u64, task: Task) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Scheduled { fire_at, seq, task });
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire time of the earliest task, if any.
    pub fn next_fire_at(&self) -> Option<u64> {
        self.heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .peek()
            .map(|s| s.fire_at)
    }

    /// Pop every task with `fire_at <= now`, in firing order.
    ///
    /// The heap lock is released before returning, so the caller runs tasks
    /// without holding it.
    pub fn take_due(&self, now: u64) -> Vec<Task> {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        while heap.peek().is_some_and(|s| s.fire_at <= now) {
            if let Some(scheduled) = heap.pop() {
                due.push(scheduled.task);
            }
        }
        due
    }

    /// Run every due task to completion, one after another.
    ///
    /// Tasks scheduled while these run wait for the next call. Returns how
    /// many ran.
    pub async fn run_due(&self, now: u64) -> usize {
        let due = self.take_due(now);
        let count = due.len();
        for task in due {
            task().await;
        }
        count
    }
}
