//! Runs a node's scheduled tasks on the tokio runtime.

use membership_core::{Clock, TaskQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Background loop that wakes every `tick` and spawns whatever is due.
///
/// Each due task gets its own tokio task, so a slow resync never delays an
/// activation. Stops when dropped.
pub struct Dispatcher {
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(tasks: Arc<TaskQueue>, clock: Arc<dyn Clock>, tick: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                for task in tasks.take_due(clock.now_ms()) {
                    tokio::spawn(task());
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
