// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The injectable scheduler port for periodic work.
//!
//! Every timer in the core (metric sampling, pool maintenance, governor
//! ticks) runs through this port so production code gets real background
//! threads while tests drive ticks deterministically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on how long a cancelled [`ThreadScheduler`] task keeps
/// sleeping before it notices the cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A periodic task scheduler.
///
/// Implementations must not run task bodies on a caller's thread; each
/// repeating task gets its own execution context so one long-running body
/// never delays another timer.
pub trait Scheduler: Send + Sync + 'static {
    /// Schedules `task` to run repeatedly, once every `every`, until the
    /// returned handle is cancelled. The first run happens promptly rather
    /// than after an initial delay.
    fn repeat(&self, every: Duration, task: Box<dyn FnMut() + Send + 'static>) -> TaskHandle;
}

/// Handle to a scheduled repeating task.
///
/// Cancelling is idempotent; dropping the handle cancels the task.
#[derive(Debug)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Creates a handle around a shared cancellation flag.
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled }
    }

    /// Stops future runs of the task. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The production scheduler: one background thread per repeating task.
///
/// Each thread runs the task, then sleeps out the remainder of the interval
/// (drift-compensated), polling the cancellation flag so `cancel()` takes
/// effect within [`CANCEL_POLL_INTERVAL`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl ThreadScheduler {
    /// Creates the scheduler.
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for ThreadScheduler {
    fn repeat(&self, every: Duration, mut task: Box<dyn FnMut() + Send + 'static>) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                let started = Instant::now();
                task();

                if started.elapsed() > every {
                    log::debug!(
                        "Scheduled task overran its {:?} interval ({:?})",
                        every,
                        started.elapsed()
                    );
                }
                while started.elapsed() < every {
                    if flag.load(Ordering::SeqCst) {
                        return;
                    }
                    let remaining = every.saturating_sub(started.elapsed());
                    thread::sleep(remaining.min(CANCEL_POLL_INTERVAL));
                }
            }
        });

        TaskHandle::new(cancelled)
    }
}

struct ManualTask {
    cancelled: Arc<AtomicBool>,
    task: Arc<Mutex<Box<dyn FnMut() + Send + 'static>>>,
}

/// A deterministic scheduler for tests.
///
/// Registered tasks never run on their own; each call to [`tick_all`]
/// runs every live task exactly once, on the calling thread, in
/// registration order.
///
/// [`tick_all`]: ManualScheduler::tick_all
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<ManualTask>>,
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every non-cancelled task once and prunes cancelled ones.
    pub fn tick_all(&self) {
        let live: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.retain(|t| !t.cancelled.load(Ordering::SeqCst));
            tasks.iter().map(|t| Arc::clone(&t.task)).collect()
        };
        // Run outside the registry lock so a task may schedule new work.
        for task in live {
            let mut task = task.lock().unwrap();
            (*task)();
        }
    }

    /// Number of live (not yet cancelled) tasks.
    pub fn task_count(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|t| !t.cancelled.load(Ordering::SeqCst));
        tasks.len()
    }
}

impl Scheduler for ManualScheduler {
    fn repeat(&self, _every: Duration, task: Box<dyn FnMut() + Send + 'static>) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.tasks.lock().unwrap().push(ManualTask {
            cancelled: Arc::clone(&cancelled),
            task: Arc::new(Mutex::new(task)),
        });
        TaskHandle::new(cancelled)
    }
}
