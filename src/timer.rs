//! Cancellable periodic scheduling.
//!
//! Drivers never reschedule themselves. They hand a task to a `Timer` once and keep the returned `CancelToken`;
//! cancelling the token is the only way the task stops running.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error};

use crate::device::error::ResourceError;
use crate::PioResult;

pub type Task = Box<dyn FnMut() + Send>;

/// Source of repeating tasks.
///
/// Runs of one task are delivered serially. Once `CancelToken::cancel` returns, no run is in flight and none
/// will start. A zero `interval` is rejected with `ResourceUnavailable`.
pub trait Timer {
    fn schedule_repeating(&self, interval: Duration, task: Task) -> PioResult<CancelToken>;
}

fn check_interval(interval: Duration) -> PioResult<()> {
    if interval == Duration::from_secs(0) {
        return Err(ResourceError::InvalidConfig("timer interval must not be zero".to_string()).into());
    }
    Ok(())
}

/// Handle of a scheduled task. Dropping it cancels the task.
#[derive(Debug)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    wake: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CancelToken {
    fn flag(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            wake: None,
            worker: None,
        }
    }

    /// Stops future runs and waits for a run in progress to finish.
    ///
    /// Calling it again is a no-op. When called from the task itself it only prevents future runs.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Disconnecting the channel wakes a worker waiting for its next run.
        self.wake.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                error!("scheduled task panicked");
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for CancelToken {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Timer running every task on its own thread.
///
/// The first run happens right after scheduling, the following ones every `interval`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimer;

impl ThreadTimer {
    pub fn new() -> Self {
        ThreadTimer
    }
}

impl Timer for ThreadTimer {
    fn schedule_repeating(&self, interval: Duration, mut task: Task) -> PioResult<CancelToken> {
        check_interval(interval)?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let (wake, sleeper) = mpsc::channel::<()>();

        let flag = Arc::clone(&cancelled);
        let worker = thread::Builder::new()
            .name("pio-timer".to_string())
            .spawn(move || loop {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                task();
                match sleeper.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            })
            .map_err(ResourceError::SchedulerFailed)?;

        debug!("scheduled task every {:?}", interval);
        Ok(CancelToken {
            cancelled,
            wake: Some(wake),
            worker: Some(worker),
        })
    }
}

struct Scheduled {
    interval: Duration,
    cancelled: Arc<AtomicBool>,
    task: Arc<Mutex<Task>>,
}

/// Timer driven by hand, for tests and simulations.
///
/// Nothing runs until `fire` is called. Clones share the same set of tasks.
#[derive(Clone, Default)]
pub struct ManualTimer {
    tasks: Arc<Mutex<Vec<Scheduled>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers one run of every live task, in scheduling order. Returns how many tasks ran.
    pub fn fire(&self) -> usize {
        let due: Vec<(Arc<AtomicBool>, Arc<Mutex<Task>>)> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.retain(|s| !s.cancelled.load(Ordering::SeqCst));
            tasks
                .iter()
                .map(|s| (Arc::clone(&s.cancelled), Arc::clone(&s.task)))
                .collect()
        };

        let mut ran = 0;
        for (cancelled, task) in due {
            // An earlier task in this round may have cancelled a later one.
            if cancelled.load(Ordering::SeqCst) {
                continue;
            }
            let mut task = task.lock().unwrap_or_else(PoisonError::into_inner);
            (*task)();
            ran += 1;
        }
        ran
    }

    /// Calls `fire` `rounds` times.
    pub fn fire_times(&self, rounds: usize) {
        for _ in 0..rounds {
            self.fire();
        }
    }

    /// Intervals of the tasks that were not cancelled yet.
    pub fn live_intervals(&self) -> Vec<Duration> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| !s.cancelled.load(Ordering::SeqCst))
            .map(|s| s.interval)
            .collect()
    }
}

impl Timer for ManualTimer {
    fn schedule_repeating(&self, interval: Duration, task: Task) -> PioResult<CancelToken> {
        check_interval(interval)?;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Scheduled {
                interval,
                cancelled: Arc::clone(&cancelled),
                task: Arc::new(Mutex::new(task)),
            });
        Ok(CancelToken::flag(cancelled))
    }
}
