//! Background streaming worker.
//!
//! One polling loop per connection instance. The loop invokes a cycle
//! closure roughly every millisecond while its running flag is set; the
//! closure receives the flag so long-running cycle work (the
//! discovery-window wait during a lazy reconnect) can bail out early when
//! a stop has been requested.
//!
//! Stop is cooperative: `stop()` clears the flag and waits up to the grace
//! period for the thread to observe it. A thread still busy after the
//! grace (e.g. blocked in the transport) is abandoned; it exits at its
//! next flag check and is never reused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Cycle period of the polling loop.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Grace period granted to the loop when stopping before it is abandoned.
pub(crate) const STOP_GRACE: Duration = Duration::from_millis(200);

struct WorkerHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Owner of the background polling thread for one connection instance.
pub(crate) struct StreamWorker {
    slot: Mutex<Option<WorkerHandle>>,
}

impl StreamWorker {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Spawns the polling loop. No-op if a loop is already running.
    pub(crate) fn start<F>(&self, mut cycle: F)
    where
        F: FnMut(&AtomicBool) + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap();
        if slot.as_ref().is_some_and(|w| !w.thread.is_finished()) {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::spawn(move || {
            while flag.load(Ordering::Relaxed) {
                cycle(&flag);
                thread::sleep(POLL_INTERVAL);
            }
        });

        *slot = Some(WorkerHandle { running, thread });
    }

    /// Whether the loop is currently running.
    pub(crate) fn is_running(&self) -> bool {
        self.slot
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|w| w.running.load(Ordering::Relaxed) && !w.thread.is_finished())
    }

    /// Stops the loop: clears the flag, waits up to `grace` for the thread
    /// to finish, joins it if it did and abandons it otherwise.
    pub(crate) fn stop(&self, grace: Duration) {
        let taken = self.slot.lock().unwrap().take();
        let Some(worker) = taken else {
            return;
        };

        worker.running.store(false, Ordering::Relaxed);

        let deadline = Instant::now() + grace;
        while !worker.thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }

        if worker.thread.is_finished() {
            let _ = worker.thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_cycle_runs_until_stopped() {
        let worker = StreamWorker::new();
        let cycles = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&cycles);

        worker.start(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert!(worker.is_running());

        let deadline = Instant::now() + Duration::from_secs(1);
        while cycles.load(Ordering::Relaxed) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(cycles.load(Ordering::Relaxed) >= 3);

        worker.stop(STOP_GRACE);
        assert!(!worker.is_running());

        let after_stop = cycles.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(cycles.load(Ordering::Relaxed), after_stop);
    }

    #[test]
    fn test_start_is_idempotent_while_running() {
        let worker = StreamWorker::new();
        let cycles = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&cycles);
        worker.start(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        // Second start must not replace the running loop.
        let counter = Arc::clone(&cycles);
        worker.start(move |_| {
            counter.fetch_add(1_000_000, Ordering::Relaxed);
        });

        thread::sleep(Duration::from_millis(20));
        worker.stop(STOP_GRACE);
        assert!(cycles.load(Ordering::Relaxed) < 1_000_000);
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let worker = StreamWorker::new();
        worker.stop(STOP_GRACE);
        assert!(!worker.is_running());
    }

    #[test]
    fn test_stop_joins_slow_cycle_within_grace() {
        let worker = StreamWorker::new();

        worker.start(move |_| {
            // Slow cycle work; the stop lands mid-cycle and the loop must
            // still wind down inside the grace period.
            thread::sleep(Duration::from_millis(5));
        });

        thread::sleep(Duration::from_millis(10));
        worker.stop(STOP_GRACE);
        assert!(!worker.is_running());
    }
}
