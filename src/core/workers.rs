//! Deferred execution context for work that must not run on the caller's
//! stack (refill decisions, upstream range requests).
//!
//! One thread drains a global FIFO injector, so deferred jobs of a cache run
//! in submission order and never race each other.
//!
//! Epoch mechanism drops jobs scheduled before the last discontinuous seek.

use crossbeam::deque::Injector;
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-thread deferred job queue.
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handle: Option<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    /// Jobs queued or running
    pending: Arc<AtomicUsize>,
}

impl Workers {
    /// Spawn the worker thread `name`, skipping jobs whose epoch no longer
    /// matches `epoch`.
    pub fn new(name: &str, epoch: Arc<AtomicU64>) -> std::io::Result<Self> {
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let handle = {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let pending = Arc::clone(&pending);

            thread::Builder::new().name(name.to_string()).spawn(move || {
                trace!("Worker started");

                loop {
                    if let Some(job) = injector.steal().success() {
                        job();
                        pending.fetch_sub(1, Ordering::AcqRel);
                        continue;
                    }

                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }

                    // No work - short sleep to avoid CPU spin
                    thread::sleep(Duration::from_millis(1));
                }

                trace!("Worker stopped");
            })?
        };

        trace!("Worker '{}' initialized", name);
        Ok(Self {
            injector,
            handle: Some(handle),
            current_epoch: epoch,
            shutdown,
            pending,
        })
    }

    /// Run closure on a worker thread.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.injector.push(Box::new(f));
    }

    /// Run closure only if the epoch still equals `epoch` when a worker
    /// picks it up.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        self.execute(move || {
            if current_epoch.load(Ordering::Acquire) == epoch {
                f();
            } else {
                trace!("Skipping stale job (epoch {})", epoch);
            }
        });
    }

    /// True when no job is queued or running
    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    /// Block until idle or `timeout` elapsed. Returns true when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        trace!("Worker shutting down...");
        self.shutdown.store(true, Ordering::SeqCst);

        let Some(handle) = self.handle.take() else {
            return;
        };
        // Last owner dropped from inside a job
        if handle.thread().id() == thread::current().id() {
            return;
        }

        // Remaining queued jobs still run before the worker exits; bound the wait
        let deadline = Instant::now() + Duration::from_millis(500);
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                trace!("Shutdown timeout reached, detaching worker");
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        let _ = handle.join();
        trace!("Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_runs_jobs_in_order() {
        let workers = Workers::new("test-worker", Arc::new(AtomicU64::new(0))).unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..10 {
            let o = Arc::clone(&order);
            workers.execute(move || {
                o.lock().unwrap().push(i);
            });
        }
        assert!(workers.wait_idle(Duration::from_secs(2)));
        // Submission order
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_stale_epoch_skipped() {
        let epoch = Arc::new(AtomicU64::new(3));
        let workers = Workers::new("test-worker", Arc::clone(&epoch)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        workers.execute_with_epoch(2, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&counter);
        workers.execute_with_epoch(3, move || {
            c.fetch_add(10, Ordering::SeqCst);
        });

        assert!(workers.wait_idle(Duration::from_secs(2)));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
