//! Fixed-size worker pool with a FIFO task queue (§4.4).
//!
//! Queue mutations and the `terminating` flag are guarded by one mutex +
//! condvar; pool lifecycle (`start`/`stop`/`is_started`) by a second mutex,
//! so lifecycle operations never serialize behind enqueueing.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

use crate::error::ConfigError;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    jobs: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    terminating: Mutex<bool>,
}

struct Lifecycle {
    started: bool,
    workers: Vec<JoinHandle<()>>,
}

pub struct ThreadPool {
    num_threads: usize,
    queue: Arc<Queue>,
    lifecycle: Mutex<Lifecycle>,
}

impl ThreadPool {
    /// `num_threads == 0` fails with [`ConfigError::ZeroThreads`].
    pub fn new(num_threads: usize, auto_start: bool) -> Result<Self, ConfigError> {
        if num_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        let pool = Self {
            num_threads,
            queue: Arc::new(Queue {
                jobs: Mutex::new(VecDeque::new()),
                condvar: Condvar::new(),
                terminating: Mutex::new(false),
            }),
            lifecycle: Mutex::new(Lifecycle {
                started: false,
                workers: Vec::new(),
            }),
        };
        if auto_start {
            pool.start();
        }
        Ok(pool)
    }

    /// Sizes the pool to the host's available parallelism. A convenience
    /// for callers (such as a [`crate::bus::ThreadedBus`]) that have no
    /// reason to pick a specific worker count themselves.
    pub fn for_available_parallelism(auto_start: bool) -> Result<Self, ConfigError> {
        Self::new(num_cpus::get(), auto_start)
    }

    /// Enqueues a task regardless of whether the pool is currently started;
    /// a subsequent `start()` runs whatever has piled up.
    pub fn schedule<F: FnOnce() + Send + 'static>(&self, job: F) {
        self.queue.jobs.lock().unwrap().push_back(Box::new(job));
        self.queue.condvar.notify_one();
    }

    /// No-op if already started.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.started {
            return;
        }
        *self.queue.terminating.lock().unwrap() = false;
        debug!(num_threads = self.num_threads, "starting thread pool");
        for _ in 0..self.num_threads {
            let queue = self.queue.clone();
            lifecycle.workers.push(std::thread::spawn(move || Self::worker_loop(queue)));
        }
        lifecycle.started = true;
    }

    /// Waits for all workers to drain their current task and exit, dropping
    /// anything still queued. No-op if already stopped.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if !lifecycle.started {
            return;
        }
        debug!("stopping thread pool");
        *self.queue.terminating.lock().unwrap() = true;
        self.queue.condvar.notify_all();
        for worker in lifecycle.workers.drain(..) {
            let _ = worker.join();
        }
        self.queue.jobs.lock().unwrap().clear();
        lifecycle.started = false;
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.lock().unwrap().started
    }

    fn worker_loop(queue: Arc<Queue>) {
        loop {
            let job = {
                let mut jobs = queue.jobs.lock().unwrap();
                loop {
                    if let Some(job) = jobs.pop_front() {
                        break Some(job);
                    }
                    if *queue.terminating.lock().unwrap() {
                        break None;
                    }
                    jobs = queue.condvar.wait(jobs).unwrap();
                }
            };
            match job {
                Some(job) => {
                    // A panicking task must not take the worker thread down
                    // with it, nor poison state shared with other tasks.
                    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                }
                None => return,
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn available_parallelism_sizing_starts_and_stops_cleanly() {
        let pool = ThreadPool::for_available_parallelism(true).unwrap();
        assert!(pool.is_started());
        pool.stop();
        assert!(!pool.is_started());
    }

    #[test]
    fn zero_threads_fails() {
        assert!(matches!(
            ThreadPool::new(0, false),
            Err(ConfigError::ZeroThreads)
        ));
    }

    #[test]
    fn tasks_enqueued_before_start_run_on_start() {
        let pool = ThreadPool::new(2, false).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            pool.schedule(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        pool.start();
        pool.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn stop_then_start_runs_newly_scheduled_tasks() {
        let pool = ThreadPool::new(1, true).unwrap();
        pool.stop();
        assert!(!pool.is_started());

        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        pool.schedule(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        pool.start();
        // give the worker a moment to drain before asserting.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        pool.stop();
    }

    #[test]
    fn repeated_start_and_stop_are_idempotent() {
        let pool = ThreadPool::new(2, false).unwrap();
        pool.start();
        pool.start();
        assert!(pool.is_started());
        pool.stop();
        pool.stop();
        assert!(!pool.is_started());
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let pool = ThreadPool::new(1, true).unwrap();
        pool.schedule(|| panic!("boom"));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        pool.schedule(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        pool.stop();
    }
}
