//! Worker thread pool for blocking asset I/O and decode.
//!
//! Workers are spawned lazily. Each owns a bounded queue guarded by its own
//! mutex and condition variable; a submitted job goes to the least-loaded
//! worker still under its queue cap, and a new worker is only started when
//! every existing one is saturated. A global outstanding-job counter lets the
//! main thread poll for "everything finished" without blocking.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use super::error::panic_message;

/// A unit of background work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct WorkerQueue {
    jobs: Mutex<VecDeque<Job>>,
    wake: Condvar,
}

struct Worker {
    queue: Arc<WorkerQueue>,
    handle: Option<JoinHandle<()>>,
}

/// Lazily grown pool of worker threads
pub struct WorkerPool {
    workers: Mutex<Vec<Worker>>,
    max_workers: usize,
    jobs_per_worker: usize,
    outstanding: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Create an empty pool; no thread is started until the first submit
    pub fn new(max_workers: usize, jobs_per_worker: usize) -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
            max_workers: max_workers.max(1),
            jobs_per_worker: jobs_per_worker.max(1),
            outstanding: Arc::new(AtomicUsize::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a job
    ///
    /// Only blocks for the queue locks. The outstanding counter is bumped
    /// before the job becomes visible to any worker. When every worker is
    /// saturated and the pool is at its maximum size, the job is queued on
    /// the least-loaded worker past its cap.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let mut workers = self.workers.lock();
        let loads: Vec<usize> = workers.iter().map(|w| w.queue.jobs.lock().len()).collect();

        let under_cap = loads
            .iter()
            .enumerate()
            .filter(|&(_, &len)| len < self.jobs_per_worker)
            .min_by_key(|&(_, &len)| len)
            .map(|(i, _)| i);

        let index = match under_cap {
            Some(i) => i,
            None if workers.len() < self.max_workers => {
                let worker = self.spawn_worker(workers.len());
                workers.push(worker);
                workers.len() - 1
            }
            None => loads
                .iter()
                .enumerate()
                .min_by_key(|&(_, &len)| len)
                .map(|(i, _)| i)
                .unwrap_or(0),
        };

        let queue = &workers[index].queue;
        queue.jobs.lock().push_back(Box::new(job));
        queue.wake.notify_one();
    }

    /// True iff no submitted job is queued or running
    pub fn is_drained(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) == 0
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn spawn_worker(&self, index: usize) -> Worker {
        let queue = Arc::new(WorkerQueue {
            jobs: Mutex::new(VecDeque::with_capacity(self.jobs_per_worker)),
            wake: Condvar::new(),
        });
        let thread_queue = Arc::clone(&queue);
        let stop = Arc::clone(&self.stop);
        let outstanding = Arc::clone(&self.outstanding);

        let handle = thread::Builder::new()
            .name(format!("asset-worker-{}", index))
            .spawn(move || worker_loop(&thread_queue, &stop, &outstanding))
            .expect("failed to spawn asset worker thread");

        log::debug!("Started asset worker {}", index);
        Worker {
            queue,
            handle: Some(handle),
        }
    }
}

fn worker_loop(queue: &WorkerQueue, stop: &AtomicBool, outstanding: &AtomicUsize) {
    loop {
        let job = {
            let mut jobs = queue.jobs.lock();
            loop {
                if let Some(job) = jobs.pop_front() {
                    break job;
                }
                if stop.load(Ordering::Acquire) {
                    return;
                }
                queue.wake.wait(&mut jobs);
            }
        };

        // The job is consumed (and its captures dropped) before the counter
        // is released, so a drained pool holds no job state.
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            log::error!(
                "Asset job panicked on {}: {}",
                thread::current().name().unwrap_or("worker"),
                panic_message(payload.as_ref())
            );
        }
        outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);

        let mut workers = std::mem::take(self.workers.get_mut());
        for worker in &workers {
            // Notify under the lock so a worker between its stop check and
            // its wait can't miss the wakeup.
            let _jobs = worker.queue.jobs.lock();
            worker.queue.wake.notify_all();
        }

        let current = thread::current().id();
        for worker in &mut workers {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("Asset worker thread exited with a panic");
            }
        }

        debug_assert_eq!(
            self.outstanding.load(Ordering::Acquire),
            0,
            "worker pool dropped with outstanding jobs"
        );
        log::debug!("Worker pool shut down ({} workers)", workers.len());
    }
}
