//! A fixed-size pool of worker threads and a batch barrier on top of it.
use std::{
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam::channel::{unbounded, Sender};
use log::{debug, error};
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug)]
pub enum ThreadPoolError {
    #[error("Thread pool needs at least one worker")]
    NoWorkers,
    #[error("Could not spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("Thread pool has shut down")]
    Disconnected,
}

/// A task did not produce a result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Task panicked: {0}")]
pub struct TaskPanicked(pub String);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(n_threads: usize) -> Result<Self, ThreadPoolError> {
        if n_threads == 0 {
            return Err(ThreadPoolError::NoWorkers);
        }
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(n_threads);
        for idx in 0..n_threads {
            let rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("zarr-sink-worker-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if let Err(e) = catch_unwind(AssertUnwindSafe(job)) {
                            error!("Worker {idx}: task panicked: {}", panic_message(e));
                        }
                    }
                })?;
            workers.push(handle);
        }
        debug!("Started thread pool with {n_threads} workers");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// One worker per available core.
    pub fn with_available_parallelism() -> Result<Self, ThreadPoolError> {
        let n = thread::available_parallelism().map_or(1, |n| n.get());
        Self::new(n)
    }

    pub fn n_threads(&self) -> usize {
        self.workers.len()
    }

    /// Run a detached task.
    pub fn execute<F>(&self, f: F) -> Result<(), ThreadPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .as_ref()
            .ok_or(ThreadPoolError::Disconnected)?
            .send(Box::new(f))
            .map_err(|_| ThreadPoolError::Disconnected)
    }

    /// Start a group of tasks which can be waited on together.
    pub fn batch<T: Send + 'static>(&self) -> Batch<'_, T> {
        Batch {
            pool: self,
            latch: Arc::new(Latch::default()),
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // closing the channel ends every worker loop once the queue is drained
        self.sender.take();
        for w in self.workers.drain(..) {
            if w.join().is_err() {
                error!("Worker thread panicked outside of a task");
            }
        }
    }
}

/// A counter which can be waited on until it reaches zero.
#[derive(Debug, Default)]
pub struct Latch {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Latch {
    pub fn increment(&self) {
        *lock(&self.count) += 1;
    }

    pub fn count_down(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.cv.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *lock(&self.count)
    }

    /// Block until the count is zero.
    pub fn wait(&self) {
        let mut count = lock(&self.count);
        while *count > 0 {
            count = self.cv.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Counts its latch down when dropped, however the task exits.
struct CountDown(Arc<Latch>);

impl Drop for CountDown {
    fn drop(&mut self) {
        self.0.count_down();
    }
}

type Slots<T> = Arc<Mutex<Vec<Option<Result<T, TaskPanicked>>>>>;

/// Tasks submitted to a [ThreadPool] whose results are collected together.
pub struct Batch<'p, T> {
    pool: &'p ThreadPool,
    latch: Arc<Latch>,
    results: Slots<T>,
}

impl<'p, T: Send + 'static> Batch<'p, T> {
    pub fn submit<F>(&mut self, f: F) -> Result<(), ThreadPoolError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let slot = {
            let mut results = lock(&self.results);
            results.push(None);
            results.len() - 1
        };
        self.latch.increment();
        let guard = CountDown(self.latch.clone());
        let results = self.results.clone();
        // if the job is never run, dropping it releases the latch
        self.pool.execute(move || {
            let _guard = guard;
            let out = catch_unwind(AssertUnwindSafe(f))
                .map_err(|e| TaskPanicked(panic_message(e)));
            if let Err(e) = &out {
                error!("Batch task {slot} failed: {e}");
            }
            lock(&results)[slot] = Some(out);
        })
    }

    pub fn len(&self) -> usize {
        lock(&self.results).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every submitted task, returning their results in submission order.
    pub fn join(self) -> Vec<Result<T, TaskPanicked>> {
        self.latch.wait();
        let mut results = lock(&self.results);
        results
            .drain(..)
            .map(|r| r.unwrap_or_else(|| Err(TaskPanicked("task was never run".to_owned()))))
            .collect()
    }
}

/// Unwrap joined results, or return the first failure in submission order.
///
/// Every failure is logged.
pub fn first_error<T, E>(results: Vec<Result<Result<T, E>, TaskPanicked>>) -> Result<Vec<T>, E>
where
    E: From<TaskPanicked> + std::fmt::Display,
{
    let mut out = Vec::with_capacity(results.len());
    let mut first_err = None;
    for r in results {
        match r.map_err(E::from).and_then(|inner| inner) {
            Ok(v) => out.push(v),
            Err(e) => {
                error!("{e}");
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}
