//! The worker pool and the cooperative await protocol.

use std::any::Any;
use std::cell::Cell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use bscript_diagnostics::FatalError;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::job::{Job, JobHeader, JobId, JobResult};
use crate::queue::JobQueue;

/// Default size of the job table.
pub const DEFAULT_JOB_CAPACITY: usize = 1 << 16;

/// Configuration for a [`JobManager`].
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    /// Number of pool threads. Zero is allowed: jobs then run on whichever
    /// thread awaits them or drains the queue in [`JobManager::wait_until_idle`].
    pub workers: usize,
    /// Maximum number of jobs that can be registered.
    pub capacity: usize,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            capacity: DEFAULT_JOB_CAPACITY,
        }
    }
}

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// A non-zero token identifying the calling thread for wait-for tracking.
fn current_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        if token.get() == 0 {
            token.set(NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

#[derive(Debug, Default)]
struct IdleState {
    parked: usize,
    workers: usize,
}

struct Shared {
    queue: JobQueue,
    idle: Mutex<IdleState>,
    work_ready: Condvar,
    went_idle: Condvar,
    fatal: OnceLock<FatalError>,
    /// Set once by `shutdown`; workers check it before taking more work.
    stopping: AtomicBool,
    /// Which job each parked thread is waiting on.
    waiting: DashMap<u64, JobId>,
}

/// Owns the worker threads and the job table of one compilation session.
pub struct JobManager {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobManager {
    pub fn new(config: JobManagerConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: JobQueue::with_capacity(config.capacity),
            idle: Mutex::new(IdleState::default()),
            work_ready: Condvar::new(),
            went_idle: Condvar::new(),
            fatal: OnceLock::new(),
            stopping: AtomicBool::new(false),
            waiting: DashMap::new(),
        });

        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let worker = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("bscript-worker-{index}"))
                .spawn(move || worker.worker_loop(index));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::warn!("failed to spawn worker {index} ({e}), continuing with {} workers", handles.len());
                    break;
                }
            }
        }
        shared.idle.lock().workers = handles.len();
        tracing::debug!(workers = handles.len(), capacity = config.capacity, "job manager started");

        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.shared.idle.lock().workers
    }

    pub fn job_queue(&self) -> &JobQueue {
        &self.shared.queue
    }

    /// Give `job` a slot in the job table so it can be queued and awaited.
    pub fn register(&self, job: Arc<dyn Job>) -> Result<JobId, FatalError> {
        self.shared.queue.register(job)
    }

    /// Append a registered job to the queue and wake one parked worker.
    ///
    /// Returns `Ok(false)` if the job had already been queued.
    pub fn queue(&self, job: &dyn Job) -> Result<bool, FatalError> {
        let header = job.header();
        let id = header.id().ok_or_else(|| FatalError::UnregisteredJob {
            job: job.describe(),
        })?;
        if !header.mark_queued() {
            return Ok(false);
        }
        self.shared.queue.push(id);
        let _idle = self.shared.idle.lock();
        self.shared.work_ready.notify_one();
        Ok(true)
    }

    /// Make sure `job` has run and return its outcome.
    ///
    /// If no thread has claimed the job yet, the caller claims it and runs it
    /// inline. Otherwise the caller parks until the claiming thread finishes.
    /// Either way the job body runs exactly once.
    pub fn await_job(&self, job: &dyn Job) -> JobResult {
        let header = job.header();
        if header.is_done() {
            return header.finished_outcome();
        }
        if header.try_claim() {
            return self.shared.run_claimed(job);
        }
        self.shared.block_on(job)
    }

    /// Run `job` if nobody has claimed it. Returns whether this call ran it.
    pub fn try_execute(&self, job: &dyn Job) -> bool {
        self.shared.try_execute(job)
    }

    /// Help drain the queue, then block until it is empty and every worker
    /// is parked. Returns the session's fatal error, if one was raised.
    pub fn wait_until_idle(&self) -> JobResult {
        loop {
            while let Some(job) = self.shared.queue.try_pop() {
                self.shared.try_execute(job.as_ref());
            }
            let mut idle = self.shared.idle.lock();
            loop {
                if !self.shared.queue.is_empty() {
                    break;
                }
                if idle.parked >= idle.workers {
                    drop(idle);
                    return self.fatal_error().map_or(Ok(()), Err);
                }
                self.shared.went_idle.wait(&mut idle);
            }
        }
    }

    /// Record `error` as the session's fatal error. Jobs that have not started
    /// yet will not run their bodies; they complete with this error instead.
    pub fn abort(&self, error: FatalError) {
        self.shared.record_fatal(&error);
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    pub fn fatal_error(&self) -> Option<FatalError> {
        self.shared.fatal.get().cloned()
    }

    /// Stop and join every worker. Queued jobs that were not started stay
    /// unrun.
    pub fn shutdown(&self) {
        {
            let _idle = self.shared.idle.lock();
            self.shared.stopping.store(true, Ordering::Release);
            self.shared.work_ready.notify_all();
        }
        let handles = mem::take(&mut *self.handles.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked during shutdown");
            }
        }
        let mut idle = self.shared.idle.lock();
        idle.workers = 0;
        idle.parked = 0;
        self.shared.went_idle.notify_all();
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("workers", &self.worker_count())
            .field("queue", &self.shared.queue)
            .field("fatal", &self.shared.fatal.get())
            .finish()
    }
}

impl Shared {
    fn worker_loop(&self, index: usize) {
        let _span = tracing::debug_span!("worker", index).entered();
        tracing::trace!("worker started");
        loop {
            if self.stopping.load(Ordering::Acquire) {
                break;
            }
            if let Some(job) = self.queue.try_pop() {
                // A job already claimed by an awaiting thread is skipped.
                self.try_execute(job.as_ref());
                continue;
            }
            let mut idle = self.idle.lock();
            if self.stopping.load(Ordering::Acquire) {
                break;
            }
            if !self.queue.is_empty() {
                continue;
            }
            idle.parked += 1;
            self.went_idle.notify_all();
            self.work_ready.wait(&mut idle);
            idle.parked -= 1;
        }
        tracing::trace!("worker stopped");
    }

    fn try_execute(&self, job: &dyn Job) -> bool {
        if job.header().try_claim() {
            let _ = self.run_claimed(job);
            true
        } else {
            false
        }
    }

    /// Run a job this thread has just claimed and publish its outcome.
    fn run_claimed(&self, job: &dyn Job) -> JobResult {
        let header = job.header();
        header.set_runner(current_token());

        let outcome = match self.fatal.get() {
            Some(error) => Err(error.clone()),
            None => {
                let _span = tracing::trace_span!("job", job = %job.describe()).entered();
                match panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
                    Ok(outcome) => outcome,
                    Err(payload) => Err(FatalError::JobPanicked {
                        job: job.describe(),
                        message: panic_message(payload.as_ref()),
                    }),
                }
            }
        };
        if let Err(error) = &outcome {
            self.record_fatal(error);
        }
        header.complete(outcome.clone());
        outcome
    }

    /// Park until another thread finishes `job`, unless doing so would close
    /// a wait-for cycle back to this thread.
    fn block_on(&self, job: &dyn Job) -> JobResult {
        let header = job.header();
        let token = current_token();

        if header.runner() == token {
            return self.cycle(vec![job.describe(), job.describe()]);
        }
        if let Some(id) = header.id() {
            self.waiting.insert(token, id);
            if let Some(chain) = self.find_cycle(token, job) {
                self.waiting.remove(&token);
                return self.cycle(chain);
            }
        }

        let outcome = header.wait();
        self.waiting.remove(&token);
        outcome
    }

    fn cycle(&self, chain: Vec<String>) -> JobResult {
        let error = FatalError::DependencyCycle { chain };
        self.record_fatal(&error);
        Err(error)
    }

    /// Follow job -> claiming thread -> job that thread waits on, looking for
    /// `token`. Edges of jobs that already finished are stale and end the walk.
    fn find_cycle(&self, token: u64, start: &dyn Job) -> Option<Vec<String>> {
        let mut chain = vec![start.describe()];
        let mut edges: Vec<(&JobHeader, u64, JobId)> = Vec::new();
        let mut header: &JobHeader = start.header();
        for _ in 0..=self.queue.registered() {
            let runner = header.runner();
            if runner == 0 || header.is_done() {
                return None;
            }
            let next = self.waiting.get(&runner).map(|entry| *entry.value())?;
            let job = self.queue.get(next)?;
            edges.push((header, runner, next));
            chain.push(job.describe());
            if runner == token {
                return self.still_blocked(&edges).then_some(chain);
            }
            header = job.header();
        }
        None
    }

    /// Re-read every edge of a candidate cycle. The walk reads each edge at a
    /// different moment, so a job may have finished and its runner moved on
    /// to new work in between. A real cycle cannot change under us.
    fn still_blocked(&self, edges: &[(&JobHeader, u64, JobId)]) -> bool {
        edges.iter().all(|(header, runner, next)| {
            !header.is_done()
                && header.runner() == *runner
                && self.waiting.get(runner).is_some_and(|entry| *entry.value() == *next)
        })
    }

    fn record_fatal(&self, error: &FatalError) {
        if self.fatal.set(error.clone()).is_ok() {
            tracing::error!(%error, "compilation aborted");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
