//! The unit of deferred work and its execution bookkeeping.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use bscript_diagnostics::FatalError;
use parking_lot::{Condvar, Mutex};

/// The outcome of running a job. Local diagnostics are not errors here;
/// only failures that abort the session are.
pub type JobResult = Result<(), FatalError>;

/// Index of a registered job in its manager's job table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u32);

impl JobId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Running,
    Done,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::NotStarted => write!(f, "not started"),
            JobState::Running => write!(f, "running"),
            JobState::Done => write!(f, "done"),
        }
    }
}

/// A unit of work executed at most once by whichever thread claims it first.
pub trait Job: Send + Sync {
    fn header(&self) -> &JobHeader;

    /// The job body. Called exactly once, on the claiming thread.
    fn run(&self) -> JobResult;

    /// Human-readable name used in logs and cycle reports.
    fn describe(&self) -> String;
}

/// Execution state embedded in every job.
pub struct JobHeader {
    id: OnceLock<JobId>,
    claimed: AtomicBool,
    has_run: AtomicBool,
    queued: AtomicBool,
    /// Token of the thread that claimed the job, 0 until claimed.
    runner: AtomicU64,
    outcome: OnceLock<JobResult>,
    gate: Mutex<()>,
    finished: Condvar,
}

impl JobHeader {
    pub fn new() -> Self {
        Self {
            id: OnceLock::new(),
            claimed: AtomicBool::new(false),
            has_run: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            runner: AtomicU64::new(0),
            outcome: OnceLock::new(),
            gate: Mutex::new(()),
            finished: Condvar::new(),
        }
    }

    pub fn id(&self) -> Option<JobId> {
        self.id.get().copied()
    }

    pub fn state(&self) -> JobState {
        if self.has_run.load(Ordering::Acquire) {
            JobState::Done
        } else if self.claimed.load(Ordering::Acquire) {
            JobState::Running
        } else {
            JobState::NotStarted
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.has_run.load(Ordering::Acquire)
    }

    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    /// The recorded outcome once the job is done.
    pub fn outcome(&self) -> Option<JobResult> {
        if self.is_done() {
            self.outcome.get().cloned()
        } else {
            None
        }
    }

    pub(crate) fn assign_id(&self, id: JobId) -> bool {
        self.id.set(id).is_ok()
    }

    /// Atomically claim the right to run the job.
    #[inline]
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` the first time only.
    pub(crate) fn mark_queued(&self) -> bool {
        !self.queued.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn set_runner(&self, token: u64) {
        self.runner.store(token, Ordering::Release);
    }

    pub(crate) fn runner(&self) -> u64 {
        self.runner.load(Ordering::Acquire)
    }

    /// Publish the outcome and release every parked waiter.
    pub(crate) fn complete(&self, outcome: JobResult) {
        let _ = self.outcome.set(outcome);
        let _gate = self.gate.lock();
        self.has_run.store(true, Ordering::Release);
        self.finished.notify_all();
    }

    /// Park until the job is done and return its outcome.
    pub(crate) fn wait(&self) -> JobResult {
        let mut gate = self.gate.lock();
        while !self.has_run.load(Ordering::Acquire) {
            self.finished.wait(&mut gate);
        }
        drop(gate);
        self.finished_outcome()
    }

    pub(crate) fn finished_outcome(&self) -> JobResult {
        self.outcome
            .get()
            .cloned()
            .unwrap_or_else(|| Err(FatalError::Internal("finished job has no outcome".into())))
    }
}

impl Default for JobHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHeader")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("queued", &self.is_queued())
            .finish()
    }
}

/// A job wrapping a closure.
pub struct FnJob<F> {
    header: JobHeader,
    label: String,
    body: F,
}

impl<F> FnJob<F>
where
    F: Fn() -> JobResult + Send + Sync,
{
    pub fn new(label: impl Into<String>, body: F) -> Self {
        Self {
            header: JobHeader::new(),
            label: label.into(),
            body,
        }
    }
}

impl<F> Job for FnJob<F>
where
    F: Fn() -> JobResult + Send + Sync,
{
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn run(&self) -> JobResult {
        (self.body)()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
