//! bscript_jobs: Cooperative job scheduling for the bscript compiler.
//!
//! A [`Job`] runs exactly once. Worker threads of a [`JobManager`] drain a
//! lock-free [`JobQueue`], while any thread that needs a job's result calls
//! [`JobManager::await_job`]: if nobody has started the job yet, the caller
//! runs it inline; otherwise it parks until the running thread finishes.

pub mod job;
pub mod manager;
pub mod queue;

pub use job::{FnJob, Job, JobHeader, JobId, JobResult, JobState};
pub use manager::{JobManager, JobManagerConfig};
pub use queue::JobQueue;
