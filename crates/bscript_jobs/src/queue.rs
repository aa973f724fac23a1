//! Lock-free multi-producer/multi-consumer FIFO of jobs.
//!
//! Jobs live in a preallocated slab and the queue links them through atomic
//! slab indices, in the style of a Michael-Scott queue. Slot 0 is the initial
//! sentinel; every dequeue turns the dequeued slot into the new sentinel.
//! A job is linked at most once in its lifetime, so an index is never
//! recycled while another thread may still hold it, and indices cannot be
//! subject to ABA.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use bscript_diagnostics::FatalError;
use crossbeam::utils::{Backoff, CachePadded};

use crate::job::{Job, JobId};

const NIL: u32 = u32::MAX;
const SENTINEL: u32 = 0;

struct Slot {
    job: OnceLock<Arc<dyn Job>>,
    next: AtomicU32,
}

impl Slot {
    fn empty() -> Self {
        Self {
            job: OnceLock::new(),
            next: AtomicU32::new(NIL),
        }
    }
}

pub struct JobQueue {
    slots: Box<[Slot]>,
    registered: AtomicUsize,
    head: CachePadded<AtomicU32>,
    tail: CachePadded<AtomicU32>,
}

impl JobQueue {
    /// Create a queue able to hold `capacity` registered jobs.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(NIL as usize - 1);
        Self {
            slots: (0..=capacity).map(|_| Slot::empty()).collect(),
            registered: AtomicUsize::new(1),
            head: CachePadded::new(AtomicU32::new(SENTINEL)),
            tail: CachePadded::new(AtomicU32::new(SENTINEL)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Number of jobs registered so far.
    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Acquire).min(self.slots.len()) - 1
    }

    /// Give `job` a slot in the job table. A job must be registered before it
    /// can be queued.
    pub fn register(&self, job: Arc<dyn Job>) -> Result<JobId, FatalError> {
        if job.header().id().is_some() {
            return Err(FatalError::AlreadyRegistered {
                job: job.describe(),
            });
        }
        let index = self.registered.fetch_add(1, Ordering::AcqRel);
        if index >= self.slots.len() {
            return Err(FatalError::JobCapacity {
                capacity: self.capacity(),
            });
        }
        let id = JobId(index as u32);
        let _ = self.slots[index].job.set(Arc::clone(&job));
        if !job.header().assign_id(id) {
            return Err(FatalError::AlreadyRegistered {
                job: job.describe(),
            });
        }
        Ok(id)
    }

    /// The job registered under `id`.
    pub fn get(&self, id: JobId) -> Option<&Arc<dyn Job>> {
        if id.0 == SENTINEL {
            return None;
        }
        self.slots.get(id.index()).and_then(|slot| slot.job.get())
    }

    /// Link the job registered under `id` at the tail of the queue.
    ///
    /// Callers guarantee each id is pushed at most once.
    pub(crate) fn push(&self, id: JobId) -> bool {
        let index = id.0;
        let Some(slot) = self.slots.get(index as usize) else {
            return false;
        };
        if index == SENTINEL {
            return false;
        }
        slot.next.store(NIL, Ordering::Relaxed);

        let backoff = Backoff::new();
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let next = self.slots[tail as usize].next.load(Ordering::Acquire);
            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }
            if next == NIL {
                if self.slots[tail as usize]
                    .next
                    .compare_exchange(NIL, index, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let _ = self
                        .tail
                        .compare_exchange(tail, index, Ordering::AcqRel, Ordering::Acquire);
                    return true;
                }
            } else {
                // Tail is lagging behind; help it forward.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Acquire);
            }
            backoff.spin();
        }
    }

    /// Unlink the job at the front of the queue, if any.
    pub fn try_pop(&self) -> Option<Arc<dyn Job>> {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let next = self.slots[head as usize].next.load(Ordering::Acquire);
            if head != self.head.load(Ordering::Acquire) {
                continue;
            }
            if next == NIL {
                return None;
            }
            if head == tail {
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Acquire);
                backoff.spin();
                continue;
            }
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                match self.slots[next as usize].job.get() {
                    Some(job) => return Some(Arc::clone(job)),
                    None => continue,
                }
            }
            backoff.spin();
        }
    }

    /// Whether no job is linked behind the sentinel.
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        self.slots[head as usize].next.load(Ordering::Acquire) == NIL
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("capacity", &self.capacity())
            .field("registered", &self.registered())
            .field("empty", &self.is_empty())
            .finish()
    }
}
