//! Scheduling tests for the bscript job manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use bscript_diagnostics::FatalError;
use bscript_jobs::{FnJob, Job, JobManager, JobManagerConfig, JobState};

fn manager(workers: usize) -> Arc<JobManager> {
    Arc::new(JobManager::new(JobManagerConfig {
        workers,
        capacity: 4096,
    }))
}

fn register(manager: &JobManager, job: Arc<dyn Job>) -> Arc<dyn Job> {
    manager.register(Arc::clone(&job)).unwrap();
    job
}

/// A job whose body awaits whatever job ends up in `target`.
fn awaiting_job(
    label: &str,
    manager: &Arc<JobManager>,
    target: Arc<OnceLock<Arc<dyn Job>>>,
    before: Option<Arc<Barrier>>,
) -> Arc<dyn Job> {
    let weak: Weak<JobManager> = Arc::downgrade(manager);
    Arc::new(FnJob::new(label, move || {
        if let Some(barrier) = &before {
            barrier.wait();
        }
        let manager = weak
            .upgrade()
            .ok_or_else(|| FatalError::Internal("manager dropped".into()))?;
        let job = target
            .get()
            .ok_or_else(|| FatalError::Internal("target missing".into()))?;
        manager.await_job(job.as_ref())
    }))
}

// ============================================================================
// Exactly-once execution
// ============================================================================

#[test]
fn test_concurrent_awaits_run_body_once() {
    const WAITERS: usize = 16;
    let manager = manager(2);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let job = register(
        &manager,
        Arc::new(FnJob::new("slow", move || {
            thread::sleep(Duration::from_millis(20));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })),
    );
    manager.queue(job.as_ref()).unwrap();

    let barrier = Arc::new(Barrier::new(WAITERS));
    let waiters: Vec<_> = (0..WAITERS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let job = Arc::clone(&job);
            let barrier = Arc::clone(&barrier);
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                barrier.wait();
                let outcome = manager.await_job(job.as_ref());
                // Nobody returns before the single run has finished.
                assert_eq!(runs.load(Ordering::SeqCst), 1);
                assert_eq!(job.header().state(), JobState::Done);
                outcome
            })
        })
        .collect();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }
    manager.wait_until_idle().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_await_runs_unclaimed_job_inline() {
    let manager = manager(0);
    let ran_on = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&ran_on);
    let job = register(
        &manager,
        Arc::new(FnJob::new("inline", move || {
            *slot.lock().unwrap() = Some(thread::current().id());
            Ok(())
        })),
    );
    manager.queue(job.as_ref()).unwrap();
    assert_eq!(job.header().state(), JobState::NotStarted);

    manager.await_job(job.as_ref()).unwrap();
    assert_eq!(*ran_on.lock().unwrap(), Some(thread::current().id()));

    // The queued copy is skipped when the queue is drained.
    manager.wait_until_idle().unwrap();
    assert!(manager.job_queue().is_empty());
}

#[test]
fn test_await_unregistered_job() {
    let manager = manager(1);
    let job = FnJob::new("loose", || Ok(()));
    assert_eq!(manager.await_job(&job), Ok(()));
    assert!(job.header().is_done());
}

// ============================================================================
// Queueing
// ============================================================================

#[test]
fn test_single_producer_order_is_preserved() {
    let manager = manager(0);
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..20 {
        let order = Arc::clone(&order);
        let job = register(
            &manager,
            Arc::new(FnJob::new(format!("job-{i}"), move || {
                order.lock().unwrap().push(i);
                Ok(())
            })),
        );
        manager.queue(job.as_ref()).unwrap();
    }
    manager.wait_until_idle().unwrap();
    assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_queue_is_idempotent_and_requires_registration() {
    let manager = manager(0);
    let loose = FnJob::new("loose", || Ok(()));
    assert!(matches!(
        manager.queue(&loose),
        Err(FatalError::UnregisteredJob { .. })
    ));

    let job = register(&manager, Arc::new(FnJob::new("once", || Ok(()))));
    assert_eq!(manager.queue(job.as_ref()), Ok(true));
    assert_eq!(manager.queue(job.as_ref()), Ok(false));
    manager.wait_until_idle().unwrap();
}

#[test]
fn test_workers_drain_many_jobs() {
    let manager = manager(4);
    let total = Arc::new(AtomicUsize::new(0));
    for i in 0..1000 {
        let total = Arc::clone(&total);
        let job = register(
            &manager,
            Arc::new(FnJob::new(format!("job-{i}"), move || {
                total.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })),
        );
        manager.queue(job.as_ref()).unwrap();
    }
    manager.wait_until_idle().unwrap();
    assert_eq!(total.load(Ordering::Relaxed), 1000);
}

// ============================================================================
// Dependencies between jobs
// ============================================================================

#[test]
fn test_dependency_chain_queued_backwards_completes() {
    const LENGTH: usize = 64;
    let manager = manager(3);
    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..LENGTH).map(|_| AtomicUsize::new(0)).collect());
    let slots: Vec<Arc<OnceLock<Arc<dyn Job>>>> = (0..LENGTH).map(|_| Arc::new(OnceLock::new())).collect();

    let mut jobs = Vec::new();
    for i in 0..LENGTH {
        let weak = Arc::downgrade(&manager);
        let previous = (i > 0).then(|| Arc::clone(&slots[i - 1]));
        let runs = Arc::clone(&runs);
        let job = register(
            &manager,
            Arc::new(FnJob::new(format!("link-{i}"), move || {
                if let Some(previous) = &previous {
                    let manager = weak.upgrade().ok_or_else(|| FatalError::Internal("gone".into()))?;
                    let job = previous.get().ok_or_else(|| FatalError::Internal("missing".into()))?;
                    manager.await_job(job.as_ref())?;
                    assert!(job.header().is_done());
                }
                runs[i].fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );
        let _ = slots[i].set(Arc::clone(&job));
        jobs.push(job);
    }
    for job in jobs.iter().rev() {
        manager.queue(job.as_ref()).unwrap();
    }
    manager.wait_until_idle().unwrap();
    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_self_cycle_on_one_thread_is_fatal() {
    let manager = manager(0);
    let a_slot = Arc::new(OnceLock::new());
    let b_slot = Arc::new(OnceLock::new());
    let a = register(&manager, awaiting_job("A", &manager, Arc::clone(&b_slot), None));
    let b = register(&manager, awaiting_job("B", &manager, Arc::clone(&a_slot), None));
    let _ = a_slot.set(Arc::clone(&a));
    let _ = b_slot.set(Arc::clone(&b));

    let outcome = manager.await_job(a.as_ref());
    assert!(matches!(outcome, Err(FatalError::DependencyCycle { .. })));
    assert!(matches!(
        manager.fatal_error(),
        Some(FatalError::DependencyCycle { .. })
    ));
    assert!(a.header().is_done() && b.header().is_done());
}

#[test]
fn test_cycle_across_threads_is_fatal_for_both() {
    let manager = manager(0);
    let barrier = Arc::new(Barrier::new(2));
    let a_slot = Arc::new(OnceLock::new());
    let b_slot = Arc::new(OnceLock::new());
    let a = register(&manager, awaiting_job("A", &manager, Arc::clone(&b_slot), Some(Arc::clone(&barrier))));
    let b = register(&manager, awaiting_job("B", &manager, Arc::clone(&a_slot), Some(barrier)));
    let _ = a_slot.set(Arc::clone(&a));
    let _ = b_slot.set(Arc::clone(&b));

    let outcomes: Vec<_> = [a, b]
        .into_iter()
        .map(|job| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.await_job(job.as_ref()))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert!(outcomes.iter().all(|outcome| outcome.is_err()));
    assert!(matches!(
        manager.fatal_error(),
        Some(FatalError::DependencyCycle { .. })
    ));
}

#[test]
fn test_shutdown_leaves_queued_jobs_unrun() {
    let manager = manager(1);
    let started = Arc::new(Barrier::new(2));
    let weak = Arc::downgrade(&manager);
    let gate = Arc::clone(&started);
    let blocker = register(
        &manager,
        Arc::new(FnJob::new("blocker", move || {
            gate.wait();
            // Hold the only worker until shutdown has begun.
            while weak.upgrade().is_some_and(|manager| !manager.is_stopping()) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })),
    );
    manager.queue(blocker.as_ref()).unwrap();
    started.wait();

    let runs = Arc::new(AtomicUsize::new(0));
    let backlog: Vec<Arc<dyn Job>> = (0..5)
        .map(|i| {
            let counter = Arc::clone(&runs);
            let job = register(
                &manager,
                Arc::new(FnJob::new(format!("queued {i}"), move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            );
            manager.queue(job.as_ref()).unwrap();
            job
        })
        .collect();

    manager.shutdown();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(blocker.header().is_done());
    assert!(backlog.iter().all(|job| job.header().state() == JobState::NotStarted));
}

// ============================================================================
// Fatal errors
// ============================================================================

#[test]
fn test_panicking_job_releases_waiters() {
    let manager = manager(1);
    let job = register(
        &manager,
        Arc::new(FnJob::new("explodes", || {
            thread::sleep(Duration::from_millis(10));
            panic!("boom")
        })),
    );
    manager.queue(job.as_ref()).unwrap();
    let outcome = manager.await_job(job.as_ref());
    match outcome {
        Err(FatalError::JobPanicked { job, message }) => {
            assert_eq!(job, "explodes");
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(manager.wait_until_idle().is_err());
}

#[test]
fn test_fatal_error_skips_later_jobs() {
    let manager = manager(0);
    let later_runs = Arc::new(AtomicUsize::new(0));
    let failing = register(
        &manager,
        Arc::new(FnJob::new("fails", || Err(FatalError::Internal("broken invariant".into())))),
    );
    let counter = Arc::clone(&later_runs);
    let later = register(
        &manager,
        Arc::new(FnJob::new("later", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })),
    );
    manager.queue(failing.as_ref()).unwrap();
    manager.queue(later.as_ref()).unwrap();

    let expected = FatalError::Internal("broken invariant".into());
    assert_eq!(manager.wait_until_idle(), Err(expected.clone()));
    assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    assert_eq!(later.header().outcome(), Some(Err(expected)));
}
