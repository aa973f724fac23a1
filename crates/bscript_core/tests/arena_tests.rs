//! Multi-threaded allocation tests for the bscript arenas.

use std::alloc::Layout;
use std::sync::{Arc, Barrier};
use std::thread;

use bscript_core::arena::MIN_HEAP_SIZE;
use bscript_core::{BumpPool, ConcurrentBumpPool, Placed};

// ============================================================================
// ConcurrentBumpPool
// ============================================================================

#[test]
fn test_concurrent_allocations_never_overlap() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 500;
    const SIZE: usize = 24;

    let pool = Arc::new(ConcurrentBumpPool::with_heap_size(MIN_HEAP_SIZE * 4));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_index| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut ranges = Vec::with_capacity(ROUNDS);
                for _ in 0..ROUNDS {
                    let ptr = pool
                        .allocate(Layout::from_size_align(SIZE, 1).unwrap())
                        .unwrap();
                    // SAFETY: the range belongs to this thread alone.
                    unsafe { std::ptr::write_bytes(ptr.as_ptr(), thread_index as u8, SIZE) };
                    ranges.push((ptr.as_ptr() as usize, thread_index));
                }
                ranges
            })
        })
        .collect();

    let mut ranges: Vec<(usize, usize)> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(ranges.len(), THREADS * ROUNDS);
    assert_eq!(pool.allocated_bytes(), THREADS * ROUNDS * SIZE);

    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(pair[0].0 + SIZE <= pair[1].0, "ranges overlap");
    }
    for (start, owner) in &ranges {
        // SAFETY: all writers have joined.
        let bytes = unsafe { std::slice::from_raw_parts(*start as *const u8, SIZE) };
        assert!(bytes.iter().all(|b| *b as usize == *owner));
    }
}

#[test]
fn test_concurrent_handles_resolve_from_any_thread() {
    let pool = Arc::new(ConcurrentBumpPool::new());
    let handles: Vec<Placed<[u8]>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let pool = &pool;
                scope.spawn(move || pool.copy_bytes(format!("file-{i}").as_bytes()).unwrap())
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let mut contents: Vec<String> = handles
        .iter()
        .map(|h| String::from_utf8(pool.get(*h).unwrap().to_vec()).unwrap())
        .collect();
    contents.sort();
    assert_eq!(contents, vec!["file-0", "file-1", "file-2", "file-3"]);
}

// ============================================================================
// BumpPool
// ============================================================================

#[test]
fn test_pool_moves_between_threads() {
    let pool: BumpPool<'static> = BumpPool::new();
    let handle = pool.place(vec![String::from("a"), String::from("b")]).unwrap();
    let joined = thread::spawn(move || pool.get(handle).map(|v| v.join(",")))
        .join()
        .unwrap();
    assert_eq!(joined.as_deref(), Some("a,b"));
}
