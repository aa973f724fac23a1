//! Lock-free bump allocation shared by many threads.
//!
//! [`ConcurrentBumpPool`] uses the same heap-chain strategy as
//! [`BumpPool`](crate::arena::BumpPool), but each heap's free-byte counter is
//! claimed with a compare-and-swap loop and the chain is extended by racing
//! to publish the next heap slot. No lock is taken on any path.
//!
//! The pool only stores plain bytes (file contents and the like); nothing
//! placed here is ever dropped.

use std::alloc::Layout;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam::utils::{Backoff, CachePadded};

use crate::arena::{padded_size, ArenaError, HeapBlock, Placed, PoolId, DEFAULT_HEAP_SIZE, MIN_HEAP_SIZE};

/// Default length of the heap directory.
pub const DEFAULT_MAX_HEAPS: usize = 4096;

struct SharedHeap {
    block: HeapBlock,
    free: AtomicUsize,
}

impl SharedHeap {
    fn bump(&self, layout: Layout) -> Option<NonNull<u8>> {
        let mut free = self.free.load(Ordering::Acquire);
        loop {
            let (ptr, remaining) = self.block.carve(free, layout)?;
            match self
                .free
                .compare_exchange_weak(free, remaining, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(ptr),
                Err(actual) => free = actual,
            }
        }
    }
}

/// A thread-safe bump allocator over a chain of heaps.
pub struct ConcurrentBumpPool {
    id: PoolId,
    epoch: u32,
    heaps: Box<[AtomicPtr<SharedHeap>]>,
    current: CachePadded<AtomicUsize>,
    heap_size: usize,
}

impl ConcurrentBumpPool {
    pub fn new() -> Self {
        Self::with_heap_size(DEFAULT_HEAP_SIZE)
    }

    pub fn with_heap_size(heap_size: usize) -> Self {
        Self::with_capacity(heap_size, DEFAULT_MAX_HEAPS)
    }

    /// Create a pool with regular heaps of `heap_size` bytes and room for at
    /// most `max_heaps` heaps in the chain.
    pub fn with_capacity(heap_size: usize, max_heaps: usize) -> Self {
        let heaps = (0..max_heaps.max(1))
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            id: PoolId::fresh(),
            epoch: 0,
            heaps,
            current: CachePadded::new(AtomicUsize::new(0)),
            heap_size: heap_size.max(MIN_HEAP_SIZE),
        }
    }

    #[inline]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Allocate raw, uninitialized memory for `layout`.
    ///
    /// Requests larger than a regular heap get a heap sized to fit them and
    /// leave the current heap alone, as in [`BumpPool`](crate::arena::BumpPool).
    pub fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, ArenaError> {
        let needed = padded_size(layout)?;
        if needed > self.heap_size {
            return self.allocate_oversized(layout, needed);
        }
        let backoff = Backoff::new();
        loop {
            let index = self.current.load(Ordering::Acquire);
            match self.heap(index) {
                Some(heap) => {
                    if let Some(ptr) = heap.bump(layout) {
                        return Ok(ptr);
                    }
                }
                None => {
                    self.install(index, needed)?;
                    continue;
                }
            }

            let next = index + 1;
            if next >= self.heaps.len() {
                return Err(ArenaError::HeapChainFull {
                    heaps: self.heaps.len(),
                });
            }
            if self.heap(next).is_none() {
                self.install(next, needed)?;
            }
            // One thread advances `current`; everyone else retries against it.
            let _ = self
                .current
                .compare_exchange(index, next, Ordering::AcqRel, Ordering::Acquire);
            backoff.spin();
        }
    }

    /// Scan forward from the current heap, appending a heap sized for
    /// `needed` at the first empty slot. `current` does not move.
    fn allocate_oversized(&self, layout: Layout, needed: usize) -> Result<NonNull<u8>, ArenaError> {
        let mut index = self.current.load(Ordering::Acquire);
        while index < self.heaps.len() {
            if self.heap(index).is_none() {
                self.install(index, needed)?;
            }
            // Another thread may have won the slot with a regular heap.
            if let Some(ptr) = self.heap(index).and_then(|heap| heap.bump(layout)) {
                return Ok(ptr);
            }
            index += 1;
        }
        Err(ArenaError::HeapChainFull {
            heaps: self.heaps.len(),
        })
    }

    /// Copy `bytes` into the pool.
    pub fn copy_bytes(&self, bytes: &[u8]) -> Result<Placed<[u8]>, ArenaError> {
        let (placed, ()) = self.fill_bytes(bytes.len(), |buf| buf.copy_from_slice(bytes))?;
        Ok(placed)
    }

    /// Allocate `len` zeroed bytes and let `fill` write them before the
    /// handle is published. Returns the handle and whatever `fill` returned.
    pub fn fill_bytes<R>(
        &self,
        len: usize,
        fill: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<(Placed<[u8]>, R), ArenaError> {
        let layout = Layout::array::<u8>(len).map_err(|_| ArenaError::InvalidLayout {
            size: len,
            align: 1,
        })?;
        let raw = self.allocate(layout)?;
        // SAFETY: the range was carved exclusively for this call.
        let buf = unsafe {
            ptr::write_bytes(raw.as_ptr(), 0, len);
            std::slice::from_raw_parts_mut(raw.as_ptr(), len)
        };
        let result = fill(buf);
        let placed = Placed::new(NonNull::slice_from_raw_parts(raw, len), self.id, self.epoch);
        Ok((placed, result))
    }

    /// Resolve a handle placed in this pool during the current epoch.
    pub fn get<T: ?Sized>(&self, handle: Placed<T>) -> Option<&T> {
        if handle.pool() != self.id || handle.epoch() != self.epoch {
            return None;
        }
        // SAFETY: the bytes were fully written before the handle existed and
        // stay untouched until `reset`, which needs `&mut self`.
        Some(unsafe { handle.ptr().as_ref() })
    }

    /// Mark every heap free again. Outstanding handles stop resolving.
    pub fn reset(&mut self) {
        for slot in self.heaps.iter_mut() {
            // SAFETY: non-null slots point at heaps owned by this pool.
            if let Some(heap) = unsafe { slot.get_mut().as_ref() } {
                heap.free.store(heap.block.capacity(), Ordering::Relaxed);
            }
        }
        self.current.store(0, Ordering::Relaxed);
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn heap_count(&self) -> usize {
        self.heaps().count()
    }

    pub fn reserved_bytes(&self) -> usize {
        self.heaps().map(|heap| heap.block.capacity()).sum()
    }

    /// Bytes handed out (including alignment padding) since the last reset.
    pub fn allocated_bytes(&self) -> usize {
        self.heaps()
            .map(|heap| heap.block.capacity() - heap.free.load(Ordering::Acquire))
            .sum()
    }

    fn heaps(&self) -> impl Iterator<Item = &SharedHeap> {
        (0..self.heaps.len()).map_while(|index| self.heap(index))
    }

    fn heap(&self, index: usize) -> Option<&SharedHeap> {
        let raw = self.heaps[index].load(Ordering::Acquire);
        // SAFETY: published heaps stay alive until the pool is dropped.
        unsafe { raw.as_ref() }
    }

    fn install(&self, index: usize, needed: usize) -> Result<(), ArenaError> {
        let block = HeapBlock::allocate(needed.max(self.heap_size))?;
        let candidate = Box::into_raw(Box::new(SharedHeap {
            free: AtomicUsize::new(block.capacity()),
            block,
        }));
        if self.heaps[index]
            .compare_exchange(ptr::null_mut(), candidate, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: the candidate lost the race and was never published.
            drop(unsafe { Box::from_raw(candidate) });
        }
        Ok(())
    }
}

impl Default for ConcurrentBumpPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConcurrentBumpPool {
    fn drop(&mut self) {
        for slot in self.heaps.iter_mut() {
            let raw = *slot.get_mut();
            if !raw.is_null() {
                // SAFETY: each published heap came from `Box::into_raw`.
                drop(unsafe { Box::from_raw(raw) });
            }
        }
    }
}

impl std::fmt::Debug for ConcurrentBumpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentBumpPool")
            .field("id", &self.id)
            .field("heaps", &self.heap_count())
            .field("allocated", &self.allocated_bytes())
            .finish()
    }
}
