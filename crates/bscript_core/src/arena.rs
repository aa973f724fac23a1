//! Single-threaded bump allocation for per-file compiler state.
//!
//! A [`BumpPool`] hands out memory from a chain of fixed-size heaps. Values
//! that need dropping are threaded onto an intrusive destructor chain stored
//! in the pool's own memory, so [`BumpPool::reset`] tears every value down in
//! one pass and keeps the heaps for the next unit of work.
//!
//! Values that must outlive a borrow of the pool are addressed through
//! [`Placed`] handles, which are checked against the pool identity and reset
//! epoch before being dereferenced.

use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default capacity of a single heap in the chain (64 KiB).
pub const DEFAULT_HEAP_SIZE: usize = 64 * 1024;

/// Smallest heap the pools will create.
pub const MIN_HEAP_SIZE: usize = 256;

/// Alignment of every heap base address.
const HEAP_ALIGN: usize = 16;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a pool, used to validate [`Placed`] handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl PoolId {
    pub(crate) fn fresh() -> Self {
        PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Errors raised by the arena allocators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("arena budget of {limit} bytes exhausted while allocating {requested} bytes")]
    Exhausted { requested: usize, limit: usize },
    #[error("arena heap chain is full ({heaps} heaps)")]
    HeapChainFull { heaps: usize },
    #[error("invalid allocation request of {size} bytes aligned to {align}")]
    InvalidLayout { size: usize, align: usize },
    #[error("system allocator refused a {size}-byte heap")]
    OutOfMemory { size: usize },
}

// ============================================================================
// Heap blocks
// ============================================================================

/// One contiguous heap. The free-byte counter lives with the owning pool so
/// that the single-threaded and concurrent pools can share the block type.
pub(crate) struct HeapBlock {
    base: NonNull<u8>,
    capacity: usize,
}

// SAFETY: a block exclusively owns its allocation; access to the bytes is
// coordinated by the pool that owns the block.
unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}

impl HeapBlock {
    pub(crate) fn allocate(capacity: usize) -> Result<Self, ArenaError> {
        let capacity = capacity.max(MIN_HEAP_SIZE);
        let layout = Layout::from_size_align(capacity, HEAP_ALIGN).map_err(|_| {
            ArenaError::InvalidLayout {
                size: capacity,
                align: HEAP_ALIGN,
            }
        })?;
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        NonNull::new(raw)
            .map(|base| HeapBlock { base, capacity })
            .ok_or(ArenaError::OutOfMemory { size: capacity })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Carves `layout` out of the tail of the block given the number of free
    /// bytes. Returns the aligned pointer and the free count after the carve.
    #[inline]
    pub(crate) fn carve(&self, free: usize, layout: Layout) -> Option<(NonNull<u8>, usize)> {
        let used = self.capacity - free;
        let start = self.base.as_ptr() as usize + used;
        let aligned = start.checked_add(layout.align() - 1)? & !(layout.align() - 1);
        let offset = aligned - self.base.as_ptr() as usize;
        let end = offset.checked_add(layout.size())?;
        if end > self.capacity {
            return None;
        }
        // SAFETY: offset <= capacity, so the pointer stays inside (or one past)
        // the block and keeps the block's provenance.
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        Some((ptr, self.capacity - end))
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        // SAFETY: allocated in `HeapBlock::allocate` with this exact layout.
        unsafe {
            alloc::dealloc(
                self.base.as_ptr(),
                Layout::from_size_align_unchecked(self.capacity, HEAP_ALIGN),
            );
        }
    }
}

/// Worst-case number of bytes a request needs in a fresh heap.
#[inline]
pub(crate) fn padded_size(layout: Layout) -> Result<usize, ArenaError> {
    layout
        .size()
        .checked_add(layout.align().saturating_sub(1))
        .ok_or(ArenaError::InvalidLayout {
            size: layout.size(),
            align: layout.align(),
        })
}

struct Heap {
    block: HeapBlock,
    free: Cell<usize>,
}

impl Heap {
    fn bump(&self, layout: Layout) -> Option<NonNull<u8>> {
        let (ptr, free) = self.block.carve(self.free.get(), layout)?;
        self.free.set(free);
        Some(ptr)
    }
}

// ============================================================================
// Destructor chain
// ============================================================================

#[repr(C)]
struct DropLink {
    next: Cell<Option<NonNull<DropLink>>>,
    drop_value: unsafe fn(NonNull<DropLink>),
}

#[repr(C)]
struct Tracked<T> {
    link: DropLink,
    value: T,
}

unsafe fn drop_tracked<T>(link: NonNull<DropLink>) {
    let tracked = link.cast::<Tracked<T>>();
    ptr::drop_in_place(ptr::addr_of_mut!((*tracked.as_ptr()).value));
}

// ============================================================================
// BumpPool
// ============================================================================

/// A single-threaded bump allocator over a growable chain of heaps.
///
/// The `'p` lifetime bounds every value placed in the pool, which keeps the
/// destructor chain sound: nothing placed here can borrow data that dies
/// before the pool does.
pub struct BumpPool<'p> {
    id: PoolId,
    epoch: u32,
    heaps: RefCell<Vec<Heap>>,
    current: Cell<usize>,
    heap_size: usize,
    limit: Option<usize>,
    drop_head: Cell<Option<NonNull<DropLink>>>,
    drop_tail: Cell<Option<NonNull<DropLink>>>,
    drop_count: Cell<usize>,
    _values: PhantomData<Cell<&'p ()>>,
}

// SAFETY: `make` only accepts `Send` values and the pool owns its heaps, so
// moving the whole pool to another thread moves everything placed in it.
unsafe impl Send for BumpPool<'_> {}

impl<'p> BumpPool<'p> {
    /// Create a pool with the default heap size and no byte budget.
    pub fn new() -> Self {
        Self::with_heap_size(DEFAULT_HEAP_SIZE)
    }

    /// Create a pool whose regular heaps hold `heap_size` bytes.
    pub fn with_heap_size(heap_size: usize) -> Self {
        Self {
            id: PoolId::fresh(),
            epoch: 0,
            heaps: RefCell::new(Vec::new()),
            current: Cell::new(0),
            heap_size: heap_size.max(MIN_HEAP_SIZE),
            limit: None,
            drop_head: Cell::new(None),
            drop_tail: Cell::new(None),
            drop_count: Cell::new(0),
            _values: PhantomData,
        }
    }

    /// Cap the total bytes of heap memory the pool may reserve.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[inline]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Allocate raw, uninitialized memory for `layout`.
    ///
    /// Requests that fit a regular heap bump the current heap, moving forward
    /// through the chain (or appending a heap) when it is full. Larger
    /// requests get a heap sized to fit them and leave the current heap alone.
    pub fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, ArenaError> {
        let needed = padded_size(layout)?;
        let oversized = needed > self.heap_size;
        let mut heaps = self.heaps.borrow_mut();

        let mut index = self.current.get();
        while let Some(heap) = heaps.get(index) {
            if let Some(ptr) = heap.bump(layout) {
                if !oversized {
                    self.current.set(index);
                }
                return Ok(ptr);
            }
            index += 1;
        }

        let capacity = needed.max(self.heap_size);
        if let Some(limit) = self.limit {
            let reserved: usize = heaps.iter().map(|heap| heap.block.capacity()).sum();
            if reserved.saturating_add(capacity) > limit {
                return Err(ArenaError::Exhausted {
                    requested: layout.size(),
                    limit,
                });
            }
        }
        let block = HeapBlock::allocate(capacity)?;
        let heap = Heap {
            free: Cell::new(block.capacity()),
            block,
        };
        let ptr = heap.bump(layout).ok_or(ArenaError::InvalidLayout {
            size: layout.size(),
            align: layout.align(),
        })?;
        heaps.push(heap);
        if !oversized {
            self.current.set(heaps.len() - 1);
        }
        Ok(ptr)
    }

    /// Move `value` into the pool and return a reference to it.
    ///
    /// If `T` needs dropping, its destructor is appended to the chain and
    /// runs on [`reset`](Self::reset) or when the pool is dropped.
    #[allow(clippy::mut_from_ref)]
    pub fn make<T: Send + 'p>(&self, value: T) -> Result<&mut T, ArenaError> {
        if !mem::needs_drop::<T>() {
            let raw = self.allocate(Layout::new::<T>())?.cast::<T>();
            // SAFETY: fresh, aligned, correctly sized and never handed out before.
            unsafe {
                raw.as_ptr().write(value);
                return Ok(&mut *raw.as_ptr());
            }
        }

        let raw = self.allocate(Layout::new::<Tracked<T>>())?.cast::<Tracked<T>>();
        // SAFETY: as above; the returned borrow covers only the `value` field,
        // the link is touched only by the pool itself.
        unsafe {
            raw.as_ptr().write(Tracked {
                link: DropLink {
                    next: Cell::new(None),
                    drop_value: drop_tracked::<T>,
                },
                value,
            });
            self.push_drop(raw.cast::<DropLink>());
            Ok(&mut *ptr::addr_of_mut!((*raw.as_ptr()).value))
        }
    }

    /// Move `value` into the pool and return a checked handle to it.
    pub fn place<T: Send + 'p>(&self, value: T) -> Result<Placed<T>, ArenaError> {
        let value = self.make(value)?;
        Ok(Placed::new(NonNull::from(value), self.id, self.epoch))
    }

    /// Copy `bytes` into the pool.
    pub fn copy_bytes(&self, bytes: &[u8]) -> Result<&[u8], ArenaError> {
        let layout = Layout::array::<u8>(bytes.len()).map_err(|_| ArenaError::InvalidLayout {
            size: bytes.len(),
            align: 1,
        })?;
        let raw = self.allocate(layout)?;
        // SAFETY: the destination is fresh and `bytes.len()` long.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), raw.as_ptr(), bytes.len());
            Ok(std::slice::from_raw_parts(raw.as_ptr(), bytes.len()))
        }
    }

    /// Resolve a handle placed in this pool during the current epoch.
    pub fn get<T: ?Sized>(&self, handle: Placed<T>) -> Option<&T> {
        // SAFETY: the handle was created by this pool in this epoch, so the
        // value is still alive and no `&mut` to it can coexist with `&self`
        // except the one returned by `make`, which borrows the pool as well.
        self.owns(handle).then(|| unsafe { handle.ptr.as_ref() })
    }

    /// Mutable counterpart of [`get`](Self::get).
    pub fn get_mut<T: ?Sized>(&mut self, handle: Placed<T>) -> Option<&mut T> {
        let mut ptr = handle.ptr;
        // SAFETY: `&mut self` rules out any other live borrow into the pool.
        self.owns(handle).then(|| unsafe { ptr.as_mut() })
    }

    #[inline]
    fn owns<T: ?Sized>(&self, handle: Placed<T>) -> bool {
        handle.pool == self.id && handle.epoch == self.epoch
    }

    /// Run every registered destructor in registration order, then mark all
    /// heaps free again. Heap memory is kept for reuse.
    pub fn reset(&mut self) {
        self.run_destructors();
        for heap in self.heaps.get_mut().iter() {
            heap.free.set(heap.block.capacity());
        }
        self.current.set(0);
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn push_drop(&self, link: NonNull<DropLink>) {
        match self.drop_tail.get() {
            // SAFETY: the tail link lives in this pool and has not been dropped.
            Some(tail) => unsafe { tail.as_ref().next.set(Some(link)) },
            None => self.drop_head.set(Some(link)),
        }
        self.drop_tail.set(Some(link));
        self.drop_count.set(self.drop_count.get() + 1);
    }

    fn run_destructors(&mut self) {
        let mut cursor = self.drop_head.take();
        self.drop_tail.set(None);
        self.drop_count.set(0);
        while let Some(link) = cursor {
            // SAFETY: every link was written by `make` and each runs once;
            // `next` is read before the value is dropped.
            unsafe {
                cursor = link.as_ref().next.get();
                (link.as_ref().drop_value)(link);
            }
        }
    }

    /// Number of values waiting on the destructor chain.
    pub fn pending_drops(&self) -> usize {
        self.drop_count.get()
    }

    /// Number of heaps in the chain.
    pub fn heap_count(&self) -> usize {
        self.heaps.borrow().len()
    }

    /// Total heap capacity reserved from the system allocator.
    pub fn reserved_bytes(&self) -> usize {
        self.heaps.borrow().iter().map(|heap| heap.block.capacity()).sum()
    }

    /// Bytes handed out (including alignment padding) since the last reset.
    pub fn allocated_bytes(&self) -> usize {
        self.heaps
            .borrow()
            .iter()
            .map(|heap| heap.block.capacity() - heap.free.get())
            .sum()
    }
}

impl Default for BumpPool<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BumpPool<'_> {
    fn drop(&mut self) {
        self.run_destructors();
    }
}

impl fmt::Debug for BumpPool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BumpPool")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("heaps", &self.heap_count())
            .field("allocated", &self.allocated_bytes())
            .field("pending_drops", &self.pending_drops())
            .finish()
    }
}

// ============================================================================
// Placed handles
// ============================================================================

/// A copyable handle to a value living in a pool.
///
/// Handles carry the identity and reset epoch of the pool that produced them;
/// resolving a handle against another pool, or after a reset, yields `None`.
pub struct Placed<T: ?Sized> {
    ptr: NonNull<T>,
    pool: PoolId,
    epoch: u32,
}

impl<T: ?Sized> Placed<T> {
    pub(crate) fn new(ptr: NonNull<T>, pool: PoolId, epoch: u32) -> Self {
        Self { ptr, pool, epoch }
    }

    /// The pool this handle belongs to.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    #[inline]
    pub(crate) fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u32 {
        self.epoch
    }
}

impl<T: ?Sized> Clone for Placed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Placed<T> {}

impl<T: ?Sized> PartialEq for Placed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr.cast::<u8>() == other.ptr.cast::<u8>()
            && self.pool == other.pool
            && self.epoch == other.epoch
    }
}

impl<T: ?Sized> fmt::Debug for Placed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Placed")
            .field("pool", &self.pool)
            .field("epoch", &self.epoch)
            .finish()
    }
}

// SAFETY: a handle is only dereferenced through the owning pool, which hands
// out shared references; that is sound across threads when `T: Sync`.
unsafe impl<T: ?Sized + Sync> Send for Placed<T> {}
unsafe impl<T: ?Sized + Sync> Sync for Placed<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        label: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            // The value must still be intact when its destructor runs.
            self.log.lock().unwrap().push(self.label.clone());
        }
    }

    #[test]
    fn test_allocate_respects_alignment() {
        let pool = BumpPool::new();
        pool.make(1u8).unwrap();
        let ptr = pool.allocate(Layout::from_size_align(24, 8).unwrap()).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 8, 0);
        let wide = pool.make(7u64).unwrap();
        assert_eq!(wide as *const u64 as usize % mem::align_of::<u64>(), 0);
    }

    #[test]
    fn test_chain_grows_when_heap_is_full() {
        let pool = BumpPool::with_heap_size(MIN_HEAP_SIZE);
        for i in 0..200u64 {
            assert_eq!(*pool.make(i).unwrap(), i);
        }
        assert!(pool.heap_count() > 1);
        assert!(pool.allocated_bytes() >= 200 * 8);
    }

    #[test]
    fn test_oversized_request_gets_dedicated_heap() {
        let pool = BumpPool::with_heap_size(MIN_HEAP_SIZE);
        let small = pool.make(1u32).unwrap() as *const u32 as usize;
        let big = pool.copy_bytes(&[9u8; 4096]).unwrap();
        assert_eq!(big.len(), 4096);
        assert!(big.iter().all(|b| *b == 9));
        // The next small value still lands in the first heap.
        let next = pool.make(2u32).unwrap() as *const u32 as usize;
        assert_eq!(pool.heap_count(), 2);
        assert!(next > small && next - small < MIN_HEAP_SIZE);
    }

    #[test]
    fn test_reset_runs_destructors_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pool = BumpPool::with_heap_size(MIN_HEAP_SIZE);
        for i in 0..50 {
            pool.make(Recorder {
                label: format!("value-{i}"),
                log: Arc::clone(&log),
            })
            .unwrap();
        }
        assert_eq!(pool.pending_drops(), 50);
        let heaps = pool.heap_count();

        pool.reset();

        let log = log.lock().unwrap();
        let expected: Vec<String> = (0..50).map(|i| format!("value-{i}")).collect();
        assert_eq!(*log, expected);
        assert_eq!(pool.pending_drops(), 0);
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.heap_count(), heaps);
    }

    #[test]
    fn test_reset_does_not_rerun_destructors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pool = BumpPool::new();
        pool.make(Recorder {
            label: "once".into(),
            log: Arc::clone(&log),
        })
        .unwrap();
        pool.reset();
        pool.reset();
        drop(pool);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_runs_pending_destructors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let pool = BumpPool::new();
            pool.make(Recorder {
                label: "a".into(),
                log: Arc::clone(&log),
            })
            .unwrap();
            pool.make(vec![1, 2, 3]).unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_limit_reports_exhaustion() {
        let pool = BumpPool::with_heap_size(MIN_HEAP_SIZE).with_limit(MIN_HEAP_SIZE);
        pool.copy_bytes(&[0u8; 128]).unwrap();
        let err = pool.copy_bytes(&[0u8; 200]).unwrap_err();
        assert!(matches!(err, ArenaError::Exhausted { requested: 200, .. }));
    }

    #[test]
    fn test_placed_handles_are_checked() {
        let mut pool = BumpPool::new();
        let other = BumpPool::new();
        let handle = pool.place(String::from("kept")).unwrap();
        assert_eq!(pool.get(handle).map(String::as_str), Some("kept"));
        assert!(other.get(handle).is_none());

        pool.get_mut(handle).unwrap().push('!');
        assert_eq!(pool.get(handle).unwrap(), "kept!");

        pool.reset();
        assert!(pool.get(handle).is_none());
    }
}
