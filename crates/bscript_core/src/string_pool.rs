//! Fixed-capacity string interning for a single compilation unit.
//!
//! [`StringPool`] maps byte strings to small sequential [`StringId`]s using an
//! open-addressing table with linear probing. Every slot carries the
//! generation it was written in; a slot from an older generation reads as
//! empty, so [`StringPool::reset`] invalidates the whole table by bumping one
//! counter. The bytes themselves live in a private [`BumpPool`] behind a
//! two-byte length prefix.

use std::alloc::Layout;
use std::hash::Hasher;
use std::ptr::{self, NonNull};

use rustc_hash::FxHasher;

use crate::arena::{ArenaError, BumpPool};

/// Longest string the pool can store (limited by the two-byte length prefix).
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Default number of distinct strings a pool accepts.
pub const DEFAULT_STRING_CAPACITY: usize = 1 << 14;

/// An index into a [`StringPool`], valid until the pool is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Errors raised when interning a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StringPoolError {
    #[error("string pool is full ({capacity} strings)")]
    Full { capacity: usize },
    #[error("string of {len} bytes exceeds the 65535-byte limit")]
    TooLong { len: usize },
    #[error(transparent)]
    Arena(#[from] ArenaError),
}

#[derive(Clone, Copy, Default)]
struct Slot {
    generation: u32,
    index: u32,
    upper_hash: u32,
}

pub struct StringPool {
    slots: Box<[Slot]>,
    mask: usize,
    generation: u32,
    capacity: usize,
    entries: Vec<NonNull<u8>>,
    storage: BumpPool<'static>,
}

// SAFETY: entry pointers only point into `storage`, which the pool owns.
unsafe impl Send for StringPool {}

impl StringPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STRING_CAPACITY)
    }

    /// Create a pool accepting at most `capacity` distinct strings per
    /// generation. The probe table is sized to keep the load factor at or
    /// below one half.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, u32::MAX as usize / 2);
        let table_size = (capacity * 2).next_power_of_two().max(16);
        Self {
            slots: vec![Slot::default(); table_size].into_boxed_slice(),
            mask: table_size - 1,
            generation: 1,
            capacity,
            entries: Vec::new(),
            storage: BumpPool::new(),
        }
    }

    /// Return the id of `bytes`, inserting it if it is not yet present.
    pub fn lookup(&mut self, bytes: &[u8]) -> Result<StringId, StringPoolError> {
        let hash = hash_bytes(bytes);
        let upper_hash = (hash >> 32) as u32;
        let mut position = hash as usize & self.mask;
        loop {
            let slot = self.slots[position];
            if slot.generation != self.generation {
                return self.insert_at(position, bytes, upper_hash);
            }
            if slot.upper_hash == upper_hash && self.entry(slot.index) == bytes {
                return Ok(StringId(slot.index));
            }
            position = (position + 1) & self.mask;
        }
    }

    /// Convenience wrapper around [`lookup`](Self::lookup) for `str`.
    pub fn intern(&mut self, text: &str) -> Result<StringId, StringPoolError> {
        self.lookup(text.as_bytes())
    }

    /// Find `bytes` without inserting it.
    pub fn find(&self, bytes: &[u8]) -> Option<StringId> {
        let hash = hash_bytes(bytes);
        let upper_hash = (hash >> 32) as u32;
        let mut position = hash as usize & self.mask;
        loop {
            let slot = self.slots[position];
            if slot.generation != self.generation {
                return None;
            }
            if slot.upper_hash == upper_hash && self.entry(slot.index) == bytes {
                return Some(StringId(slot.index));
            }
            position = (position + 1) & self.mask;
        }
    }

    /// The bytes interned under `id` in the current generation.
    pub fn get(&self, id: StringId) -> Option<&[u8]> {
        (id.index() < self.entries.len()).then(|| self.entry(id.0))
    }

    /// The string interned under `id`, if it is valid UTF-8.
    pub fn get_str(&self, id: StringId) -> Option<&str> {
        self.get(id).and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Invalidate every entry. Ids handed out before the reset must not be
    /// resolved afterwards; they may name different strings.
    pub fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            // Slots stamped with the reused generation would come back to life.
            self.slots.fill(Slot::default());
            self.generation = 1;
        }
        self.entries.clear();
        self.storage.reset();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn insert_at(
        &mut self,
        position: usize,
        bytes: &[u8],
        upper_hash: u32,
    ) -> Result<StringId, StringPoolError> {
        if self.entries.len() >= self.capacity {
            return Err(StringPoolError::Full {
                capacity: self.capacity,
            });
        }
        let len = u16::try_from(bytes.len()).map_err(|_| StringPoolError::TooLong { len: bytes.len() })?;

        let layout = Layout::from_size_align(bytes.len() + 2, 1).map_err(|_| ArenaError::InvalidLayout {
            size: bytes.len() + 2,
            align: 1,
        })?;
        let record = self.storage.allocate(layout)?;
        // SAFETY: `record` is a fresh allocation of exactly `len + 2` bytes.
        unsafe {
            ptr::copy_nonoverlapping(len.to_le_bytes().as_ptr(), record.as_ptr(), 2);
            ptr::copy_nonoverlapping(bytes.as_ptr(), record.as_ptr().add(2), bytes.len());
        }

        let index = self.entries.len() as u32;
        self.entries.push(record);
        self.slots[position] = Slot {
            generation: self.generation,
            index,
            upper_hash,
        };
        Ok(StringId(index))
    }

    fn entry(&self, index: u32) -> &[u8] {
        let record = self.entries[index as usize];
        // SAFETY: the record was written by `insert_at` in the current
        // generation and the storage pool has not been reset since.
        unsafe {
            let header = std::slice::from_raw_parts(record.as_ptr(), 2);
            let len = u16::from_le_bytes([header[0], header[1]]) as usize;
            std::slice::from_raw_parts(record.as_ptr().add(2), len)
        }
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StringPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringPool")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("generation", &self.generation)
            .finish()
    }
}

#[inline]
fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}
