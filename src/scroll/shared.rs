//! Parallel scroll: independently cursored handles over one shared buffer.
//!
//! Each [`SharedScroll`] owns its cursor; the bytes live behind an
//! `Arc<RwLock<..>>` so handles on different threads serialise access to the
//! storage.  Removals take the read lock, insertions the write lock.

use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use super::{Duplicate, Scroll};
use crate::error::{Result, ScrollError};
use crate::pointer::{Pointer, ScrollTag};

#[derive(Debug, Default)]
struct Storage {
    bytes:      Vec<u8>,
    generation: u64,
}

#[derive(Debug)]
pub struct SharedScroll {
    storage: Arc<RwLock<Storage>>,
    family:  Uuid,
    cursor:  usize,
    /// Storage generation this handle's cursor refers to.
    seen:    u64,
}

impl Default for SharedScroll {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedScroll {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(Storage { bytes, generation: 0 })),
            family:  ScrollTag::new_family(),
            cursor:  0,
            seen:    0,
        }
    }

    pub fn len(&self) -> usize {
        self.storage.read().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the shared bytes.
    pub fn snapshot(&self) -> Vec<u8> {
        self.storage.read().bytes.clone()
    }

    /// Number of live handles over this storage.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Drop all stored bytes for every handle.  Every handle's cursor returns to
    /// the start and all outstanding pointers of the family become invalid.
    pub fn clear(&mut self) {
        let mut storage = self.storage.write();
        storage.bytes.clear();
        storage.generation += 1;
        self.seen = storage.generation;
        self.cursor = 0;
    }

    /// Cursor adjusted for a `clear` performed through another handle.
    fn cursor_in(&self, storage: &Storage) -> usize {
        if storage.generation == self.seen { self.cursor } else { 0 }
    }

    fn target(&self, storage: &Storage, ptr: &Pointer) -> Result<usize> {
        ScrollTag::current(ptr, self.family, storage.generation)?;
        if ptr.value() > storage.bytes.len() {
            return Err(ScrollError::InvalidPointer("pointer lies past the stored data"));
        }
        Ok(ptr.value())
    }
}

impl Scroll for SharedScroll {
    fn position(&self) -> Pointer {
        let storage = self.storage.read();
        let tag = ScrollTag { family: self.family, generation: storage.generation, sector: 0 };
        Pointer::with_tag(self.cursor_in(&storage), tag)
    }

    fn set_position(&mut self, ptr: Pointer) -> Result<()> {
        let storage = self.storage.read();
        let target = self.target(&storage, &ptr)?;
        self.seen = storage.generation;
        self.cursor = target;
        Ok(())
    }

    fn is_valid(&self, ptr: &Pointer) -> bool {
        self.target(&self.storage.read(), ptr).is_ok()
    }

    fn distance_in_bytes(&self, ptr: &Pointer) -> Option<u64> {
        let storage = self.storage.read();
        let to = self.target(&storage, ptr).ok()?;
        to.checked_sub(self.cursor_in(&storage)).map(|d| d as u64)
    }

    fn insert_bytes(&mut self, data: &[u8]) -> Result<()> {
        let mut storage = self.storage.write();
        let start = self.cursor_in(&storage);
        let end = start + data.len();
        if end > storage.bytes.len() {
            storage.bytes.resize(end, 0);
        }
        storage.bytes[start..end].copy_from_slice(data);
        self.seen = storage.generation;
        self.cursor = end;
        Ok(())
    }

    fn available(&self) -> Option<u64> {
        let storage = self.storage.read();
        Some(storage.bytes.len().saturating_sub(self.cursor_in(&storage)) as u64)
    }

    fn remove_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        let storage = self.storage.read();
        let start = self.cursor_in(&storage);
        let available = storage.bytes.len().saturating_sub(start);
        if out.len() > available {
            return Err(ScrollError::UnexpectedEnd { needed: out.len(), available });
        }
        let end = start + out.len();
        out.copy_from_slice(&storage.bytes[start..end]);
        self.seen = storage.generation;
        self.cursor = end;
        Ok(())
    }
}

/// A duplicate is another handle on the same storage, starting at this
/// handle's cursor.
impl Duplicate for SharedScroll {
    fn copy(&self) -> Result<Self> {
        Ok(Self {
            storage: Arc::clone(&self.storage),
            family:  self.family,
            cursor:  self.cursor,
            seen:    self.seen,
        })
    }
}
