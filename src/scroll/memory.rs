//! Scroll over a single owned byte buffer.
//!
//! Inserts write at the cursor, overwriting stored bytes and extending the
//! buffer past its end; removals read at the cursor.  Both advance it.

use uuid::Uuid;

use super::{Duplicate, Scroll};
use crate::error::{Result, ScrollError};
use crate::pointer::{Pointer, ScrollTag};

#[derive(Debug)]
pub struct MemoryScroll {
    buf:        Vec<u8>,
    cursor:     usize,
    family:     Uuid,
    generation: u64,
}

impl Default for MemoryScroll {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScroll {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Wrap existing bytes with the cursor at the start.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self { buf, cursor: 0, family: ScrollTag::new_family(), generation: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Total stored bytes, independent of the cursor.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    /// Move the cursor back to the first byte.  Outstanding pointers stay valid.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Drop every stored byte.  Invalidates outstanding pointers.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.cursor = 0;
        self.generation += 1;
    }

    /// Discard the bytes before the cursor.  Invalidates outstanding pointers.
    pub fn compact(&mut self) -> usize {
        let dropped = self.cursor;
        self.buf.drain(..dropped);
        self.cursor = 0;
        self.generation += 1;
        dropped
    }

    fn tag(&self) -> ScrollTag {
        ScrollTag { family: self.family, generation: self.generation, sector: 0 }
    }

    fn target(&self, ptr: &Pointer) -> Result<usize> {
        ScrollTag::current(ptr, self.family, self.generation)?;
        if ptr.value() > self.buf.len() {
            return Err(ScrollError::InvalidPointer("pointer lies past the stored data"));
        }
        Ok(ptr.value())
    }
}

impl Scroll for MemoryScroll {
    fn position(&self) -> Pointer {
        Pointer::with_tag(self.cursor, self.tag())
    }

    fn set_position(&mut self, ptr: Pointer) -> Result<()> {
        self.cursor = self.target(&ptr)?;
        Ok(())
    }

    fn is_valid(&self, ptr: &Pointer) -> bool {
        self.target(ptr).is_ok()
    }

    fn distance_in_bytes(&self, ptr: &Pointer) -> Option<u64> {
        let to = self.target(ptr).ok()?;
        to.checked_sub(self.cursor).map(|d| d as u64)
    }

    fn insert_bytes(&mut self, data: &[u8]) -> Result<()> {
        let end = self.cursor + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.cursor..end].copy_from_slice(data);
        self.cursor = end;
        Ok(())
    }

    fn available(&self) -> Option<u64> {
        Some(self.remaining() as u64)
    }

    fn remove_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        let available = self.remaining();
        if out.len() > available {
            return Err(ScrollError::UnexpectedEnd { needed: out.len(), available });
        }
        let end = self.cursor + out.len();
        out.copy_from_slice(&self.buf[self.cursor..end]);
        self.cursor = end;
        Ok(())
    }

    fn skip_bytes(&mut self, n: usize) -> Result<()> {
        let available = self.remaining();
        if n > available {
            return Err(ScrollError::UnexpectedEnd { needed: n, available });
        }
        self.cursor += n;
        Ok(())
    }
}

/// Deep copy: the duplicate owns its own bytes but stays in the same family,
/// so pointers from either scroll address the same offsets in both.
impl Duplicate for MemoryScroll {
    fn copy(&self) -> Result<Self> {
        Ok(Self {
            buf:        self.buf.clone(),
            cursor:     self.cursor,
            family:     self.family,
            generation: self.generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scroll::ScrollExt;

    #[test]
    fn insert_overwrites_then_extends() {
        let mut scroll = MemoryScroll::from_vec(b"abcd".to_vec());
        scroll.skip_bytes(2).unwrap();
        scroll.insert_bytes(b"XYZ").unwrap();
        assert_eq!(scroll.as_bytes(), b"abXYZ");
        assert_eq!(scroll.remaining(), 0);
    }

    #[test]
    fn pointer_restores_cursor() {
        let mut scroll = MemoryScroll::new();
        scroll.insert_value(1u32).unwrap();
        let mark = scroll.position();
        scroll.insert_value(2u32).unwrap();
        scroll.set_position(mark).unwrap();
        assert_eq!(scroll.remove_value::<u32>().unwrap(), 2);
    }

    #[test]
    fn peek_does_not_move_cursor() {
        let mut scroll = MemoryScroll::new();
        let start = scroll.position();
        scroll.insert_value(7u64).unwrap();
        assert!(scroll.is_valid(&start));
        assert_eq!(scroll.remaining(), 0);
        assert_eq!(scroll.distance_in_bytes(&start), None);
        scroll.set_position(start).unwrap();
        assert_eq!(scroll.remaining(), 8);
    }

    #[test]
    fn short_removal_consumes_nothing() {
        let mut scroll = MemoryScroll::from_vec(vec![1, 2, 3]);
        let err = scroll.remove_value::<u32>().unwrap_err();
        assert!(matches!(err, ScrollError::UnexpectedEnd { needed: 4, available: 3 }));
        assert!(err.is_io());
        assert_eq!(scroll.remaining(), 3);
    }

    #[test]
    fn compaction_invalidates_pointers() {
        let mut scroll = MemoryScroll::new();
        scroll.insert_span(&[1u8, 2, 3, 4]).unwrap();
        scroll.rewind();
        scroll.skip_bytes(2).unwrap();
        let stale = scroll.position();
        assert_eq!(scroll.compact(), 2);
        assert_eq!(scroll.as_bytes(), &[3, 4]);
        assert!(!scroll.is_valid(&stale));
        assert!(matches!(scroll.set_position(stale), Err(ScrollError::InvalidPointer(_))));
    }

    #[test]
    fn foreign_pointer_is_rejected() {
        let mut a = MemoryScroll::from_vec(vec![0; 8]);
        let b = MemoryScroll::from_vec(vec![0; 8]);
        assert!(!a.is_valid(&b.position()));
        assert!(a.set_position(b.position()).is_err());
    }

    #[test]
    fn duplicate_shares_family_not_bytes() {
        let mut original = MemoryScroll::new();
        original.insert_value(5i16).unwrap();
        let start = original.position();
        let mut dup = original.copy().unwrap();
        dup.insert_value(6i16).unwrap();

        assert_eq!(original.len(), 2);
        assert_eq!(dup.len(), 4);
        dup.set_position(start).unwrap();
        assert_eq!(dup.remove_value::<i16>().unwrap(), 6);
    }

    #[test]
    fn pointer_past_end_is_invalid() {
        let scroll = MemoryScroll::from_vec(vec![0; 16]);
        assert!(scroll.is_valid(&Pointer::with_tag(16, scroll.tag())));
        assert!(!scroll.is_valid(&Pointer::with_tag(17, scroll.tag())));
    }
}
