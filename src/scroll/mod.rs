//! Scrolls: cursor-based sequential storage with a typed insert/remove surface.
//!
//! # Layers
//! - [`Scroll`] is the object-safe core every backing implements: position
//!   tokens plus the two raw byte primitives `insert_bytes` / `remove_bytes`.
//! - [`ScrollExt`] is blanket-implemented for every scroll (including
//!   `dyn Scroll`) and expresses all typed operations in terms of the raw
//!   primitives: spans and values of [`Fixed`] types, nullable strings,
//!   nullable arrays and anything [`Scrollable`].
//!
//! # Positions
//! `position()` hands out a fresh [`Pointer`]; `set_position()` consumes one.
//! A pointer can only be used against the scroll family that produced it and
//! only until that family reorganises its storage.

pub mod memory;
pub mod sectored;
pub mod shared;

use byteorder::{ByteOrder, LittleEndian};
use std::any::TypeId;

use crate::encoding::{Fixed, Scrollable};
use crate::error::{Result, ScrollError, ShapeError};
use crate::pointer::Pointer;

pub use memory::MemoryScroll;
pub use sectored::SectorScroll;
pub use shared::SharedScroll;

/// Encodings at or below this many bytes are staged in an inline buffer.
pub const SCRATCH_INLINE: usize = 64;

/// Length prefix marking a null string or array.
pub const NULL_LENGTH: i32 = -1;

/// Largest buffer allocated ahead of the data for a length-prefixed read from
/// a scroll that cannot report [`Scroll::available`].
pub const READ_CHUNK: usize = 64 * 1024;

// ── Core trait ───────────────────────────────────────────────────────────────

pub trait Scroll: Send + 'static {
    /// A fresh pointer to the current cursor position.
    fn position(&self) -> Pointer;

    /// Move the cursor to `ptr`, consuming it.
    fn set_position(&mut self, ptr: Pointer) -> Result<()>;

    /// Whether `ptr` could be passed to `set_position` right now.  Never moves
    /// the cursor.
    fn is_valid(&self, ptr: &Pointer) -> bool;

    /// Bytes between the cursor and `ptr` when `ptr` is reachable by forward
    /// movement within the current storage segment.
    fn distance_in_bytes(&self, ptr: &Pointer) -> Option<u64>;

    /// Write `data` at the cursor.
    fn insert_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Fill `buf` from the cursor.  Fails with [`ScrollError::UnexpectedEnd`]
    /// without consuming anything when fewer bytes are stored.
    fn remove_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Bytes that can be removed from the cursor onward, when the scroll can
    /// tell without reading.  Length-prefixed decoders check it before sizing
    /// a buffer from the prefix.
    fn available(&self) -> Option<u64> {
        None
    }

    /// Consume and discard `n` bytes.
    fn skip_bytes(&mut self, mut n: usize) -> Result<()> {
        let mut chunk = [0u8; SCRATCH_INLINE];
        while n > 0 {
            let step = n.min(SCRATCH_INLINE);
            self.remove_bytes(&mut chunk[..step])?;
            n -= step;
        }
        Ok(())
    }

    /// Identity of the concrete implementation, used to scope dispatch entries.
    fn scroll_type_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }
}

/// Scrolls that can be duplicated.  A duplicate belongs to the same family:
/// pointers taken from either one are accepted by both, each pointer still
/// being consumed by the single `set_position` it is passed to.
pub trait Duplicate: Scroll + Sized {
    fn copy(&self) -> Result<Self>;
}

// ── Scratch buffer ───────────────────────────────────────────────────────────

/// Small-buffer staging area: inline up to [`SCRATCH_INLINE`] bytes, heap above.
pub struct ScratchBuf {
    inline: [u8; SCRATCH_INLINE],
    heap:   Vec<u8>,
    len:    usize,
}

impl ScratchBuf {
    pub fn new(len: usize) -> Self {
        let heap = if len > SCRATCH_INLINE { vec![0u8; len] } else { Vec::new() };
        Self { inline: [0u8; SCRATCH_INLINE], heap, len }
    }

    pub fn is_inline(&self) -> bool {
        self.len <= SCRATCH_INLINE
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.is_inline() { &self.inline[..self.len] } else { &self.heap }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.is_inline() { &mut self.inline[..self.len] } else { &mut self.heap }
    }
}

// ── Typed surface ────────────────────────────────────────────────────────────

pub(crate) fn length_prefix(len: usize) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| ScrollError::InvalidOperation(format!("length {len} exceeds the i32 prefix")))
}

/// Decode a length prefix: `None` for null, error for any other negative value.
pub(crate) fn read_length<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Option<usize>> {
    match scroll.remove_value::<i32>()? {
        NULL_LENGTH => Ok(None),
        n if n < 0  => Err(ScrollError::InvalidData(format!("negative length prefix {n}"))),
        n           => Ok(Some(n as usize)),
    }
}

/// Remove `len` bytes into a new buffer whose size was taken from the stream.
///
/// Fails with [`ScrollError::UnexpectedEnd`] before allocating when the scroll
/// reports fewer bytes.  Without that hint the buffer grows one
/// [`READ_CHUNK`] at a time, so a short scroll fails after consuming what it
/// held.
pub(crate) fn remove_vec<S: Scroll + ?Sized>(scroll: &mut S, len: usize) -> Result<Vec<u8>> {
    if let Some(available) = scroll.available() {
        if len as u64 > available {
            let available = usize::try_from(available).unwrap_or(usize::MAX);
            return Err(ScrollError::UnexpectedEnd { needed: len, available });
        }
        let mut buf = vec![0u8; len];
        scroll.remove_bytes(&mut buf)?;
        return Ok(buf);
    }
    let mut buf = Vec::with_capacity(len.min(READ_CHUNK));
    while buf.len() < len {
        let start = buf.len();
        buf.resize(start + (len - start).min(READ_CHUNK), 0);
        scroll.remove_bytes(&mut buf[start..])?;
    }
    Ok(buf)
}

pub trait ScrollExt: Scroll {
    /// Copy the raw little-endian encoding of `items` to the scroll.
    fn insert_span<T: Fixed>(&mut self, items: &[T]) -> Result<()> {
        let mut scratch = ScratchBuf::new(items.len() * T::SIZE);
        for (item, slot) in items.iter().zip(scratch.as_mut_slice().chunks_exact_mut(T::SIZE)) {
            item.write_le(slot);
        }
        self.insert_bytes(scratch.as_slice())
    }

    /// Fill `out` from the scroll.
    fn remove_span<T: Fixed>(&mut self, out: &mut [T]) -> Result<()> {
        let mut scratch = ScratchBuf::new(out.len() * T::SIZE);
        self.remove_bytes(scratch.as_mut_slice())?;
        for (item, slot) in out.iter_mut().zip(scratch.as_slice().chunks_exact(T::SIZE)) {
            *item = T::read_le(slot)?;
        }
        Ok(())
    }

    fn insert_value<T: Fixed>(&mut self, value: T) -> Result<()> {
        self.insert_span(std::slice::from_ref(&value))
    }

    fn remove_value<T: Fixed>(&mut self) -> Result<T> {
        let mut scratch = ScratchBuf::new(T::SIZE);
        self.remove_bytes(scratch.as_mut_slice())?;
        T::read_le(scratch.as_slice())
    }

    fn remove_value_into<T: Fixed>(&mut self, slot: &mut T) -> Result<()> {
        self.remove_span(std::slice::from_mut(slot))
    }

    fn insert<T: Scrollable>(&mut self, value: &T) -> Result<()> {
        value.insert_into(self)
    }

    fn remove<T: Scrollable>(&mut self) -> Result<T> {
        T::remove_from(self)
    }

    fn remove_into<T: Scrollable>(&mut self, slot: &mut T) -> Result<()> {
        slot.remove_into(self)
    }

    /// `None` is written as length `-1`; an empty string as length `0`.  The
    /// length counts UTF-16 code units, each stored as two bytes.
    fn insert_str(&mut self, s: Option<&str>) -> Result<()> {
        let Some(s) = s else { return self.insert_value(NULL_LENGTH) };
        let units: Vec<u16> = s.encode_utf16().collect();
        self.insert_value(length_prefix(units.len())?)?;
        self.insert_span(&units)
    }

    fn remove_str(&mut self) -> Result<Option<String>> {
        let Some(count) = read_length(self)? else { return Ok(None) };
        let len = count
            .checked_mul(2)
            .ok_or_else(|| ScrollError::InvalidData(format!("string length {count} overflows")))?;
        let bytes = remove_vec(self, len)?;
        let units: Vec<u16> = bytes.chunks_exact(2).map(LittleEndian::read_u16).collect();
        String::from_utf16(&units)
            .map(Some)
            .map_err(|e| ScrollError::InvalidData(format!("string is not valid UTF-16: {e}")))
    }

    fn insert_array<T: Scrollable>(&mut self, items: Option<&[T]>) -> Result<()> {
        let Some(items) = items else { return self.insert_value(NULL_LENGTH) };
        self.insert_value(length_prefix(items.len())?)?;
        for item in items {
            item.insert_into(self)?;
        }
        Ok(())
    }

    fn remove_array<T: Scrollable>(&mut self) -> Result<Option<Vec<T>>> {
        let Some(count) = read_length(self)? else { return Ok(None) };
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            items.push(T::remove_from(self)?);
        }
        Ok(Some(items))
    }

    /// Decode into a caller-supplied array whose shape must match the encoded
    /// one exactly.  `None` means the caller expects a null array.  The length
    /// prefix is consumed even when the shapes disagree.
    fn remove_array_into<T: Scrollable>(&mut self, dest: Option<&mut [T]>) -> Result<()> {
        let encoded = read_length(self)?;
        match (encoded, dest) {
            (None, None) => Ok(()),
            (Some(_), None) => Err(ShapeError::ExpectedNull.into()),
            (None, Some(_)) => Err(ShapeError::ExpectedNonNull.into()),
            (Some(n), Some(dest)) if n != dest.len() => {
                Err(ShapeError::LengthMismatch { expected: n, actual: dest.len() }.into())
            }
            (Some(_), Some(dest)) => {
                for slot in dest.iter_mut() {
                    slot.remove_into(self)?;
                }
                Ok(())
            }
        }
    }

    /// Span between the cursor and `to` as a count of `T` units: `0` when `to`
    /// is the cursor, `-1` when the span is not a whole number of units or is
    /// not reachable by moving forward.
    fn distance_as_units_of<T: Fixed>(&self, to: &Pointer) -> i64 {
        match self.distance_in_bytes(to) {
            Some(bytes) if bytes % T::SIZE as u64 == 0 => (bytes / T::SIZE as u64) as i64,
            _ => -1,
        }
    }
}

impl<S: Scroll + ?Sized> ScrollExt for S {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_switches_to_heap_above_threshold() {
        let mut small = ScratchBuf::new(SCRATCH_INLINE);
        assert!(small.is_inline());
        small.as_mut_slice()[SCRATCH_INLINE - 1] = 7;
        assert_eq!(small.as_slice()[SCRATCH_INLINE - 1], 7);

        let big = ScratchBuf::new(SCRATCH_INLINE + 1);
        assert!(!big.is_inline());
        assert_eq!(big.as_slice().len(), SCRATCH_INLINE + 1);
    }

    #[test]
    fn strings_distinguish_null_and_empty() {
        let mut scroll = MemoryScroll::new();
        scroll.insert_str(None).unwrap();
        scroll.insert_str(Some("")).unwrap();
        scroll.insert_str(Some("héllo 𝄞")).unwrap();
        assert_eq!(&scroll.as_bytes()[..8], &[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]);

        scroll.rewind();
        assert_eq!(scroll.remove_str().unwrap(), None);
        assert_eq!(scroll.remove_str().unwrap(), Some(String::new()));
        assert_eq!(scroll.remove_str().unwrap().as_deref(), Some("héllo 𝄞"));
    }

    #[test]
    fn string_prefix_counts_utf16_units() {
        let mut scroll = MemoryScroll::new();
        // one BMP char plus one supplementary char (surrogate pair)
        scroll.insert_str(Some("é𝄞")).unwrap();
        assert_eq!(&scroll.as_bytes()[..4], &3i32.to_le_bytes());
        assert_eq!(scroll.as_bytes().len(), 4 + 3 * 2);
    }

    #[test]
    fn array_shape_errors_are_distinct() {
        let mut scroll = MemoryScroll::new();
        scroll.insert_array(Some(&[1i32, 2, 3][..])).unwrap();
        scroll.insert_array::<i32>(None).unwrap();
        scroll.insert_array(Some(&[9i32][..])).unwrap();
        scroll.rewind();

        let err = scroll.remove_array_into::<i32>(None).unwrap_err();
        assert!(matches!(err, ScrollError::Shape(ShapeError::ExpectedNull)));
        scroll.skip_bytes(12).unwrap();

        let mut one = [0i32; 1];
        let err = scroll.remove_array_into(Some(&mut one[..])).unwrap_err();
        assert!(matches!(err, ScrollError::Shape(ShapeError::ExpectedNonNull)));

        let mut two = [0i32; 2];
        let err = scroll.remove_array_into(Some(&mut two[..])).unwrap_err();
        assert!(matches!(
            err,
            ScrollError::Shape(ShapeError::LengthMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn arrays_roundtrip_with_null() {
        let mut scroll = MemoryScroll::new();
        scroll.insert_array(Some(&[true, false][..])).unwrap();
        scroll.insert_array::<u64>(None).unwrap();
        scroll.rewind();
        assert_eq!(scroll.remove_array::<bool>().unwrap(), Some(vec![true, false]));
        assert_eq!(scroll.remove_array::<u64>().unwrap(), None);
    }

    #[test]
    fn negative_length_other_than_null_is_invalid() {
        let mut scroll = MemoryScroll::new();
        scroll.insert_value(-2i32).unwrap();
        scroll.rewind();
        assert!(matches!(scroll.remove_str(), Err(ScrollError::InvalidData(_))));
    }

    /// Forwards everything except the `available` hint.
    struct Opaque(MemoryScroll);

    impl Scroll for Opaque {
        fn position(&self) -> Pointer {
            self.0.position()
        }

        fn set_position(&mut self, ptr: Pointer) -> Result<()> {
            self.0.set_position(ptr)
        }

        fn is_valid(&self, ptr: &Pointer) -> bool {
            self.0.is_valid(ptr)
        }

        fn distance_in_bytes(&self, ptr: &Pointer) -> Option<u64> {
            self.0.distance_in_bytes(ptr)
        }

        fn insert_bytes(&mut self, data: &[u8]) -> Result<()> {
            self.0.insert_bytes(data)
        }

        fn remove_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
            self.0.remove_bytes(buf)
        }
    }

    #[test]
    fn huge_string_prefix_fails_before_allocating() {
        let mut scroll = MemoryScroll::from_vec(i32::MAX.to_le_bytes().to_vec());
        assert_eq!(scroll.available(), Some(4));
        match scroll.remove_str() {
            Err(ScrollError::UnexpectedEnd { needed, available: 0 }) => {
                assert_eq!(needed, i32::MAX as usize * 2);
            }
            other => panic!("expected a short read, got {other:?}"),
        }
    }

    #[test]
    fn huge_prefix_without_hint_reads_in_chunks() {
        let mut bytes = i32::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[b'a', 0, b'b', 0]);
        let mut scroll = Opaque(MemoryScroll::from_vec(bytes));
        assert_eq!(scroll.available(), None);
        match scroll.remove_str() {
            Err(ScrollError::UnexpectedEnd { needed, available: 4 }) => assert_eq!(needed, READ_CHUNK),
            other => panic!("expected a short read, got {other:?}"),
        }
    }

    #[test]
    fn chunked_read_spans_several_chunks() {
        let text: String = std::iter::repeat('z').take(READ_CHUNK).collect();
        let mut inner = MemoryScroll::new();
        inner.insert_str(Some(&text)).unwrap();
        inner.rewind();
        let mut scroll = Opaque(inner);
        assert_eq!(scroll.remove_str().unwrap().as_deref(), Some(text.as_str()));
    }

    #[test]
    fn distance_in_units() {
        let mut scroll = MemoryScroll::new();
        let start = scroll.position();
        assert_eq!(scroll.distance_as_units_of::<u32>(&start), 0);

        scroll.insert_span(&[1u32, 2, 3]).unwrap();
        let end = scroll.position();
        scroll.set_position(start).unwrap();
        assert_eq!(scroll.distance_as_units_of::<u32>(&end), 3);
        assert_eq!(scroll.distance_as_units_of::<u64>(&end), -1);
        assert_eq!(scroll.distance_as_units_of::<u8>(&end), 12);

        scroll.skip_bytes(12).unwrap();
        let foreign = MemoryScroll::new().position();
        assert_eq!(scroll.distance_as_units_of::<u8>(&foreign), -1);
    }

    #[test]
    fn works_through_dyn_scroll() {
        let mut scroll: Box<dyn Scroll> = Box::new(MemoryScroll::new());
        scroll.insert_value(0x1234u16).unwrap();
        scroll.insert_str(Some("dyn")).unwrap();
        let ptr = scroll.position();
        assert_eq!(scroll.scroll_type_id(), TypeId::of::<MemoryScroll>());
        assert!(scroll.is_valid(&ptr));
        assert!(matches!(scroll.remove_value::<u8>(), Err(ScrollError::UnexpectedEnd { .. })));
    }
}
