//! Polymorphic values: descriptor-prefixed objects and framed entries.
//!
//! An object is written as its type descriptor followed by the payload of
//! the routine the [`DispatchTable`] resolved for it.  A null object is the
//! null descriptor alone.
//!
//! A framed entry additionally carries an `i32` payload length between the
//! descriptor and the payload:
//!
//! ```text
//! [descriptor ids: 16 B each][payload length: i32][payload]
//! ```
//!
//! so a reader can step over entries without decoding them
//! ([`DispatchTable::skip_entry`]) and decode a skipped one later
//! ([`DispatchTable::resume`]).

use std::any::{Any, TypeId};
use std::fmt;

use super::table::{DispatchError, DispatchTable, Entry, Lineage};
use super::{TypeDescriptor, Typed};
use crate::encoding::Scrollable;
use crate::error::{Result, ScrollError};
use crate::pointer::Pointer;
use crate::scroll::{length_prefix, read_length, remove_vec, MemoryScroll, Scroll, ScrollExt};

/// A value whose routines are found at runtime.
pub trait Object: Send + Sync + fmt::Debug + 'static {
    fn descriptor(&self) -> TypeDescriptor;
    fn lineage(&self) -> Lineage;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
    /// The value converted to base type or interface `to`, if it has one.
    fn upcast_to(&self, to: &TypeDescriptor) -> Option<Box<dyn Object>>;
    /// See [`Typed::elements`].
    fn elements(&self) -> Option<Vec<&dyn Object>>;
    /// See [`Typed::content`].
    fn content(&self) -> Option<Option<&dyn Object>>;
    /// The value's own encoding, without a descriptor.
    fn write_payload(&self, scroll: &mut dyn Scroll) -> Result<()>;
    /// Decode the value's own encoding in place.
    fn read_payload(&mut self, scroll: &mut dyn Scroll) -> Result<()>;
}

impl<T: Typed + Scrollable + fmt::Debug> Object for T {
    fn descriptor(&self) -> TypeDescriptor {
        T::type_descriptor()
    }

    fn lineage(&self) -> Lineage {
        Lineage::of::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn upcast_to(&self, to: &TypeDescriptor) -> Option<Box<dyn Object>> {
        <T as Typed>::upcast(self, to)
    }

    fn elements(&self) -> Option<Vec<&dyn Object>> {
        <T as Typed>::elements(self)
    }

    fn content(&self) -> Option<Option<&dyn Object>> {
        <T as Typed>::content(self)
    }

    fn write_payload(&self, scroll: &mut dyn Scroll) -> Result<()> {
        self.insert_into(scroll)
    }

    fn read_payload(&mut self, scroll: &mut dyn Scroll) -> Result<()> {
        <T as Scrollable>::remove_into(self, scroll)
    }
}

impl dyn Object {
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast<T: Any>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }

    /// Take the value as `T`.  A value read through a generic definition
    /// (a [`Sequence`](super::Sequence) or [`Optional`](super::Optional))
    /// converts to the Rust type with the same descriptor.
    pub fn into_typed<T: Typed + Scrollable>(self: Box<Self>) -> Result<T> {
        let expected = T::type_descriptor();
        if self.descriptor() != expected {
            return Err(DispatchError::TypeMismatch { expected }.into());
        }
        if self.is::<T>() {
            return self
                .downcast::<T>()
                .map(|value| *value)
                .ok_or_else(|| DispatchError::TypeMismatch { expected }.into());
        }
        let mut payload = MemoryScroll::new();
        self.write_payload(&mut payload)?;
        payload.rewind();
        T::remove_from(&mut payload)
    }
}

/// Decode `dest` from the own encoding of `value`, which has the same descriptor.
pub(crate) fn reload(dest: &mut dyn Object, value: &dyn Object) -> Result<()> {
    let mut payload = MemoryScroll::new();
    value.write_payload(&mut payload)?;
    payload.rewind();
    dest.read_payload(&mut payload)
}

/// A framed entry that was stepped over.  Holds the position of its payload
/// and the type needed to decode it; pass it to [`DispatchTable::resume`].
#[derive(Debug)]
pub struct SkipToken {
    resume:     Pointer,
    descriptor: TypeDescriptor,
    len:        usize,
}

impl SkipToken {
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn payload_len(&self) -> usize {
        self.len
    }

    pub fn is_null(&self) -> bool {
        self.descriptor.is_null()
    }
}

fn read_entry_len(scroll: &mut dyn Scroll) -> Result<usize> {
    read_length(scroll)?
        .ok_or_else(|| ScrollError::InvalidData("null length prefix on a framed entry".into()))
}

impl DispatchTable {
    // ── Objects ──────────────────────────────────────────────────────────────

    /// Write `value` as descriptor + payload, or the null descriptor for `None`.
    ///
    /// When resolution falls back to a base type or interface the value is
    /// converted with [`Typed::upcast`] and the fallback's descriptor is written,
    /// so the object reads back as that type.
    pub fn insert_object(&self, scroll: &mut dyn Scroll, value: Option<&dyn Object>) -> Result<()> {
        let Some(value) = value else {
            return TypeDescriptor::null().write_to(scroll);
        };
        let entry = self.resolve_value(scroll.scroll_type_id(), value)?;
        entry.target().write_to(&mut *scroll)?;
        encode(&entry, scroll, value)
    }

    pub fn remove_object(&self, scroll: &mut dyn Scroll) -> Result<Option<Box<dyn Object>>> {
        let descriptor = TypeDescriptor::read_from(&mut *scroll, self)?;
        if descriptor.is_null() {
            return Ok(None);
        }
        let entry = self.resolve(scroll.scroll_type_id(), &descriptor)?;
        entry.remove_value(scroll).map(Some)
    }

    /// Read an object into `dest`.  A present value of the encoded type is
    /// decoded in place; otherwise `dest` is replaced.
    pub fn remove_object_into(&self, scroll: &mut dyn Scroll, dest: &mut Option<Box<dyn Object>>) -> Result<()> {
        let descriptor = TypeDescriptor::read_from(&mut *scroll, self)?;
        if descriptor.is_null() {
            *dest = None;
            return Ok(());
        }
        let entry = self.resolve(scroll.scroll_type_id(), &descriptor)?;
        if let Some(current) = dest.as_mut() {
            if current.descriptor() == *entry.target() {
                return entry.remove_into(scroll, &mut **current);
            }
        }
        *dest = Some(entry.remove_value(scroll)?);
        Ok(())
    }

    // ── Framed entries ───────────────────────────────────────────────────────

    pub fn insert_entry(&self, scroll: &mut dyn Scroll, value: Option<&dyn Object>) -> Result<()> {
        let Some(value) = value else {
            TypeDescriptor::null().write_to(&mut *scroll)?;
            return scroll.insert_value(0i32);
        };
        let entry = self.resolve_value(scroll.scroll_type_id(), value)?;
        let mut payload = MemoryScroll::new();
        encode(&entry, &mut payload, value)?;

        entry.target().write_to(&mut *scroll)?;
        scroll.insert_value(length_prefix(payload.len())?)?;
        scroll.insert_bytes(payload.as_bytes())
    }

    /// Step over the next entry without decoding its payload.
    pub fn skip_entry(&self, scroll: &mut dyn Scroll) -> Result<SkipToken> {
        let descriptor = TypeDescriptor::read_from(&mut *scroll, self)?;
        let len = read_entry_len(scroll)?;
        let resume = scroll.position();
        scroll.skip_bytes(len)?;
        Ok(SkipToken { resume, descriptor, len })
    }

    /// Decode a skipped entry.  The cursor is back where it was on return,
    /// whether or not decoding succeeds.
    pub fn resume(&self, scroll: &mut dyn Scroll, token: SkipToken) -> Result<Option<Box<dyn Object>>> {
        let SkipToken { resume, descriptor, len } = token;
        if descriptor.is_null() {
            return Ok(None);
        }
        let here = scroll.position();
        scroll.set_position(resume)?;
        let read = remove_vec(&mut *scroll, len);
        scroll.set_position(here)?;
        self.decode(scroll.scroll_type_id(), &descriptor, read?).map(Some)
    }

    pub fn remove_entry(&self, scroll: &mut dyn Scroll) -> Result<Option<Box<dyn Object>>> {
        let descriptor = TypeDescriptor::read_from(&mut *scroll, self)?;
        let len = read_entry_len(scroll)?;
        if descriptor.is_null() {
            scroll.skip_bytes(len)?;
            return Ok(None);
        }
        let payload = remove_vec(&mut *scroll, len)?;
        self.decode(scroll.scroll_type_id(), &descriptor, payload).map(Some)
    }

    fn decode(&self, scroll_type: TypeId, descriptor: &TypeDescriptor, payload: Vec<u8>) -> Result<Box<dyn Object>> {
        let entry = self.resolve(scroll_type, descriptor)?;
        let mut payload = MemoryScroll::from_vec(payload);
        let value = entry.remove_value(&mut payload)?;
        if payload.remaining() != 0 {
            return Err(ScrollError::InvalidData(format!(
                "{} trailing byte(s) in entry payload for {descriptor}",
                payload.remaining()
            )));
        }
        Ok(value)
    }
}

/// Write `value` with `entry`, upcasting it when the entry belongs to a base
/// type or interface.  An entry built from the same generic definition takes
/// the value as is and converts its parts one by one.
pub(crate) fn encode(entry: &Entry, scroll: &mut dyn Scroll, value: &dyn Object) -> Result<()> {
    let descriptor = value.descriptor();
    let same_definition = !descriptor.args().is_empty() && entry.target().id() == descriptor.id();
    if *entry.target() == descriptor || same_definition {
        return entry.insert_ref(scroll, value);
    }
    let upcast = value.upcast_to(entry.target()).ok_or_else(|| {
        ScrollError::InvalidOperation(format!(
            "{} resolved to {} but provides no conversion to it",
            value.descriptor(),
            entry.target()
        ))
    })?;
    entry.insert_value(scroll, upcast)
}

// ── Scroll extension ─────────────────────────────────────────────────────────

/// Object and entry operations on any scroll, through [`DispatchTable::global`].
pub trait ObjectExt {
    fn insert_object(&mut self, value: Option<&dyn Object>) -> Result<()>;
    fn remove_object(&mut self) -> Result<Option<Box<dyn Object>>>;
    fn remove_object_into(&mut self, dest: &mut Option<Box<dyn Object>>) -> Result<()>;
    fn insert_entry(&mut self, value: Option<&dyn Object>) -> Result<()>;
    fn skip_entry(&mut self) -> Result<SkipToken>;
    fn resume_entry(&mut self, token: SkipToken) -> Result<Option<Box<dyn Object>>>;
    fn remove_entry(&mut self) -> Result<Option<Box<dyn Object>>>;
}

macro_rules! object_ext_via_global {
    () => {
        fn insert_object(&mut self, value: Option<&dyn Object>) -> Result<()> {
            DispatchTable::global().insert_object(self, value)
        }

        fn remove_object(&mut self) -> Result<Option<Box<dyn Object>>> {
            DispatchTable::global().remove_object(self)
        }

        fn remove_object_into(&mut self, dest: &mut Option<Box<dyn Object>>) -> Result<()> {
            DispatchTable::global().remove_object_into(self, dest)
        }

        fn insert_entry(&mut self, value: Option<&dyn Object>) -> Result<()> {
            DispatchTable::global().insert_entry(self, value)
        }

        fn skip_entry(&mut self) -> Result<SkipToken> {
            DispatchTable::global().skip_entry(self)
        }

        fn resume_entry(&mut self, token: SkipToken) -> Result<Option<Box<dyn Object>>> {
            DispatchTable::global().resume(self, token)
        }

        fn remove_entry(&mut self) -> Result<Option<Box<dyn Object>>> {
            DispatchTable::global().remove_entry(self)
        }
    };
}

impl<S: Scroll> ObjectExt for S {
    object_ext_via_global!();
}

impl ObjectExt for dyn Scroll {
    object_ext_via_global!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchError, TypeIdentifier};
    use crate::scroll::SectorScroll;
    use crate::config::ScrollOptions;

    #[derive(Debug, Clone, PartialEq)]
    struct Shape {
        sides: u8,
    }

    impl Typed for Shape {
        fn type_descriptor() -> TypeDescriptor {
            TypeDescriptor::new(TypeIdentifier::from_u128(0x0b1e_c700_0001))
        }
    }

    impl Scrollable for Shape {
        fn insert_into<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()> {
            scroll.insert_value(self.sides)
        }

        fn remove_from<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Self> {
            Ok(Shape { sides: scroll.remove_value()? })
        }
    }

    /// Only ever stored as its `Shape` base.
    #[derive(Debug, Clone, PartialEq)]
    struct Square {
        side: f64,
    }

    impl Typed for Square {
        fn type_descriptor() -> TypeDescriptor {
            TypeDescriptor::new(TypeIdentifier::from_u128(0x0b1e_c700_0002))
        }

        fn bases() -> Vec<TypeDescriptor> {
            vec![Shape::type_descriptor()]
        }

        fn upcast(&self, to: &TypeDescriptor) -> Option<Box<dyn Object>> {
            (*to == Shape::type_descriptor()).then(|| Box::new(Shape { sides: 4 }) as Box<dyn Object>)
        }
    }

    impl Scrollable for Square {
        fn insert_into<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()> {
            scroll.insert_value(self.side)
        }

        fn remove_from<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Self> {
            Ok(Square { side: scroll.remove_value()? })
        }
    }

    fn table() -> DispatchTable {
        let table = DispatchTable::with_builtins();
        table.register::<Shape>().unwrap();
        table
    }

    #[test]
    fn objects_roundtrip_with_null() {
        let table = table();
        let mut scroll = MemoryScroll::new();
        table.insert_object(&mut scroll, Some(&Shape { sides: 3 })).unwrap();
        table.insert_object(&mut scroll, None).unwrap();
        table.insert_object(&mut scroll, Some(&String::from("hex"))).unwrap();
        // null object is the null descriptor only
        assert_eq!(scroll.len(), (16 + 1) + 16 + (16 + 4 + 6));

        scroll.rewind();
        let shape = table.remove_object(&mut scroll).unwrap().unwrap();
        assert_eq!(shape.downcast_ref::<Shape>(), Some(&Shape { sides: 3 }));
        assert!(table.remove_object(&mut scroll).unwrap().is_none());
        let text = table.remove_object(&mut scroll).unwrap().unwrap();
        assert_eq!(text.downcast::<String>().map(|s| *s), Some("hex".to_string()));
    }

    #[test]
    fn derived_value_is_written_as_its_base() {
        let table = table();
        let mut scroll = MemoryScroll::new();
        table.insert_object(&mut scroll, Some(&Square { side: 2.0 })).unwrap();

        scroll.rewind();
        let back = table.remove_object(&mut scroll).unwrap().unwrap();
        assert!(back.is::<Shape>());
        assert_eq!(back.descriptor(), Shape::type_descriptor());
    }

    #[test]
    fn unregistered_object_fails_before_writing() {
        let table = DispatchTable::new();
        let mut scroll = MemoryScroll::new();
        let err = table.insert_object(&mut scroll, Some(&Shape { sides: 5 })).unwrap_err();
        assert!(matches!(err, ScrollError::Dispatch(DispatchError::NotRegistered(_))));
        assert!(scroll.is_empty());
    }

    #[test]
    fn remove_into_reuses_matching_value() {
        let table = table();
        let mut scroll = MemoryScroll::new();
        table.insert_object(&mut scroll, Some(&Shape { sides: 6 })).unwrap();
        table.insert_object(&mut scroll, Some(&7u32)).unwrap();
        table.insert_object(&mut scroll, None).unwrap();
        scroll.rewind();

        let mut dest: Option<Box<dyn Object>> = Some(Box::new(Shape { sides: 0 }));
        table.remove_object_into(&mut scroll, &mut dest).unwrap();
        assert_eq!(dest.as_deref().and_then(|o| o.downcast_ref::<Shape>()), Some(&Shape { sides: 6 }));

        table.remove_object_into(&mut scroll, &mut dest).unwrap();
        assert_eq!(dest.as_deref().and_then(|o| o.downcast_ref::<u32>()), Some(&7));

        table.remove_object_into(&mut scroll, &mut dest).unwrap();
        assert!(dest.is_none());
    }

    #[test]
    fn entries_can_be_skipped_and_resumed() {
        let table = table();
        let mut scroll = MemoryScroll::new();
        table.insert_entry(&mut scroll, Some(&Shape { sides: 8 })).unwrap();
        table.insert_entry(&mut scroll, None).unwrap();
        table.insert_entry(&mut scroll, Some(&String::from("last"))).unwrap();
        scroll.rewind();

        let first = table.skip_entry(&mut scroll).unwrap();
        assert_eq!(first.descriptor(), &Shape::type_descriptor());
        assert_eq!(first.payload_len(), 1);
        let second = table.skip_entry(&mut scroll).unwrap();
        assert!(second.is_null());

        let shape = table.resume(&mut scroll, first).unwrap().unwrap();
        assert_eq!(shape.downcast_ref::<Shape>(), Some(&Shape { sides: 8 }));
        assert!(table.resume(&mut scroll, second).unwrap().is_none());

        // cursor was restored: the next entry is the string
        let last = table.remove_entry(&mut scroll).unwrap().unwrap();
        assert_eq!(last.downcast_ref::<String>().map(String::as_str), Some("last"));
        assert_eq!(scroll.remaining(), 0);
    }

    #[test]
    fn entry_payload_must_be_fully_consumed() {
        let table = table();
        let mut scroll = MemoryScroll::new();
        Shape::type_descriptor().write_to(&mut scroll).unwrap();
        scroll.insert_value(2i32).unwrap();
        scroll.insert_bytes(&[3, 0xff]).unwrap();
        scroll.rewind();

        let err = table.remove_entry(&mut scroll).unwrap_err();
        assert!(matches!(err, ScrollError::InvalidData(_)));
    }

    #[test]
    fn entries_cross_sector_boundaries() {
        let table = table();
        let mut scroll = SectorScroll::in_memory(ScrollOptions::default().with_sector_capacity(8));
        for sides in 0..4u8 {
            table.insert_entry(&mut scroll, Some(&Shape { sides })).unwrap();
        }
        for sides in 0..4u8 {
            let value = table.remove_entry(&mut scroll).unwrap().unwrap();
            assert_eq!(value.downcast_ref::<Shape>(), Some(&Shape { sides }));
        }
        assert!(scroll.is_empty());
    }

    #[test]
    fn global_table_serves_builtins_through_dyn_scroll() {
        let mut scroll: Box<dyn Scroll> = Box::new(MemoryScroll::new());
        let start = scroll.position();
        scroll.insert_object(Some(&42u64)).unwrap();
        scroll.insert_entry(Some(&'x')).unwrap();
        scroll.set_position(start).unwrap();

        let value = scroll.remove_object().unwrap().unwrap();
        assert_eq!(value.downcast_ref::<u64>(), Some(&42));
        let token = scroll.skip_entry().unwrap();
        assert_eq!(token.payload_len(), 4);
        let ch = scroll.resume_entry(token).unwrap().unwrap();
        assert_eq!(ch.downcast_ref::<char>(), Some(&'x'));
    }

    #[test]
    fn oversized_entry_length_fails_before_reading() {
        let table = table();
        let mut scroll = MemoryScroll::new();
        Shape::type_descriptor().write_to(&mut scroll).unwrap();
        scroll.insert_value(i32::MAX).unwrap();
        scroll.insert_value(3u8).unwrap();
        scroll.rewind();

        let err = table.remove_entry(&mut scroll).unwrap_err();
        assert!(matches!(err, ScrollError::UnexpectedEnd { needed, available: 1 } if needed == i32::MAX as usize));
    }

    #[test]
    fn generic_object_converts_to_rust_type() {
        let table = table();
        let mut scroll = MemoryScroll::new();
        let rows = vec![Some(1u8), None];
        table.insert_entry(&mut scroll, Some(&rows)).unwrap();
        table.insert_entry(&mut scroll, Some(&rows)).unwrap();
        scroll.rewind();

        let value = table.remove_entry(&mut scroll).unwrap().unwrap();
        assert!(!value.is::<Vec<Option<u8>>>());
        assert_eq!(value.into_typed::<Vec<Option<u8>>>().unwrap(), rows);

        let value = table.remove_entry(&mut scroll).unwrap().unwrap();
        assert!(matches!(
            value.into_typed::<Vec<u8>>(),
            Err(ScrollError::Dispatch(DispatchError::TypeMismatch { .. }))
        ));
    }
}
