//! Built-in generic definitions: `Option<_>` and `Vec<_>`.
//!
//! An instantiation such as `Vec<Vec<String>>` is resolved from the entries
//! of its arguments, so nothing needs registering per instantiation.  Reading
//! one yields a [`Sequence`] or [`Optional`] holding boxed objects; convert it
//! with `into_typed` when the Rust type is known:
//!
//! ```ignore
//! let value = scroll.remove_object()?.unwrap();
//! let rows: Vec<Vec<String>> = value.into_typed()?;
//! ```
//!
//! Encodings match the static ones: a sequence is an `i32` count followed by
//! the element payloads, an optional is a presence `bool` followed by the
//! payload when present.

use std::any::Any;
use std::sync::Arc;

use super::object::{encode, reload, Object};
use super::table::{DispatchError, Entry, Lineage, Routines};
use super::TypeDescriptor;
use crate::error::{Result, ScrollError};
use crate::scroll::{length_prefix, read_length, Scroll, ScrollExt};

fn mismatch(expected: &TypeDescriptor) -> ScrollError {
    DispatchError::TypeMismatch { expected: expected.clone() }.into()
}

// ── Sequence ─────────────────────────────────────────────────────────────────

/// A `Vec<_>` instantiation read without its Rust type.
#[derive(Debug)]
pub struct Sequence {
    descriptor: TypeDescriptor,
    element:    Arc<Entry>,
    items:      Vec<Box<dyn Object>>,
}

impl Sequence {
    /// Type of the elements as resolved.
    pub fn element_type(&self) -> &TypeDescriptor {
        self.element.target()
    }

    pub fn items(&self) -> &[Box<dyn Object>] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Box<dyn Object>> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn write_items(element: &Entry, scroll: &mut dyn Scroll, items: &[&dyn Object]) -> Result<()> {
    scroll.insert_value(length_prefix(items.len())?)?;
    for item in items {
        encode(element, scroll, *item)?;
    }
    Ok(())
}

fn read_items(element: &Entry, scroll: &mut dyn Scroll) -> Result<Vec<Box<dyn Object>>> {
    let count = read_length(scroll)?
        .ok_or_else(|| ScrollError::InvalidData("null array where a value was expected".into()))?;
    let mut items = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        items.push(element.remove_value(scroll)?);
    }
    Ok(items)
}

impl Object for Sequence {
    fn descriptor(&self) -> TypeDescriptor {
        self.descriptor.clone()
    }

    fn lineage(&self) -> Lineage {
        Lineage::default()
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

    fn upcast_to(&self, _to: &TypeDescriptor) -> Option<Box<dyn Object>> {
        None
    }

    fn elements(&self) -> Option<Vec<&dyn Object>> {
        Some(self.items.iter().map(|item| &**item).collect())
    }

    fn content(&self) -> Option<Option<&dyn Object>> {
        None
    }

    fn write_payload(&self, scroll: &mut dyn Scroll) -> Result<()> {
        let items: Vec<&dyn Object> = self.items.iter().map(|item| &**item).collect();
        write_items(&self.element, scroll, &items)
    }

    fn read_payload(&mut self, scroll: &mut dyn Scroll) -> Result<()> {
        self.items = read_items(&self.element, scroll)?;
        Ok(())
    }
}

struct VecRoutines {
    target:  TypeDescriptor,
    element: Arc<Entry>,
}

impl Routines for VecRoutines {
    fn insert_ref(&self, scroll: &mut dyn Scroll, value: &dyn Object) -> Result<()> {
        let items = value.elements().ok_or_else(|| mismatch(&self.target))?;
        write_items(&self.element, scroll, &items)
    }

    fn remove_value(&self, scroll: &mut dyn Scroll) -> Result<Box<dyn Object>> {
        Ok(Box::new(Sequence {
            descriptor: self.target.clone(),
            element:    Arc::clone(&self.element),
            items:      read_items(&self.element, scroll)?,
        }))
    }

    fn remove_into(&self, scroll: &mut dyn Scroll, dest: &mut dyn Object) -> Result<()> {
        if dest.descriptor() != self.target {
            return Err(mismatch(&self.target));
        }
        if let Some(sequence) = dest.as_any_mut().downcast_mut::<Sequence>() {
            return sequence.read_payload(scroll);
        }
        let value = self.remove_value(scroll)?;
        reload(dest, &*value)
    }
}

pub(crate) fn vec_definition(
    target: &TypeDescriptor,
    args: &[Arc<Entry>],
) -> std::result::Result<Arc<dyn Routines>, DispatchError> {
    let [element] = args else {
        return Err(DispatchError::ArityConflict { id: target.id(), existing: 1, requested: args.len() });
    };
    Ok(Arc::new(VecRoutines { target: target.clone(), element: Arc::clone(element) }))
}

// ── Optional ─────────────────────────────────────────────────────────────────

/// An `Option<_>` instantiation read without its Rust type.
#[derive(Debug)]
pub struct Optional {
    descriptor: TypeDescriptor,
    inner:      Arc<Entry>,
    value:      Option<Box<dyn Object>>,
}

impl Optional {
    pub fn value(&self) -> Option<&dyn Object> {
        self.value.as_deref()
    }

    pub fn into_value(self) -> Option<Box<dyn Object>> {
        self.value
    }

    pub fn is_some(&self) -> bool {
        self.value.is_some()
    }
}

fn write_content(inner: &Entry, scroll: &mut dyn Scroll, value: Option<&dyn Object>) -> Result<()> {
    scroll.insert_value(value.is_some())?;
    match value {
        Some(value) => encode(inner, scroll, value),
        None => Ok(()),
    }
}

fn read_content(inner: &Entry, scroll: &mut dyn Scroll) -> Result<Option<Box<dyn Object>>> {
    if scroll.remove_value::<bool>()? {
        inner.remove_value(scroll).map(Some)
    } else {
        Ok(None)
    }
}

impl Object for Optional {
    fn descriptor(&self) -> TypeDescriptor {
        self.descriptor.clone()
    }

    fn lineage(&self) -> Lineage {
        Lineage::default()
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

    fn upcast_to(&self, _to: &TypeDescriptor) -> Option<Box<dyn Object>> {
        None
    }

    fn elements(&self) -> Option<Vec<&dyn Object>> {
        None
    }

    fn content(&self) -> Option<Option<&dyn Object>> {
        Some(self.value.as_deref())
    }

    fn write_payload(&self, scroll: &mut dyn Scroll) -> Result<()> {
        write_content(&self.inner, scroll, self.value.as_deref())
    }

    fn read_payload(&mut self, scroll: &mut dyn Scroll) -> Result<()> {
        self.value = read_content(&self.inner, scroll)?;
        Ok(())
    }
}

struct OptionRoutines {
    target: TypeDescriptor,
    inner:  Arc<Entry>,
}

impl Routines for OptionRoutines {
    fn insert_ref(&self, scroll: &mut dyn Scroll, value: &dyn Object) -> Result<()> {
        let content = value.content().ok_or_else(|| mismatch(&self.target))?;
        write_content(&self.inner, scroll, content)
    }

    fn remove_value(&self, scroll: &mut dyn Scroll) -> Result<Box<dyn Object>> {
        Ok(Box::new(Optional {
            descriptor: self.target.clone(),
            inner:      Arc::clone(&self.inner),
            value:      read_content(&self.inner, scroll)?,
        }))
    }

    fn remove_into(&self, scroll: &mut dyn Scroll, dest: &mut dyn Object) -> Result<()> {
        if dest.descriptor() != self.target {
            return Err(mismatch(&self.target));
        }
        if let Some(optional) = dest.as_any_mut().downcast_mut::<Optional>() {
            return optional.read_payload(scroll);
        }
        let value = self.remove_value(scroll)?;
        reload(dest, &*value)
    }
}

pub(crate) fn option_definition(
    target: &TypeDescriptor,
    args: &[Arc<Entry>],
) -> std::result::Result<Arc<dyn Routines>, DispatchError> {
    let [inner] = args else {
        return Err(DispatchError::ArityConflict { id: target.id(), existing: 1, requested: args.len() });
    };
    Ok(Arc::new(OptionRoutines { target: target.clone(), inner: Arc::clone(inner) }))
}
