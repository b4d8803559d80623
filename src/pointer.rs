//! Single-use position tokens.
//!
//! A [`Pointer`] is a machine-word number plus an optional extension tag that
//! only the producing scroll understands.  Pointers are deliberately not
//! `Clone`: every consuming operation (`Scroll::set_position`) takes the
//! pointer by value, so reusing a consumed pointer does not compile.
//!
//! The remaining misuse cases are checked at run time through the tag:
//! - a pointer from an unrelated scroll carries a foreign family id;
//! - a pointer that predates a structural reorganisation (compaction) carries
//!   a stale generation.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, ScrollError};

// ── Extension tag ─────────────────────────────────────────────────────────────

/// Opaque extension object attached to a [`Pointer`] by its producer.
///
/// Implemented for every `PartialEq + Debug + Send + Sync + 'static` type, so a
/// producer only has to pick a comparable struct.
pub trait PointerTag: Any + Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    /// Value equality across the dyn boundary; false for tags of different types.
    fn eq_tag(&self, other: &dyn PointerTag) -> bool;
}

impl<T: Any + Debug + PartialEq + Send + Sync> PointerTag for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_tag(&self, other: &dyn PointerTag) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |o| o == self)
    }
}

// ── Pointer ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Pointer {
    value: usize,
    tag:   Option<Arc<dyn PointerTag>>,
}

impl Pointer {
    pub fn new(value: usize) -> Self {
        Self { value, tag: None }
    }

    pub fn with_tag<T: PointerTag>(value: usize, tag: T) -> Self {
        Self { value, tag: Some(Arc::new(tag)) }
    }

    pub fn with_shared_tag(value: usize, tag: Arc<dyn PointerTag>) -> Self {
        Self { value, tag: Some(tag) }
    }

    /// Numeric part; meaning is defined by the producing scroll (usually a byte offset).
    pub fn value(&self) -> usize {
        self.value
    }

    pub fn tag(&self) -> Option<&dyn PointerTag> {
        self.tag.as_deref()
    }

    pub fn tag_as<T: 'static>(&self) -> Option<&T> {
        self.tag.as_deref().and_then(|t| t.as_any().downcast_ref::<T>())
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        if self.value != other.value {
            return false;
        }
        match (&self.tag, &other.tag) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.eq_tag(&**b),
            _ => false,
        }
    }
}

impl Eq for Pointer {}

// ── Scroll tag ────────────────────────────────────────────────────────────────

/// The tag attached by every scroll in this crate.
///
/// `family` is shared by a scroll and all of its duplicates; `generation` is
/// bumped whenever the scroll reorganises storage; `sector` is the sector
/// number the value refers to (`0` for single-buffer scrolls).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScrollTag {
    pub family:     Uuid,
    pub generation: u64,
    pub sector:     i32,
}

impl ScrollTag {
    pub fn new_family() -> Uuid {
        Uuid::new_v4()
    }

    /// Extract the tag of `ptr`, verifying it was produced by `family`.
    pub fn of(ptr: &Pointer, family: Uuid) -> Result<ScrollTag> {
        let tag = ptr
            .tag_as::<ScrollTag>()
            .ok_or(ScrollError::InvalidPointer("pointer carries no scroll tag"))?;
        if tag.family != family {
            return Err(ScrollError::InvalidPointer("pointer belongs to another scroll"));
        }
        Ok(*tag)
    }

    /// Like [`ScrollTag::of`] but also rejects pointers from an older generation.
    pub fn current(ptr: &Pointer, family: Uuid, generation: u64) -> Result<ScrollTag> {
        let tag = Self::of(ptr, family)?;
        if tag.generation != generation {
            return Err(ScrollError::InvalidPointer("pointer invalidated by storage reorganisation"));
        }
        Ok(tag)
    }
}
