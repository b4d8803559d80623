//! Type identities and polymorphic dispatch.
//!
//! # Identity rules
//! Every encodable type is identified by a 16-byte [`TypeIdentifier`].  A
//! generic type is identified by its definition's identifier followed by the
//! identities of its arguments, recursively, flattened into one sequence:
//!
//! ```text
//! Vec<Option<u32>>  →  [VEC, OPTION, U32]
//! ```
//!
//! Decoding needs each definition's arity, which the [`DispatchTable`] keeps.
//! The nil identifier encodes a null type (a null object).
//!
//! Identifiers are permanent: once written to storage an identifier is never
//! reassigned to another type.

pub mod generic;
pub mod object;
pub mod table;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use std::fmt;
use uuid::Uuid;

use crate::encoding::{Fixed, Scrollable};
use crate::error::Result;
use crate::scroll::{Scroll, ScrollExt};

pub use generic::{Optional, Sequence};
pub use object::{Object, ObjectExt, SkipToken};
pub use table::{DispatchError, DispatchTable, Entry, GenericFactory, Routines, Slot};

// ── Identifier ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIdentifier(Uuid);

impl TypeIdentifier {
    /// Identity of the null type.
    pub const NULL: TypeIdentifier = TypeIdentifier(Uuid::nil());

    pub const fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for TypeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frozen identifiers of the built-in types.
pub mod well_known {
    use super::TypeIdentifier;

    pub const BOOL:     TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0001_0000_4000_8000_5343_524f_4c4c);
    pub const U8:       TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0002_0000_4000_8000_5343_524f_4c4c);
    pub const I8:       TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0003_0000_4000_8000_5343_524f_4c4c);
    pub const U16:      TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0004_0000_4000_8000_5343_524f_4c4c);
    pub const I16:      TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0005_0000_4000_8000_5343_524f_4c4c);
    pub const U32:      TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0006_0000_4000_8000_5343_524f_4c4c);
    pub const I32:      TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0007_0000_4000_8000_5343_524f_4c4c);
    pub const U64:      TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0008_0000_4000_8000_5343_524f_4c4c);
    pub const I64:      TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0009_0000_4000_8000_5343_524f_4c4c);
    pub const U128:     TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_000a_0000_4000_8000_5343_524f_4c4c);
    pub const I128:     TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_000b_0000_4000_8000_5343_524f_4c4c);
    pub const F32:      TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_000c_0000_4000_8000_5343_524f_4c4c);
    pub const F64:      TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_000d_0000_4000_8000_5343_524f_4c4c);
    pub const CHAR:     TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_000e_0000_4000_8000_5343_524f_4c4c);
    pub const STRING:   TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0010_0000_4000_8000_5343_524f_4c4c);
    pub const UUID:     TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0011_0000_4000_8000_5343_524f_4c4c);
    pub const DATETIME: TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0012_0000_4000_8000_5343_524f_4c4c);
    pub const BIGINT:   TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0013_0000_4000_8000_5343_524f_4c4c);

    /// `Option<_>` definition, one argument.
    pub const OPTION:   TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0100_0000_4000_8000_5343_524f_4c4c);
    /// `Vec<_>` definition, one argument.
    pub const VEC:      TypeIdentifier = TypeIdentifier::from_u128(0x5c7a_0101_0000_4000_8000_5343_524f_4c4c);
}

// ── Descriptor ───────────────────────────────────────────────────────────────

/// Deepest generic nesting accepted when decoding a descriptor.
pub const MAX_DESCRIPTOR_DEPTH: usize = 64;

/// Closed type: a definition plus its (closed) arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    id:   TypeIdentifier,
    args: Vec<TypeDescriptor>,
}

impl TypeDescriptor {
    pub fn new(id: TypeIdentifier) -> Self {
        Self { id, args: Vec::new() }
    }

    pub fn generic(id: TypeIdentifier, args: Vec<TypeDescriptor>) -> Self {
        Self { id, args }
    }

    pub fn null() -> Self {
        Self::new(TypeIdentifier::NULL)
    }

    pub fn of<T: Typed>() -> Self {
        T::type_descriptor()
    }

    pub fn id(&self) -> TypeIdentifier {
        self.id
    }

    pub fn args(&self) -> &[TypeDescriptor] {
        &self.args
    }

    pub fn is_null(&self) -> bool {
        self.id.is_null()
    }

    /// Pre-order identifier sequence.
    pub fn flatten(&self) -> Vec<TypeIdentifier> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<TypeIdentifier>) {
        out.push(self.id);
        for arg in &self.args {
            arg.flatten_into(out);
        }
    }

    /// Rebuild a descriptor from a flattened sequence, asking `arity` how many
    /// arguments each definition takes.  The null identifier takes none.
    /// Nesting deeper than [`MAX_DESCRIPTOR_DEPTH`] is rejected.
    pub fn unflatten<I, F>(ids: &mut I, arity: &F) -> std::result::Result<Self, DispatchError>
    where
        I: Iterator<Item = TypeIdentifier>,
        F: Fn(TypeIdentifier) -> std::result::Result<usize, DispatchError>,
    {
        Self::unflatten_at(ids, arity, 0)
    }

    fn unflatten_at<I, F>(ids: &mut I, arity: &F, depth: usize) -> std::result::Result<Self, DispatchError>
    where
        I: Iterator<Item = TypeIdentifier>,
        F: Fn(TypeIdentifier) -> std::result::Result<usize, DispatchError>,
    {
        let id = ids.next().ok_or(DispatchError::TruncatedDescriptor)?;
        if id.is_null() {
            return Ok(Self::null());
        }
        let count = arity(id)?;
        if count > 0 && depth >= MAX_DESCRIPTOR_DEPTH {
            return Err(DispatchError::DescriptorTooDeep { limit: MAX_DESCRIPTOR_DEPTH });
        }
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(Self::unflatten_at(ids, arity, depth + 1)?);
        }
        Ok(Self { id, args })
    }

    /// Every (definition, arity) pair in this descriptor.
    pub(crate) fn definitions(&self) -> Vec<(TypeIdentifier, usize)> {
        let mut out = vec![(self.id, self.args.len())];
        for arg in &self.args {
            out.extend(arg.definitions());
        }
        out
    }

    /// Write the identifier sequence.
    pub fn write_to<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()> {
        for id in self.flatten() {
            scroll.insert_value(id.as_uuid())?;
        }
        Ok(())
    }

    /// Read an identifier sequence, resolving arities through `table`.
    /// Nesting deeper than [`MAX_DESCRIPTOR_DEPTH`] is rejected.
    pub fn read_from<S: Scroll + ?Sized>(scroll: &mut S, table: &DispatchTable) -> Result<Self> {
        Self::read_at(scroll, table, 0)
    }

    fn read_at<S: Scroll + ?Sized>(scroll: &mut S, table: &DispatchTable, depth: usize) -> Result<Self> {
        let id = TypeIdentifier(scroll.remove_value::<Uuid>()?);
        if id.is_null() {
            return Ok(Self::null());
        }
        let count = table.arity(id)?;
        if count > 0 && depth >= MAX_DESCRIPTOR_DEPTH {
            return Err(DispatchError::DescriptorTooDeep { limit: MAX_DESCRIPTOR_DEPTH }.into());
        }
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(Self::read_at(scroll, table, depth + 1)?);
        }
        Ok(Self { id, args })
    }
}

/// Arities are resolved through [`DispatchTable::global`].
impl Scrollable for TypeDescriptor {
    fn insert_into<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()> {
        self.write_to(scroll)
    }

    fn remove_from<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Self> {
        Self::read_from(scroll, DispatchTable::global())
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("null");
        }
        write!(f, "{}", self.id)?;
        if !self.args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

// ── Typed ────────────────────────────────────────────────────────────────────

/// A type with a stable identity, optionally related to base types and
/// interfaces that dispatch may fall back to.
pub trait Typed: Send + Sync + 'static {
    fn type_descriptor() -> TypeDescriptor
    where
        Self: Sized;

    /// Base types, nearest first.
    fn bases() -> Vec<TypeDescriptor>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Implemented interfaces, in declaration order.
    fn interfaces() -> Vec<TypeDescriptor>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// View of `self` as the base type or interface `to`, used when dispatch
    /// resolved to one of those.  The returned value must be the concrete type
    /// registered for `to`.
    fn upcast(&self, to: &TypeDescriptor) -> Option<Box<dyn Object>> {
        let _ = to;
        None
    }

    /// Elements of a sequence, for routines built from a generic definition.
    fn elements(&self) -> Option<Vec<&dyn Object>> {
        None
    }

    /// Content of an optional value, `Some(None)` when absent.
    fn content(&self) -> Option<Option<&dyn Object>> {
        None
    }
}

macro_rules! typed_builtin {
    ($($t:ty => $id:ident),* $(,)?) => {$(
        impl Typed for $t {
            fn type_descriptor() -> TypeDescriptor {
                TypeDescriptor::new(well_known::$id)
            }
        }
    )*};
}

typed_builtin! {
    bool => BOOL, u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32, i32 => I32,
    u64 => U64, i64 => I64, u128 => U128, i128 => I128, f32 => F32, f64 => F64,
    char => CHAR, String => STRING, Uuid => UUID, DateTime<Utc> => DATETIME, BigInt => BIGINT,
}

impl<T: Typed + Fixed + Scrollable + fmt::Debug> Typed for Option<T> {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::generic(well_known::OPTION, vec![T::type_descriptor()])
    }

    fn content(&self) -> Option<Option<&dyn Object>> {
        Some(self.as_ref().map(|value| value as &dyn Object))
    }
}

impl<T: Typed + Scrollable + fmt::Debug> Typed for Vec<T> {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::generic(well_known::VEC, vec![T::type_descriptor()])
    }

    fn elements(&self) -> Option<Vec<&dyn Object>> {
        Some(self.iter().map(|item| item as &dyn Object).collect())
    }
}
