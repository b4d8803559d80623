//! Dispatch table: per-type routines resolved from registered candidates.
//!
//! # Resolution
//! Every registered candidate fills one [`Slot`] (insert or remove, by value
//! or by reference) for one target type, optionally scoped to one concrete
//! scroll implementation.  Resolving a (scroll type, descriptor) pair walks
//! the search order (the type itself, then its bases and interfaces as the
//! [`ResolutionPolicy`] dictates) and stops at the first target that has any
//! candidate.  For that target every slot must be filled by exactly one
//! candidate; a scoped candidate shadows generic ones.  Duplicates and gaps
//! are configuration errors and are never papered over.
//!
//! A closed generic type with no candidates of its own is instantiated from
//! its definition: the arguments are resolved first and a [`GenericFactory`]
//! registered for the definition builds routines over them.  `Option<_>` and
//! `Vec<_>` are defined this way out of the box, so `Vec<Vec<String>>` needs
//! no registration.
//!
//! Resolved entries are cached per (scroll type, descriptor).  Concurrent
//! first use is settled by insert-if-absent, so every caller observes the
//! same [`Entry`].

use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, trace, warn};

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use uuid::Uuid;

use super::generic;
use super::object::{reload, Object};
use super::{well_known, TypeDescriptor, TypeIdentifier, Typed};
use crate::config::{ResolutionPolicy, ScrollOptions};
use crate::encoding::Scrollable;
use crate::error::Result;
use crate::scroll::{Scroll, ScrollExt};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No dispatch entry for {0}")]
    NotRegistered(TypeDescriptor),

    #[error("{count} candidates for the {slot} slot of {descriptor}")]
    Ambiguous { descriptor: TypeDescriptor, slot: Slot, count: usize },

    #[error("No candidate for the {slot} slot of {descriptor}")]
    MissingSlot { descriptor: TypeDescriptor, slot: Slot },

    #[error("Unknown type identifier {0}")]
    UnknownIdentifier(TypeIdentifier),

    #[error("Value is not of the type handled by the routine for {expected}")]
    TypeMismatch { expected: TypeDescriptor },

    #[error("Identifier {id} already defined with {existing} argument(s), not {requested}")]
    ArityConflict { id: TypeIdentifier, existing: usize, requested: usize },

    #[error("Type descriptor ended before all arguments were read")]
    TruncatedDescriptor,

    #[error("Type descriptor nests generic arguments deeper than {limit}")]
    DescriptorTooDeep { limit: usize },

    #[error("{count} generic definitions registered for {id}")]
    AmbiguousDefinition { id: TypeIdentifier, count: usize },
}

// ── Slots and routines ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    InsertValue,
    InsertRef,
    RemoveValue,
    RemoveInto,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::InsertValue, Slot::InsertRef, Slot::RemoveValue, Slot::RemoveInto];

    pub fn name(self) -> &'static str {
        match self {
            Slot::InsertValue => "insert-by-value",
            Slot::InsertRef   => "insert-by-reference",
            Slot::RemoveValue => "remove-by-value",
            Slot::RemoveInto  => "remove-into",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type InsertValueFn = fn(&mut dyn Scroll, Box<dyn Object>) -> Result<()>;
pub type InsertRefFn   = fn(&mut dyn Scroll, &dyn Object) -> Result<()>;
pub type RemoveValueFn = fn(&mut dyn Scroll) -> Result<Box<dyn Object>>;
pub type RemoveIntoFn  = fn(&mut dyn Scroll, &mut dyn Object) -> Result<()>;

/// One candidate routine.  The variant names the slot it fills.
#[derive(Clone, Copy)]
pub enum Routine {
    InsertValue(InsertValueFn),
    InsertRef(InsertRefFn),
    RemoveValue(RemoveValueFn),
    RemoveInto(RemoveIntoFn),
}

impl Routine {
    pub fn slot(&self) -> Slot {
        match self {
            Routine::InsertValue(_) => Slot::InsertValue,
            Routine::InsertRef(_)   => Slot::InsertRef,
            Routine::RemoveValue(_) => Slot::RemoveValue,
            Routine::RemoveInto(_)  => Slot::RemoveInto,
        }
    }

    /// The four generic routines of `T`, in [`Slot::ALL`] order.
    pub fn all_of<T: Typed + Scrollable + fmt::Debug>() -> [Routine; 4] {
        [
            Routine::InsertValue(insert_value::<T>),
            Routine::InsertRef(insert_ref::<T>),
            Routine::RemoveValue(remove_value::<T>),
            Routine::RemoveInto(remove_into::<T>),
        ]
    }
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Routine({})", self.slot())
    }
}

fn mismatch<T: Typed>() -> DispatchError {
    DispatchError::TypeMismatch { expected: T::type_descriptor() }
}

/// Values of another Rust type with the same descriptor (a dynamically
/// decoded sequence, say) are accepted through their own encoding.
fn insert_ref<T: Typed + Scrollable + fmt::Debug>(scroll: &mut dyn Scroll, value: &dyn Object) -> Result<()> {
    match value.downcast_ref::<T>() {
        Some(value) => scroll.insert(value),
        None if value.descriptor() == T::type_descriptor() => value.write_payload(scroll),
        None => Err(mismatch::<T>().into()),
    }
}

fn insert_value<T: Typed + Scrollable + fmt::Debug>(scroll: &mut dyn Scroll, value: Box<dyn Object>) -> Result<()> {
    insert_ref::<T>(scroll, &*value)
}

fn remove_value<T: Typed + Scrollable + fmt::Debug>(scroll: &mut dyn Scroll) -> Result<Box<dyn Object>> {
    Ok(Box::new(scroll.remove::<T>()?))
}

fn remove_into<T: Typed + Scrollable + fmt::Debug>(scroll: &mut dyn Scroll, dest: &mut dyn Object) -> Result<()> {
    if let Some(dest) = dest.as_any_mut().downcast_mut::<T>() {
        return scroll.remove_into(dest);
    }
    if dest.descriptor() != T::type_descriptor() {
        return Err(mismatch::<T>().into());
    }
    let value = scroll.remove::<T>()?;
    reload(dest, &value)
}

/// The four routines behind an [`Entry`].
///
/// Closed types get theirs from registered candidates; generic definitions
/// build them with a [`GenericFactory`].
pub trait Routines: Send + Sync {
    fn insert_ref(&self, scroll: &mut dyn Scroll, value: &dyn Object) -> Result<()>;

    fn insert_value(&self, scroll: &mut dyn Scroll, value: Box<dyn Object>) -> Result<()> {
        self.insert_ref(scroll, &*value)
    }

    fn remove_value(&self, scroll: &mut dyn Scroll) -> Result<Box<dyn Object>>;

    fn remove_into(&self, scroll: &mut dyn Scroll, dest: &mut dyn Object) -> Result<()>;
}

/// One candidate per slot, as chosen by [`select`].
struct Selected {
    insert_value: InsertValueFn,
    insert_ref:   InsertRefFn,
    remove_value: RemoveValueFn,
    remove_into:  RemoveIntoFn,
}

impl Routines for Selected {
    fn insert_ref(&self, scroll: &mut dyn Scroll, value: &dyn Object) -> Result<()> {
        (self.insert_ref)(scroll, value)
    }

    fn insert_value(&self, scroll: &mut dyn Scroll, value: Box<dyn Object>) -> Result<()> {
        (self.insert_value)(scroll, value)
    }

    fn remove_value(&self, scroll: &mut dyn Scroll) -> Result<Box<dyn Object>> {
        (self.remove_value)(scroll)
    }

    fn remove_into(&self, scroll: &mut dyn Scroll, dest: &mut dyn Object) -> Result<()> {
        (self.remove_into)(scroll, dest)
    }
}

/// Builds the routines of one instantiation of a generic definition from the
/// resolved entries of its arguments.  `target` carries the arguments as
/// resolved, which may be base types of the requested ones.
pub type GenericFactory =
    fn(target: &TypeDescriptor, args: &[Arc<Entry>]) -> std::result::Result<Arc<dyn Routines>, DispatchError>;

// ── Entry ────────────────────────────────────────────────────────────────────

/// Resolved routines for one (scroll type, descriptor) pair.
pub struct Entry {
    target:   TypeDescriptor,
    routines: Arc<dyn Routines>,
}

impl Entry {
    pub fn new(target: TypeDescriptor, routines: Arc<dyn Routines>) -> Self {
        Self { target, routines }
    }

    /// The type whose routines were selected.  Differs from the requested
    /// descriptor when resolution fell back to a base type or interface.
    pub fn target(&self) -> &TypeDescriptor {
        &self.target
    }

    pub fn insert_value(&self, scroll: &mut dyn Scroll, value: Box<dyn Object>) -> Result<()> {
        self.routines.insert_value(scroll, value)
    }

    pub fn insert_ref(&self, scroll: &mut dyn Scroll, value: &dyn Object) -> Result<()> {
        self.routines.insert_ref(scroll, value)
    }

    pub fn remove_value(&self, scroll: &mut dyn Scroll) -> Result<Box<dyn Object>> {
        self.routines.remove_value(scroll)
    }

    pub fn remove_into(&self, scroll: &mut dyn Scroll, dest: &mut dyn Object) -> Result<()> {
        self.routines.remove_into(scroll, dest)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("target", &self.target).finish_non_exhaustive()
    }
}

// ── Lineage ──────────────────────────────────────────────────────────────────

/// Base types (nearest first) and interfaces of a type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub bases:      Vec<TypeDescriptor>,
    pub interfaces: Vec<TypeDescriptor>,
}

impl Lineage {
    pub fn of<T: Typed>() -> Self {
        Self { bases: T::bases(), interfaces: T::interfaces() }
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty() && self.interfaces.is_empty()
    }
}

// ── Table ────────────────────────────────────────────────────────────────────

struct Candidate {
    target:  TypeDescriptor,
    scope:   Option<TypeId>,
    routine: Routine,
}

struct Definition {
    id:      TypeIdentifier,
    factory: GenericFactory,
}

type CacheKey = (TypeId, TypeDescriptor);

pub struct DispatchTable {
    candidates: RwLock<Vec<Candidate>>,
    generics:   RwLock<Vec<Definition>>,
    lineage:    RwLock<HashMap<TypeDescriptor, Lineage>>,
    arities:    RwLock<HashMap<TypeIdentifier, usize>>,
    cache:      RwLock<HashMap<CacheKey, Arc<Entry>>>,
    scans:      AtomicU64,
    policy:     ResolutionPolicy,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("candidates", &self.candidates.read().len())
            .field("generics", &self.generics.read().len())
            .field("cached", &self.cache.read().len())
            .field("policy", &self.policy)
            .finish()
    }
}

static GLOBAL: OnceLock<DispatchTable> = OnceLock::new();

impl DispatchTable {
    /// An empty table: no candidates, no defined identifiers.
    pub fn new() -> Self {
        Self {
            candidates: RwLock::new(Vec::new()),
            generics:   RwLock::new(Vec::new()),
            lineage:    RwLock::new(HashMap::new()),
            arities:    RwLock::new(HashMap::new()),
            cache:      RwLock::new(HashMap::new()),
            scans:      AtomicU64::new(0),
            policy:     ResolutionPolicy::default(),
        }
    }

    /// A table with every built-in scalar registered and the `Option<_>` /
    /// `Vec<_>` generic definitions in place.
    pub fn with_builtins() -> Self {
        let table = Self::new();
        table.register_builtin::<bool>();
        table.register_builtin::<u8>();
        table.register_builtin::<i8>();
        table.register_builtin::<u16>();
        table.register_builtin::<i16>();
        table.register_builtin::<u32>();
        table.register_builtin::<i32>();
        table.register_builtin::<u64>();
        table.register_builtin::<i64>();
        table.register_builtin::<u128>();
        table.register_builtin::<i128>();
        table.register_builtin::<f32>();
        table.register_builtin::<f64>();
        table.register_builtin::<char>();
        table.register_builtin::<String>();
        table.register_builtin::<Uuid>();
        table.register_builtin::<DateTime<Utc>>();
        table.register_builtin::<BigInt>();
        table.register_builtin_generic(well_known::OPTION, generic::option_definition);
        table.register_builtin_generic(well_known::VEC, generic::vec_definition);
        table
    }

    /// Built-ins plus the resolution policy from `options`.
    pub fn from_options(options: &ScrollOptions) -> Self {
        Self::with_builtins().with_resolution(options.resolution)
    }

    pub fn with_resolution(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self.cache.get_mut().clear();
        self
    }

    /// The process-wide registry, created with the built-ins on first use.
    pub fn global() -> &'static DispatchTable {
        GLOBAL.get_or_init(DispatchTable::with_builtins)
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Register the four generic routines of `T` and record its lineage.
    /// Registering a type twice makes its slots ambiguous.
    pub fn register<T: Typed + Scrollable + fmt::Debug>(&self) -> std::result::Result<(), DispatchError> {
        let target = T::type_descriptor();
        self.record_arities(&target)?;
        self.record_lineage(&target, Lineage::of::<T>())?;
        debug!(target = %target, "register dispatch routines");
        self.push(Routine::all_of::<T>().map(|routine| Candidate {
            target: target.clone(),
            scope: None,
            routine,
        }));
        Ok(())
    }

    /// Register a single candidate.  `scope` restricts it to one concrete
    /// scroll implementation (see [`Scroll::scroll_type_id`]).
    pub fn register_slot(
        &self,
        target: TypeDescriptor,
        routine: Routine,
        scope: Option<TypeId>,
    ) -> std::result::Result<(), DispatchError> {
        self.record_arities(&target)?;
        debug!(target = %target, slot = %routine.slot(), scoped = scope.is_some(), "register dispatch slot");
        self.push([Candidate { target, scope, routine }]);
        Ok(())
    }

    /// Record the lineage of `T` without registering routines for it, so
    /// values of `T` resolve through its bases or interfaces.
    pub fn declare<T: Typed>(&self) -> std::result::Result<(), DispatchError> {
        let target = T::type_descriptor();
        self.record_arities(&target)?;
        self.record_lineage(&target, Lineage::of::<T>())
    }

    /// Register the routine factory of generic definition `id`, taking `arity`
    /// arguments.  Every closed instantiation without candidates of its own
    /// resolves through it.  Two factories for one definition are ambiguous.
    pub fn register_generic(
        &self,
        id: TypeIdentifier,
        arity: usize,
        factory: GenericFactory,
    ) -> std::result::Result<(), DispatchError> {
        self.define(id, arity)?;
        debug!(id = %id, arity, "register generic definition");
        self.generics.write().push(Definition { id, factory });
        self.cache.write().clear();
        Ok(())
    }

    /// Define the number of arguments taken by identifier `id`.
    pub fn define(&self, id: TypeIdentifier, arity: usize) -> std::result::Result<(), DispatchError> {
        let mut arities = self.arities.write();
        match arities.get(&id) {
            Some(&existing) if existing != arity => {
                Err(DispatchError::ArityConflict { id, existing, requested: arity })
            }
            Some(_) => Ok(()),
            None => {
                arities.insert(id, arity);
                Ok(())
            }
        }
    }

    pub fn arity(&self, id: TypeIdentifier) -> std::result::Result<usize, DispatchError> {
        if id.is_null() {
            return Ok(0);
        }
        self.arities.read().get(&id).copied().ok_or(DispatchError::UnknownIdentifier(id))
    }

    fn register_builtin<T: Typed + Scrollable + fmt::Debug>(&self) {
        let target = T::type_descriptor();
        self.arities.write().insert(target.id(), 0);
        self.push(Routine::all_of::<T>().map(|routine| Candidate {
            target: target.clone(),
            scope: None,
            routine,
        }));
    }

    fn register_builtin_generic(&self, id: TypeIdentifier, factory: GenericFactory) {
        self.arities.write().insert(id, 1);
        self.generics.write().push(Definition { id, factory });
    }

    fn record_arities(&self, descriptor: &TypeDescriptor) -> std::result::Result<(), DispatchError> {
        for (id, arity) in descriptor.definitions() {
            if !id.is_null() {
                self.define(id, arity)?;
            }
        }
        Ok(())
    }

    fn record_lineage(&self, target: &TypeDescriptor, lineage: Lineage) -> std::result::Result<(), DispatchError> {
        for related in lineage.bases.iter().chain(&lineage.interfaces) {
            self.record_arities(related)?;
        }
        if !lineage.is_empty() {
            self.lineage.write().insert(target.clone(), lineage);
            self.cache.write().clear();
        }
        Ok(())
    }

    fn push<I: IntoIterator<Item = Candidate>>(&self, candidates: I) {
        self.candidates.write().extend(candidates);
        self.cache.write().clear();
    }

    // ── Resolution ───────────────────────────────────────────────────────────

    /// Number of candidate scans performed.  Cached resolutions do not scan.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Routines for values of `descriptor` written to or read from a scroll
    /// whose concrete type is `scroll_type`.
    pub fn resolve(&self, scroll_type: TypeId, descriptor: &TypeDescriptor) -> std::result::Result<Arc<Entry>, DispatchError> {
        let key = (scroll_type, descriptor.clone());
        if let Some(entry) = self.cache.read().get(&key) {
            return Ok(Arc::clone(entry));
        }

        let entry = Arc::new(self.scan(scroll_type, descriptor)?);
        let mut cache = self.cache.write();
        Ok(Arc::clone(cache.entry(key).or_insert(entry)))
    }

    /// Resolve the runtime type of `value`, learning its lineage first.
    pub fn resolve_value(&self, scroll_type: TypeId, value: &dyn Object) -> std::result::Result<Arc<Entry>, DispatchError> {
        let descriptor = value.descriptor();
        let known = self.lineage.read().contains_key(&descriptor);
        if !known {
            self.record_lineage(&descriptor, value.lineage())?;
        }
        self.resolve(scroll_type, &descriptor)
    }

    fn search_order(&self, descriptor: &TypeDescriptor) -> Vec<TypeDescriptor> {
        let mut order = vec![descriptor.clone()];
        let lineage = self.lineage.read();
        let Some(lineage) = lineage.get(descriptor) else {
            return order;
        };
        match self.policy {
            ResolutionPolicy::ExactOnly => {}
            ResolutionPolicy::BasesThenInterfaces => {
                order.extend(lineage.bases.iter().cloned());
                order.extend(lineage.interfaces.iter().cloned());
            }
            ResolutionPolicy::InterfacesThenBases => {
                order.extend(lineage.interfaces.iter().cloned());
                order.extend(lineage.bases.iter().cloned());
            }
        }
        order
    }

    fn scan(&self, scroll_type: TypeId, descriptor: &TypeDescriptor) -> std::result::Result<Entry, DispatchError> {
        self.scans.fetch_add(1, Ordering::Relaxed);

        for target in self.search_order(descriptor) {
            if let Some(selected) = self.select_closed(scroll_type, descriptor, &target)? {
                return Ok(Entry::new(target, Arc::new(selected)));
            }
            if let Some(entry) = self.instantiate(scroll_type, &target)? {
                return Ok(entry);
            }
        }
        Err(DispatchError::NotRegistered(descriptor.clone()))
    }

    /// Routines registered for exactly `target`, if it has any candidate.
    fn select_closed(
        &self,
        scroll_type: TypeId,
        requested: &TypeDescriptor,
        target: &TypeDescriptor,
    ) -> std::result::Result<Option<Selected>, DispatchError> {
        let candidates = self.candidates.read();
        let matching: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.target == *target && c.scope.map_or(true, |s| s == scroll_type))
            .collect();
        if matching.is_empty() {
            return Ok(None);
        }
        trace!(requested = %requested, target = %target, candidates = matching.len(), "dispatch scan");

        Ok(Some(Selected {
            insert_value: select(&matching, target, Slot::InsertValue, |r| match r {
                Routine::InsertValue(f) => Some(*f),
                _ => None,
            })?,
            insert_ref: select(&matching, target, Slot::InsertRef, |r| match r {
                Routine::InsertRef(f) => Some(*f),
                _ => None,
            })?,
            remove_value: select(&matching, target, Slot::RemoveValue, |r| match r {
                Routine::RemoveValue(f) => Some(*f),
                _ => None,
            })?,
            remove_into: select(&matching, target, Slot::RemoveInto, |r| match r {
                Routine::RemoveInto(f) => Some(*f),
                _ => None,
            })?,
        }))
    }

    /// Routines for `target` built from its generic definition.  Arguments
    /// resolve (and are cached) like any other type; no lock is held while
    /// they do.
    fn instantiate(&self, scroll_type: TypeId, target: &TypeDescriptor) -> std::result::Result<Option<Entry>, DispatchError> {
        if target.args().is_empty() {
            return Ok(None);
        }
        let factory = {
            let generics = self.generics.read();
            let mut found = generics.iter().filter(|d| d.id == target.id());
            let Some(definition) = found.next() else {
                return Ok(None);
            };
            let others = found.count();
            if others > 0 {
                warn!(id = %target.id(), count = others + 1, "ambiguous generic definitions");
                return Err(DispatchError::AmbiguousDefinition { id: target.id(), count: others + 1 });
            }
            definition.factory
        };

        let args = target
            .args()
            .iter()
            .map(|arg| self.resolve(scroll_type, arg))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let resolved = TypeDescriptor::generic(target.id(), args.iter().map(|a| a.target().clone()).collect());
        trace!(requested = %target, resolved = %resolved, "instantiate generic definition");
        let routines = factory(&resolved, &args)?;
        Ok(Some(Entry::new(resolved, routines)))
    }
}

/// Exactly one routine for `slot`: scoped candidates first, then generic ones.
fn select<F: Copy>(
    matching: &[&Candidate],
    target: &TypeDescriptor,
    slot: Slot,
    extract: impl Fn(&Routine) -> Option<F>,
) -> std::result::Result<F, DispatchError> {
    for scoped in [true, false] {
        let tier: Vec<F> = matching
            .iter()
            .filter(|c| c.scope.is_some() == scoped)
            .filter_map(|c| extract(&c.routine))
            .collect();
        match tier.len() {
            0 => continue,
            1 => return Ok(tier[0]),
            count => {
                warn!(target = %target, slot = %slot, count, "ambiguous dispatch candidates");
                return Err(DispatchError::Ambiguous { descriptor: target.clone(), slot, count });
            }
        }
    }
    Err(DispatchError::MissingSlot { descriptor: target.clone(), slot })
}
