// ============================================================================
// reactive-core - Type Definitions
// Type-erased traits and base cell storage for the reactive graph
// ============================================================================
//
// Graph operations (mark dirty, check the clock, track deps, propagate
// LOADING/ERROR) don't need to know the cell's value type T. Only reading
// or writing the value does. So heterogeneous storage uses:
//   Vec<Rc<dyn AnySource>>   for dependency lists
//   Vec<Weak<dyn AnyReaction>> for observer lists
// while the concrete SourceInner<T> / DerivedInner<T> hold the actual value
// and implement these traits for graph bookkeeping.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::rc::{Rc, Weak};

use super::constants::*;

/// Type-erased, reference-counted user error as stored on a cell.
pub type ErrorPayload = Rc<dyn StdError>;

/// Type-erased source interface for reactive graph operations.
///
/// Implemented by both `SourceInner<T>` (signals) and `DerivedInner<T>`
/// (derived computations). Enables storing different cell types in the
/// same dependency/observer collection.
pub trait AnySource: Any {
    /// Get the flags bitmask.
    fn flags(&self) -> u32;

    /// Set the flags bitmask.
    fn set_flags(&self, flags: u32);

    /// Get the write version (bumped whenever the stored value changes).
    fn write_version(&self) -> u32;

    /// Set the write version.
    fn set_write_version(&self, version: u32);

    /// Get the read version (used to dedupe dependency registration within
    /// a single compute).
    fn read_version(&self) -> u32;

    /// Set the read version.
    fn set_read_version(&self, version: u32);

    /// Number of observers currently depending on this source.
    fn reaction_count(&self) -> usize;

    /// Register an observer that depends on this source.
    fn add_reaction(&self, reaction: Weak<dyn AnyReaction>);

    /// Drop dead (already-dropped) observers from the list.
    fn cleanup_dead_reactions(&self);

    /// Iterate live observers; the callback may return `false` to stop.
    fn for_each_reaction(&self, f: &mut dyn FnMut(Rc<dyn AnyReaction>) -> bool);

    /// Remove a specific observer (used when a read no longer depends on
    /// this source after a recompute).
    fn remove_reaction(&self, reaction: &Rc<dyn AnyReaction>);

    /// Disconnect all observers (used when a source is disposed).
    fn clear_reactions(&self);

    /// Debug name, if one was given at construction.
    fn name(&self) -> Option<Rc<str>> {
        None
    }

    /// Clock tick at which this cell was created.
    fn created_at(&self) -> u64 {
        0
    }

    /// The captured error, valid iff the ERROR bit is set.
    fn error(&self) -> Option<ErrorPayload> {
        None
    }

    fn is_derived(&self) -> bool {
        self.flags() & DERIVED != 0
    }

    fn is_dirty(&self) -> bool {
        self.flags() & DIRTY != 0
    }

    fn is_check(&self) -> bool {
        self.flags() & CHECK != 0
    }

    fn is_clean(&self) -> bool {
        self.flags() & CLEAN != 0
    }

    fn is_loading(&self) -> bool {
        self.flags() & LOADING != 0
    }

    fn is_error(&self) -> bool {
        self.flags() & ERROR != 0
    }

    /// Mark dirty: known out of date, clearing CHECK/CLEAN.
    fn mark_dirty(&self) {
        let flags = (self.flags() & STATUS_MASK) | DIRTY;
        self.set_flags(flags);
    }

    /// Mark check-pending: an upstream changed identity but may still
    /// compare equal once recomputed.
    fn mark_check(&self) {
        let flags = (self.flags() & STATUS_MASK) | CHECK;
        self.set_flags(flags);
    }

    /// Mark clean: value and all sources are current.
    fn mark_clean(&self) {
        let flags = (self.flags() & STATUS_MASK) | CLEAN;
        self.set_flags(flags);
    }

    fn mark_loading(&self) {
        self.set_flags(self.flags() | LOADING);
    }

    fn clear_loading(&self) {
        self.set_flags(self.flags() & !LOADING);
    }

    fn mark_error(&self) {
        self.set_flags(self.flags() | ERROR);
    }

    fn clear_error(&self) {
        self.set_flags(self.flags() & !ERROR);
    }

    fn mark_destroyed(&self) {
        self.set_flags(self.flags() | DESTROYED);
    }

    fn is_destroyed(&self) -> bool {
        self.flags() & DESTROYED != 0
    }

    /// Upcast for downcasting back to a concrete cell type.
    fn as_any(&self) -> &dyn Any;

    /// If this source is also an observer (i.e. a derived computation),
    /// return it as an `AnyReaction`. Enables the CHECK-chain validation
    /// walk in `primitives::derived::update_chain`.
    ///
    /// `None` for plain signals, which are never observers themselves.
    fn as_derived_reaction(&self) -> Option<Rc<dyn AnyReaction>> {
        None
    }
}

/// Type-erased observer interface for scheduling and recomputation.
///
/// Implemented by `DerivedInner<T>` (derived computations) and `EffectInner`
/// (effects). An `AnyReaction` is anything notified when its sources change.
pub trait AnyReaction: Any {
    fn flags(&self) -> u32;
    fn set_flags(&self, flags: u32);

    /// Number of sources this reaction currently reads from.
    fn dep_count(&self) -> usize;

    /// Record a source read during the current compute.
    fn add_dep(&self, source: Rc<dyn AnySource>);

    /// Clear the tentative source list before re-running compute.
    fn clear_deps(&self);

    /// Drop sources from the given index onward (used to drop sources that
    /// were read last time but not this time).
    fn remove_deps_from(&self, start: usize);

    /// Iterate recorded sources in read order.
    fn for_each_dep(&self, f: &mut dyn FnMut(&Rc<dyn AnySource>) -> bool);

    /// Remove a specific source (used during edge reconciliation).
    fn remove_source(&self, source: &Rc<dyn AnySource>);

    /// Run this reaction's compute/effect body. Returns `true` if a
    /// derived's value changed; effects always return `false`.
    fn update(&self) -> bool;

    /// Run this reaction's render/user-tier phase, after the pure phase
    /// has settled the graph. Deriveds have no separate phase and keep
    /// the default, which just re-runs `update`; effects override this
    /// to perform their actual (non-tracked-by-the-pure-phase) body and
    /// leave `update` a no-op, since they are driven from here rather
    /// than from the pure tier.
    fn run_effect_phase(&self) {
        self.update();
    }

    fn is_derived(&self) -> bool {
        self.flags() & DERIVED != 0
    }

    fn is_effect(&self) -> bool {
        self.flags() & EFFECT != 0
    }

    fn is_eager(&self) -> bool {
        self.flags() & EAGER != 0
    }

    fn is_dirty(&self) -> bool {
        self.flags() & DIRTY != 0
    }

    fn is_check(&self) -> bool {
        self.flags() & CHECK != 0
    }

    fn is_clean(&self) -> bool {
        self.flags() & CLEAN != 0
    }

    fn is_destroyed(&self) -> bool {
        self.flags() & DESTROYED != 0
    }

    fn is_updating(&self) -> bool {
        self.flags() & UPDATING != 0
    }

    fn mark_dirty(&self) {
        let flags = (self.flags() & STATUS_MASK) | DIRTY;
        self.set_flags(flags);
    }

    fn mark_check(&self) {
        let flags = (self.flags() & STATUS_MASK) | CHECK;
        self.set_flags(flags);
    }

    fn mark_clean(&self) {
        let flags = (self.flags() & STATUS_MASK) | CLEAN;
        self.set_flags(flags);
    }

    fn mark_destroyed(&self) {
        self.set_flags(self.flags() | DESTROYED);
    }

    fn as_any(&self) -> &dyn Any;

    /// If this reaction is also a source (i.e. a derived computation),
    /// return it as an `AnySource` so writes can cascade into further
    /// observers.
    ///
    /// `None` for effects (never sources).
    fn as_derived_source(&self) -> Option<Rc<dyn AnySource>>;

    /// The queue this reaction reschedules itself onto when redirtied.
    /// `None` means "use whatever queue is ambient at the write site"
    /// (deriveds: they have no owner of their own to pin a queue to).
    /// Effects override this with their owner's queue so a write from
    /// outside a paused boundary's scope still lands on the boundary's
    /// own (paused) queue rather than the writer's ambient one.
    fn queue(&self) -> Option<Rc<crate::queue::Queue>> {
        None
    }
}

// =============================================================================
// SOURCE INNER (the data behind Signal<T>)
// =============================================================================

/// Equality predicate for comparing cell values. A predicate that always
/// returns `false` models the spec's "always changed" mode.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

/// Default equality via `PartialEq`.
pub fn default_equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

/// Internal data for a plain writable signal.
///
/// Kept separate from `Signal<T>` so it can be stored as `Rc<dyn AnySource>`
/// alongside other cell kinds.
pub struct SourceInner<T> {
    flags: Cell<u32>,
    value: RefCell<T>,
    write_version: Cell<u32>,
    read_version: Cell<u32>,
    reactions: RefCell<Vec<Weak<dyn AnyReaction>>>,
    equals: EqualsFn<T>,
    error: RefCell<Option<ErrorPayload>>,
    name: Option<Rc<str>>,
    created_at: u64,
}

impl<T: 'static> SourceInner<T> {
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_equals(value, default_equals)
    }

    pub fn new_with_equals(value: T, equals: EqualsFn<T>) -> Self {
        Self::new_named(value, equals, None)
    }

    pub fn new_named(value: T, equals: EqualsFn<T>, name: Option<Rc<str>>) -> Self {
        Self {
            flags: Cell::new(SOURCE | CLEAN),
            value: RefCell::new(value),
            write_version: Cell::new(0),
            read_version: Cell::new(0),
            reactions: RefCell::new(Vec::new()),
            equals,
            error: RefCell::new(None),
            name,
            created_at: crate::core::context::with_context(|ctx| ctx.clock()),
        }
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Set the value; returns `true` if it compared unequal to the prior
    /// value (and was therefore overwritten).
    pub fn set(&self, value: T) -> bool {
        let changed = {
            let current = self.value.borrow();
            !(self.equals)(&current, &value)
        };

        if changed {
            *self.value.borrow_mut() = value;
            self.write_version.set(self.write_version.get() + 1);
        }

        changed
    }

    /// Update in place; always bumps the write version when there are
    /// observers (the closure may have mutated without being comparable).
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        {
            let mut current = self.value.borrow_mut();
            f(&mut current);
        }

        let has_reactions = !self.reactions.borrow().is_empty();
        if has_reactions {
            self.write_version.set(self.write_version.get() + 1);
        }
        has_reactions
    }

    pub fn equals_fn(&self) -> EqualsFn<T> {
        self.equals
    }

    pub fn set_error(&self, err: ErrorPayload) {
        *self.error.borrow_mut() = Some(err);
        self.mark_error();
        self.clear_loading();
    }

    pub fn clear_error_payload(&self) {
        *self.error.borrow_mut() = None;
        self.clear_error();
    }
}

impl<T: 'static> AnySource for SourceInner<T> {
    fn flags(&self) -> u32 {
        self.flags.get()
    }

    fn set_flags(&self, flags: u32) {
        self.flags.set(flags);
    }

    fn write_version(&self) -> u32 {
        self.write_version.get()
    }

    fn set_write_version(&self, version: u32) {
        self.write_version.set(version);
    }

    fn read_version(&self) -> u32 {
        self.read_version.get()
    }

    fn set_read_version(&self, version: u32) {
        self.read_version.set(version);
    }

    fn reaction_count(&self) -> usize {
        self.reactions.borrow().len()
    }

    fn add_reaction(&self, reaction: Weak<dyn AnyReaction>) {
        self.reactions.borrow_mut().push(reaction);
    }

    fn cleanup_dead_reactions(&self) {
        self.reactions.borrow_mut().retain(|w| w.strong_count() > 0);
    }

    fn for_each_reaction(&self, f: &mut dyn FnMut(Rc<dyn AnyReaction>) -> bool) {
        let reactions = self.reactions.borrow();
        for weak in reactions.iter() {
            if let Some(rc) = weak.upgrade() {
                if !f(rc) {
                    break;
                }
            }
        }
    }

    fn remove_reaction(&self, reaction: &Rc<dyn AnyReaction>) {
        let reaction_ptr = Rc::as_ptr(reaction) as *const ();
        self.reactions.borrow_mut().retain(|weak| {
            if let Some(rc) = weak.upgrade() {
                let weak_ptr = Rc::as_ptr(&rc) as *const ();
                weak_ptr != reaction_ptr
            } else {
                false
            }
        });
    }

    fn clear_reactions(&self) {
        self.reactions.borrow_mut().clear();
    }

    fn name(&self) -> Option<Rc<str>> {
        self.name.clone()
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn error(&self) -> Option<ErrorPayload> {
        self.error.borrow().clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_inner_creation() {
        let source = SourceInner::new(42);
        assert_eq!(source.get(), 42);
        assert!(source.flags() & SOURCE != 0);
        assert!(source.flags() & CLEAN != 0);
    }

    #[test]
    fn source_inner_set() {
        let source = SourceInner::new(1);
        assert_eq!(source.get(), 1);

        let changed = source.set(2);
        assert!(changed);
        assert_eq!(source.get(), 2);
        assert_eq!(source.write_version(), 1);

        let changed = source.set(2);
        assert!(!changed);
        assert_eq!(source.write_version(), 1);
    }

    #[test]
    fn source_inner_with() {
        let source = SourceInner::new(vec![1, 2, 3]);
        let sum = source.with(|v| v.iter().sum::<i32>());
        assert_eq!(sum, 6);
    }

    #[test]
    fn source_as_any_source_trait() {
        let source: Rc<SourceInner<i32>> = Rc::new(SourceInner::new(42));
        let any_source: Rc<dyn AnySource> = source.clone();

        assert!(any_source.flags() & SOURCE != 0);
        assert!(any_source.is_clean());
        assert!(!any_source.is_dirty());
        assert!(!any_source.is_derived());
    }

    #[test]
    fn heterogeneous_source_storage() {
        let int_source: Rc<dyn AnySource> = Rc::new(SourceInner::new(42i32));
        let str_source: Rc<dyn AnySource> = Rc::new(SourceInner::new(String::from("hello")));
        let bool_source: Rc<dyn AnySource> = Rc::new(SourceInner::new(true));

        let sources: Vec<Rc<dyn AnySource>> = vec![int_source, str_source, bool_source];
        assert_eq!(sources.len(), 3);

        for source in &sources {
            assert!(source.flags() & SOURCE != 0);
        }

        sources[0].mark_dirty();
        assert!(sources[0].is_dirty());
        assert!(!sources[0].is_clean());
        assert!(sources[1].is_clean());
        assert!(sources[2].is_clean());
    }

    #[test]
    fn source_flag_operations() {
        let source = SourceInner::new(42);

        assert!(source.is_clean());
        source.mark_dirty();
        assert!(source.is_dirty());
        assert!(!source.is_clean());

        source.mark_check();
        assert!(source.is_check());
        assert!(!source.is_dirty());

        source.mark_clean();
        assert!(source.is_clean());
        assert!(!source.is_check());
    }

    #[test]
    fn loading_and_error_survive_status_transitions() {
        let source = SourceInner::new(42);
        source.mark_loading();
        source.mark_dirty();
        assert!(source.is_loading());
        source.mark_clean();
        assert!(source.is_loading(), "status transition must not clear LOADING");
        source.clear_loading();
        assert!(!source.is_loading());
    }

    #[test]
    fn custom_equality_function() {
        fn never_equal<T>(_: &T, _: &T) -> bool {
            false
        }

        let source = SourceInner::new_with_equals(42, never_equal);
        let changed = source.set(42);
        assert!(changed);
    }

    #[test]
    fn downcast_from_any_source() {
        let source: Rc<SourceInner<i32>> = Rc::new(SourceInner::new(42));
        let any_source: Rc<dyn AnySource> = source.clone();
        let inner = any_source.as_any().downcast_ref::<SourceInner<i32>>().unwrap();
        assert_eq!(inner.get(), 42);
    }
}
