// ============================================================================
// reactive-core - Derived Computations
// Lazily computed values that cache and recompute when dependencies change
// ============================================================================
//
// A Derived is BOTH a Source (can be read, has reactions) AND a Reaction
// (has deps, can be marked dirty, has update method). This dual nature
// drives the CHECK-chain walk: when an upstream derived's identity changed
// but its value may still compare equal, dependents are marked CHECK rather
// than DIRTY, and only actually recompute if a real value changed somewhere
// upstream.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::context::with_context;
use crate::core::control::{raise_error, raise_not_ready, run_tracked, ControlSignal};
use crate::core::error::ReadError;
use crate::core::types::{default_equals, AnyReaction, AnySource, EqualsFn, ErrorPayload};
use crate::queue::NotifyMask;
use crate::reactivity::tracking::{install_dependencies, mark_reactions, set_source_status, track_read};

// =============================================================================
// DERIVED INNER
// =============================================================================

/// The internal data for a derived computation.
///
/// Implements both `AnySource` (can be read, has reactions) and
/// `AnyReaction` (has deps, can be marked dirty, executes its compute body).
pub struct DerivedInner<T> {
    flags: Cell<u32>,
    fn_: RefCell<Option<Box<dyn Fn() -> T>>>,
    value: RefCell<Option<T>>,
    error: RefCell<Option<ErrorPayload>>,
    equals: EqualsFn<T>,
    write_version: Cell<u32>,
    read_version: Cell<u32>,
    reactions: RefCell<Vec<Weak<dyn AnyReaction>>>,
    deps: RefCell<Vec<Rc<dyn AnySource>>>,
    self_ref: RefCell<Option<Weak<DerivedInner<T>>>>,
    name: Option<Rc<str>>,
    created_at: u64,
}

impl<T> DerivedInner<T> {
    pub fn new<F>(fn_: F) -> Rc<Self>
    where
        F: Fn() -> T + 'static,
        T: PartialEq,
    {
        Self::new_with_equals(fn_, default_equals)
    }

    pub fn new_with_equals<F>(fn_: F, equals: EqualsFn<T>) -> Rc<Self>
    where
        F: Fn() -> T + 'static,
    {
        let inner = Rc::new(Self {
            flags: Cell::new(DERIVED | SOURCE | DIRTY),
            fn_: RefCell::new(Some(Box::new(fn_))),
            value: RefCell::new(None),
            error: RefCell::new(None),
            equals,
            write_version: Cell::new(0),
            read_version: Cell::new(0),
            reactions: RefCell::new(Vec::new()),
            deps: RefCell::new(Vec::new()),
            self_ref: RefCell::new(None),
            name: None,
            created_at: with_context(|ctx| ctx.clock()),
        });

        *inner.self_ref.borrow_mut() = Some(Rc::downgrade(&inner));
        inner
    }

    /// Get the cached value. Panics if the derived has never successfully
    /// computed (callers must check `error()`/`is_loading()` first).
    pub fn get_value(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().as_ref().expect("derived has no cached value yet").clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.value.borrow().is_some()
    }

    pub fn equals_fn(&self) -> EqualsFn<T> {
        self.equals
    }

    /// This derived's own source identity, for propagating a state change
    /// to its observers the same way a write to a signal would.
    fn as_source(&self) -> Option<Rc<dyn AnySource>>
    where
        T: 'static + Clone,
    {
        self.self_ref.borrow().as_ref().and_then(Weak::upgrade).map(|rc| rc as Rc<dyn AnySource>)
    }

    fn bump_write_version(&self)
    where
        T: 'static + Clone,
    {
        with_context(|ctx| {
            let wv = ctx.increment_write_version();
            self.set_write_version(wv);
        });
    }

    fn set_error(&self, err: ErrorPayload)
    where
        T: 'static + Clone,
    {
        let was_error = self.is_error();
        *self.error.borrow_mut() = Some(err);
        self.mark_error();
        self.clear_loading();
        if !was_error {
            self.bump_write_version();
            with_context(|ctx| ctx.current_queue().notify(NotifyMask::Error, true));
            if let Some(source) = self.as_source() {
                mark_reactions(source, DIRTY);
            }
        }
    }

    fn clear_error_payload(&self)
    where
        T: 'static + Clone,
    {
        let was_error = self.is_error();
        *self.error.borrow_mut() = None;
        self.clear_error();
        if was_error {
            self.bump_write_version();
            with_context(|ctx| ctx.current_queue().notify(NotifyMask::Error, false));
            if let Some(source) = self.as_source() {
                mark_reactions(source, DIRTY);
            }
        }
    }

    fn mark_loading_and_notify(&self)
    where
        T: 'static + Clone,
    {
        let was_loading = self.is_loading();
        self.mark_loading();
        if !was_loading {
            self.bump_write_version();
            with_context(|ctx| ctx.current_queue().notify(NotifyMask::Loading, true));
            if let Some(source) = self.as_source() {
                mark_reactions(source, DIRTY);
            }
        }
    }

    fn clear_loading_and_notify(&self)
    where
        T: 'static + Clone,
    {
        let was_loading = self.is_loading();
        self.clear_loading();
        if was_loading {
            self.bump_write_version();
            with_context(|ctx| ctx.current_queue().notify(NotifyMask::Loading, false));
            if let Some(source) = self.as_source() {
                mark_reactions(source, DIRTY);
            }
        }
    }

    /// Run the compute function, catching NotReady/captured-error interrupts
    /// raised by a dependency read inside the closure. Returns whether the
    /// cached value changed; LOADING/error outcomes never change the cache.
    pub fn compute(&self) -> bool
    where
        T: Clone + 'static,
    {
        let result = {
            let fn_ref = self.fn_.borrow();
            let fn_ = fn_ref.as_ref().expect("derived fn disposed");
            run_tracked(|| fn_())
        };

        match result {
            Ok(new_value) => {
                let changed = {
                    let current = self.value.borrow();
                    match current.as_ref() {
                        Some(v) => !(self.equals)(v, &new_value),
                        None => true,
                    }
                };

                if changed {
                    *self.value.borrow_mut() = Some(new_value);
                    with_context(|ctx| {
                        self.write_version.set(ctx.increment_write_version());
                    });
                }

                self.clear_loading_and_notify();
                self.clear_error_payload();
                changed
            }
            Err(ControlSignal::NotReady) => {
                self.mark_loading_and_notify();
                false
            }
            Err(ControlSignal::Error(err)) => {
                self.set_error(err);
                false
            }
        }
    }
}

// =============================================================================
// AnySource implementation for DerivedInner
// =============================================================================

impl<T: 'static + Clone> AnySource for DerivedInner<T> {
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
                Rc::as_ptr(&rc) as *const () != reaction_ptr
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

    fn as_derived_reaction(&self) -> Option<Rc<dyn AnyReaction>> {
        self.self_ref.borrow().as_ref().and_then(Weak::upgrade).map(|rc| rc as Rc<dyn AnyReaction>)
    }
}

// =============================================================================
// AnyReaction implementation for DerivedInner
// =============================================================================

impl<T: 'static + Clone> AnyReaction for DerivedInner<T> {
    fn flags(&self) -> u32 {
        self.flags.get()
    }

    fn set_flags(&self, flags: u32) {
        self.flags.set(flags);
    }

    fn dep_count(&self) -> usize {
        self.deps.borrow().len()
    }

    fn add_dep(&self, source: Rc<dyn AnySource>) {
        self.deps.borrow_mut().push(source);
    }

    fn clear_deps(&self) {
        self.deps.borrow_mut().clear();
    }

    fn remove_deps_from(&self, start: usize) {
        self.deps.borrow_mut().truncate(start);
    }

    fn for_each_dep(&self, f: &mut dyn FnMut(&Rc<dyn AnySource>) -> bool) {
        for dep in self.deps.borrow().iter() {
            if !f(dep) {
                break;
            }
        }
    }

    fn remove_source(&self, source: &Rc<dyn AnySource>) {
        let source_ptr = Rc::as_ptr(source) as *const ();
        self.deps.borrow_mut().retain(|dep| Rc::as_ptr(dep) as *const () != source_ptr);
    }

    fn update(&self) -> bool {
        self.compute()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_derived_source(&self) -> Option<Rc<dyn AnySource>> {
        self.self_ref.borrow().as_ref().and_then(Weak::upgrade).map(|rc| rc as Rc<dyn AnySource>)
    }
}

// =============================================================================
// DERIVED<T> WRAPPER
// =============================================================================

/// A derived computation - a lazily computed value that caches and updates
/// only when its dependencies change.
///
/// ```
/// use reactive_core::{signal, derived};
///
/// let count = signal(1);
/// let count_clone = count.clone();
/// let doubled = derived(move || count_clone.get() * 2);
/// assert_eq!(doubled.get(), 2);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
#[derive(Clone)]
pub struct Derived<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T: 'static + Clone> Derived<T> {
    pub(crate) fn from_inner(inner: Rc<DerivedInner<T>>) -> Self {
        Self { inner }
    }

    /// Get the derived's value, recomputing first if dirty/check-pending.
    ///
    /// If the derived (or an upstream dependency reached during recompute)
    /// is LOADING or carries a captured error, unwinds the same way
    /// [`crate::primitives::signal::Signal::get`] does.
    pub fn get(&self) -> T {
        update_derived_chain(self.inner.clone() as Rc<dyn AnySource>);

        if let Some(err) = self.inner.error() {
            raise_error(err);
        }
        if self.inner.is_loading() {
            raise_not_ready();
        }

        track_read(self.inner.clone() as Rc<dyn AnySource>);
        self.inner.get_value()
    }

    /// Read without unwinding on LOADING/error; the caller decides how to
    /// handle both cases.
    pub fn try_get(&self) -> Result<T, ReadError<ErrorPayload>> {
        update_derived_chain(self.inner.clone() as Rc<dyn AnySource>);

        if let Some(err) = self.inner.error() {
            return Err(ReadError::Error(err));
        }
        if self.inner.is_loading() {
            return Err(ReadError::NotReady);
        }

        track_read(self.inner.clone() as Rc<dyn AnySource>);
        Ok(self.inner.get_value())
    }

    pub fn inner(&self) -> &Rc<DerivedInner<T>> {
        &self.inner
    }

    pub fn as_any_source(&self) -> Rc<dyn AnySource> {
        self.inner.clone() as Rc<dyn AnySource>
    }

    pub fn as_any_reaction(&self) -> Rc<dyn AnyReaction> {
        self.inner.clone() as Rc<dyn AnyReaction>
    }
}

impl<T> std::fmt::Debug for Derived<T>
where
    T: std::fmt::Debug + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("initialized", &self.inner.is_initialized())
            .finish()
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create a derived computation. Lazy: only runs when read, caches its
/// result, and only recomputes when a dependency's value actually changed.
pub fn derived<T, F>(fn_: F) -> Derived<T>
where
    T: 'static + Clone + PartialEq,
    F: Fn() -> T + 'static,
{
    Derived::from_inner(DerivedInner::new(fn_))
}

/// Create a derived computation with a custom equality function.
pub fn derived_with_equals<T, F>(fn_: F, equals: EqualsFn<T>) -> Derived<T>
where
    T: 'static + Clone,
    F: Fn() -> T + 'static,
{
    Derived::from_inner(DerivedInner::new_with_equals(fn_, equals))
}

// =============================================================================
// UPDATE DERIVED CHAIN - the CHECK-chain walk
// =============================================================================

/// Bring `target` up to date, recursively updating any CHECK-pending or
/// DIRTY deriveds it (transitively) depends on first.
///
/// 1. Collect every dirty/check-pending derived reachable from `target`.
/// 2. Process deepest-first (closest to the real sources).
/// 3. DIRTY: always recompute. CHECK: only recompute if some dependency's
///    write version actually advanced; otherwise mark clean without
///    rerunning the compute body.
///
/// Iterative with an explicit stack to avoid recursion limits on deep
/// dependency chains.
pub fn update_derived_chain(target: Rc<dyn AnySource>) {
    let flags = target.flags();
    if (flags & (DIRTY | CHECK)) == 0 {
        return;
    }

    let mut chain: Vec<Rc<dyn AnySource>> = vec![target.clone()];
    let mut visited: Vec<*const ()> = vec![Rc::as_ptr(&target) as *const ()];
    let mut idx = 0;

    while idx < chain.len() {
        let current = chain[idx].clone();
        idx += 1;

        if (current.flags() & (DIRTY | CHECK)) == 0 {
            continue;
        }

        if let Some(reaction) = current.as_derived_reaction() {
            let mut deps_to_add = Vec::new();
            reaction.for_each_dep(&mut |dep| {
                let dep_flags = dep.flags();
                if (dep_flags & DERIVED) != 0 && (dep_flags & (DIRTY | CHECK)) != 0 {
                    let dep_ptr = Rc::as_ptr(dep) as *const ();
                    if !visited.contains(&dep_ptr) {
                        deps_to_add.push(dep.clone());
                        visited.push(dep_ptr);
                    }
                }
                true
            });
            chain.extend(deps_to_add);
        }
    }

    for i in (0..chain.len()).rev() {
        let current = &chain[i];

        if (current.flags() & (DIRTY | CHECK)) == 0 {
            continue;
        }

        if (current.flags() & DIRTY) != 0 {
            update_derived(current);
        } else if check_deps_changed(current) {
            update_derived(current);
        } else {
            set_source_status(&**current, CLEAN);
        }
    }
}

/// Whether any dependency's write version has advanced past this derived's
/// own write version, meaning a CHECK-pending derived actually needs to
/// recompute rather than just being marked clean.
fn check_deps_changed(source: &Rc<dyn AnySource>) -> bool {
    let self_wv = source.write_version();

    if let Some(reaction) = source.as_derived_reaction() {
        let mut changed = false;
        reaction.for_each_dep(&mut |dep| {
            if dep.write_version() > self_wv {
                changed = true;
                false
            } else {
                true
            }
        });
        changed
    } else {
        false
    }
}

/// Run a single derived's compute body under tracking, then wire up the
/// dependencies it read.
fn update_derived(source: &Rc<dyn AnySource>) {
    if let Some(reaction) = source.as_derived_reaction() {
        let prev_reaction = with_context(|ctx| ctx.get_active_reaction());
        let prev_new_deps = with_context(|ctx| ctx.swap_new_deps(Vec::new()));

        with_context(|ctx| {
            ctx.set_active_reaction(Some(Rc::downgrade(&reaction)));
            ctx.increment_read_version();
        });

        let old_flags = reaction.flags();
        reaction.set_flags(old_flags | UPDATING);

        let _changed = reaction.update();

        let new_flags = reaction.flags() & !UPDATING;
        reaction.set_flags(new_flags);

        install_dependencies(reaction.clone(), 0);
        set_source_status(&**source, CLEAN);

        with_context(|ctx| {
            ctx.set_active_reaction(prev_reaction);
            ctx.swap_new_deps(prev_new_deps);
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::signal::signal;
    use std::cell::Cell as StdCell;

    #[test]
    fn derived_basic_creation() {
        let d = derived(|| 42);
        assert_eq!(d.get(), 42);
    }

    #[test]
    fn derived_tracks_signal_dependency() {
        let count = signal(1);
        let doubled = derived({
            let count = count.clone();
            move || count.get() * 2
        });

        assert_eq!(doubled.get(), 2);
        count.set(5);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn derived_caches_value() {
        let compute_count = Rc::new(StdCell::new(0));

        let d = derived({
            let compute_count = compute_count.clone();
            move || {
                compute_count.set(compute_count.get() + 1);
                42
            }
        });

        assert_eq!(d.get(), 42);
        assert_eq!(compute_count.get(), 1);
        assert_eq!(d.get(), 42);
        assert_eq!(compute_count.get(), 1);
    }

    #[test]
    fn derived_is_both_source_and_reaction() {
        let d = derived(|| 42);

        let as_source: Rc<dyn AnySource> = d.as_any_source();
        assert!(as_source.flags() & DERIVED != 0);
        assert!(as_source.flags() & SOURCE != 0);

        let as_reaction: Rc<dyn AnyReaction> = d.as_any_reaction();
        assert!(as_reaction.flags() & DERIVED != 0);
    }

    #[test]
    fn derived_as_derived_source_works() {
        let d = derived(|| 42);
        let as_reaction = d.as_any_reaction();
        let as_source = as_reaction.as_derived_source();
        assert!(as_source.is_some());
        assert!(as_source.unwrap().flags() & DERIVED != 0);
    }

    #[test]
    fn derived_chain() {
        let a = signal(1);
        let b = derived({
            let a = a.clone();
            move || a.get() * 2
        });
        let c = derived({
            let b = b.clone();
            move || b.get() + 10
        });

        assert_eq!(c.get(), 12);
        a.set(5);
        assert_eq!(c.get(), 20);
    }

    #[test]
    fn check_optimization_prevents_unnecessary_recomputation() {
        // A -> B -> C. B's output is the same for a < 10, so changing a
        // from 0 to 5 leaves B's value unchanged and C should not recompute.
        let compute_c_count = Rc::new(StdCell::new(0));
        let a = signal(0);

        let b = derived({
            let a = a.clone();
            move || if a.get() < 10 { 0 } else { 1 }
        });

        let c = derived({
            let b = b.clone();
            let compute_c_count = compute_c_count.clone();
            move || {
                compute_c_count.set(compute_c_count.get() + 1);
                b.get() * 100
            }
        });

        assert_eq!(c.get(), 0);
        assert_eq!(compute_c_count.get(), 1);

        a.set(5);
        assert_eq!(c.get(), 0);
        assert_eq!(compute_c_count.get(), 1, "c must not recompute when b's value did not change");

        a.set(15);
        assert_eq!(c.get(), 100);
        assert_eq!(compute_c_count.get(), 2);
    }

    #[test]
    fn diamond_dependency_pattern() {
        let compute_d_count = Rc::new(StdCell::new(0));
        let a = signal(1);

        let b = derived({
            let a = a.clone();
            move || a.get() + 10
        });
        let c = derived({
            let a = a.clone();
            move || a.get() * 10
        });
        let d = derived({
            let b = b.clone();
            let c = c.clone();
            let compute_d_count = compute_d_count.clone();
            move || {
                compute_d_count.set(compute_d_count.get() + 1);
                b.get() + c.get()
            }
        });

        assert_eq!(d.get(), 21);
        assert_eq!(compute_d_count.get(), 1);

        a.set(2);
        assert_eq!(d.get(), 32);
        assert_eq!(compute_d_count.get(), 2);
    }

    #[test]
    fn cascade_propagation_through_deriveds() {
        let a = signal(1);
        let b = derived({
            let a = a.clone();
            move || a.get() * 2
        });
        let c = derived({
            let b = b.clone();
            move || b.get() + 10
        });

        assert_eq!(c.get(), 12);

        let b_inner = b.inner();
        let c_inner = c.inner();
        assert!(AnySource::is_clean(&**b_inner));
        assert!(AnySource::is_clean(&**c_inner));

        a.set(5);

        let b_flags = AnySource::flags(&**b_inner);
        let c_flags = AnySource::flags(&**c_inner);
        assert!((b_flags & DIRTY) != 0, "b should be DIRTY after a changes");
        assert!((c_flags & (DIRTY | CHECK)) != 0, "c should be DIRTY or CHECK after a changes");

        assert_eq!(c.get(), 20);
        assert!(AnySource::is_clean(&**b_inner));
        assert!(AnySource::is_clean(&**c_inner));
    }

    #[test]
    fn derived_heterogeneous_storage() {
        let a = signal(1);
        let int_derived = derived({
            let a = a.clone();
            move || a.get() * 2
        });
        let string_derived = derived({
            let a = a.clone();
            move || format!("value: {}", a.get())
        });

        let sources: Vec<Rc<dyn AnySource>> =
            vec![int_derived.as_any_source(), string_derived.as_any_source()];

        for source in &sources {
            assert!(source.flags() & DERIVED != 0);
            assert!(source.flags() & SOURCE != 0);
        }
    }

    #[test]
    fn derived_propagates_loading_from_signal() {
        let a = signal(1);
        a.set_loading();
        let d = derived({
            let a = a.clone();
            move || a.get() * 2
        });

        assert!(matches!(d.try_get(), Err(ReadError::NotReady)));

        a.clear_loading();
        a.set(10);
        assert_eq!(d.get(), 20);
    }

    #[test]
    fn derived_propagates_error_from_signal() {
        let a = signal(1);
        a.set_error(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let d = derived({
            let a = a.clone();
            move || a.get() * 2
        });

        match d.try_get() {
            Err(ReadError::Error(e)) => assert_eq!(e.to_string(), "boom"),
            other => panic!("expected captured error, got {other:?}"),
        }
    }

    #[test]
    fn derived_recovers_after_dependency_clears_error() {
        let a = signal(1);
        a.set_error(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let d = derived({
            let a = a.clone();
            move || a.get() * 2
        });

        assert!(d.try_get().is_err());

        a.set(5);
        assert_eq!(d.get(), 10);
    }
}
