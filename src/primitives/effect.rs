// ============================================================================
// reactive-core - Effect System
// Side effects that re-run when dependencies change
// ============================================================================
//
// Effects are reactions that run side effects when their dependencies change.
// Unlike deriveds, effects don't produce values - they just run code.
//
// Unlike the teacher, an effect does not maintain its own parent/child/
// sibling tree. Each effect owns a dedicated child `Owner` and relies on
// the ownership tree for nesting: primitives created inside an effect's
// body attach to that owner, and `Owner::reset` tears them down (running
// their cleanups) between reruns.
//
// An effect's pure-phase `update` is a no-op: effects are driven entirely
// from `run_effect_phase`, invoked by the scheduler's render/user tiers
// after the pure phase has brought the rest of the graph up to date.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::error;

use crate::core::constants::*;
use crate::core::context::with_context;
use crate::core::control::{run_tracked, ControlSignal};
use crate::core::types::{AnyReaction, AnySource};
use crate::owner::{run_with_owner, Owner};
use crate::reactivity::tracking::{install_dependencies, set_signal_status};

// =============================================================================
// TYPE ALIASES
// =============================================================================

/// Cleanup function returned by an effect body, run before the next
/// execution (or on disposal if there is no next execution).
pub type CleanupFn = Box<dyn FnOnce()>;

/// Effect body signature: returns an optional teardown for its own run.
pub type EffectFn = Box<dyn FnMut() -> Option<CleanupFn>>;

// =============================================================================
// EFFECT INNER
// =============================================================================

/// The inner effect implementation.
///
/// Implements `AnyReaction` only - effects are never sources.
pub struct EffectInner {
    flags: Cell<u32>,
    write_version: Cell<u32>,
    func: RefCell<Option<EffectFn>>,
    deps: RefCell<Vec<Rc<dyn AnySource>>>,
    teardown: RefCell<Option<CleanupFn>>,
    /// Dedicated scope for anything created while this effect's body runs.
    /// Reset (disposed-and-cleared, not detached) before each rerun.
    owner: Rc<Owner>,
    self_weak: RefCell<Weak<EffectInner>>,
}

impl EffectInner {
    fn new(effect_type: u32, func: EffectFn, owner: Rc<Owner>) -> Rc<Self> {
        let effect = Rc::new(Self {
            flags: Cell::new(effect_type | DIRTY),
            write_version: Cell::new(0),
            func: RefCell::new(Some(func)),
            deps: RefCell::new(Vec::new()),
            teardown: RefCell::new(None),
            owner,
            self_weak: RefCell::new(Weak::new()),
        });
        *effect.self_weak.borrow_mut() = Rc::downgrade(&effect);
        effect
    }

    fn as_rc(&self) -> Option<Rc<EffectInner>> {
        self.self_weak.borrow().upgrade()
    }

    fn as_weak_reaction(&self) -> Weak<dyn AnyReaction> {
        match self.as_rc() {
            Some(rc) => Rc::downgrade(&(rc as Rc<dyn AnyReaction>)),
            None => Weak::<EffectInner>::new(),
        }
    }

    pub fn owner(&self) -> &Rc<Owner> {
        &self.owner
    }
}

impl AnyReaction for EffectInner {
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

    /// Effects do nothing during the pure phase; they run from
    /// `run_effect_phase` once the graph has settled.
    fn update(&self) -> bool {
        false
    }

    fn run_effect_phase(&self) {
        if self.is_destroyed() {
            return;
        }
        if let Some(effect) = self.as_rc() {
            update_effect(&effect);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_derived_source(&self) -> Option<Rc<dyn AnySource>> {
        None
    }

    fn queue(&self) -> Option<Rc<crate::queue::Queue>> {
        Some(self.owner.queue())
    }
}

// =============================================================================
// RUN / DESTROY AN EFFECT
// =============================================================================

/// Run (or rerun) an effect's body: tear down the previous run's owned
/// scope and teardown, track a fresh set of dependencies, and handle a
/// NotReady/captured-error interrupt the same way a derived's compute
/// does, but bubbling an unhandled error to the ownership tree instead of
/// caching it.
fn update_effect(effect: &Rc<EffectInner>) {
    if effect.is_destroyed() {
        return;
    }

    set_signal_status(&**effect, CLEAN);
    effect.owner.reset();
    if let Some(teardown) = effect.teardown.borrow_mut().take() {
        teardown();
    }

    let (prev_reaction, prev_effect) = with_context(|ctx| {
        let weak = effect.as_weak_reaction();
        let prev_r = ctx.set_active_reaction(Some(weak.clone()));
        let prev_e = ctx.set_active_effect(Some(weak));
        ctx.increment_read_version();
        ctx.set_skipped_deps(0);
        ctx.swap_new_deps(Vec::new());
        (prev_r, prev_e)
    });

    let old_flags = effect.flags();
    effect.set_flags(old_flags | UPDATING);

    let owner = effect.owner.clone();
    let result: Result<Option<CleanupFn>, ControlSignal> = run_with_owner(&owner, || {
        run_tracked(|| {
            let mut func = effect.func.borrow_mut();
            match func.as_mut() {
                Some(f) => f(),
                None => None,
            }
        })
    });

    effect.set_flags(effect.flags() & !UPDATING);

    with_context(|ctx| {
        ctx.set_active_reaction(prev_reaction);
        ctx.set_active_effect(prev_effect);
    });

    install_dependencies(effect.clone() as Rc<dyn AnyReaction>, 0);
    effect.write_version.set(with_context(|ctx| ctx.increment_write_version()));

    match result {
        Ok(teardown) => {
            *effect.teardown.borrow_mut() = teardown;
        }
        Err(ControlSignal::NotReady) => {
            // Left CLEAN; whatever was read before hitting the LOADING
            // source is already installed as a dependency above, so a
            // later write to it redirties and reschedules this effect.
        }
        Err(ControlSignal::Error(err)) => {
            if !effect.owner.handle_error(err.clone()) {
                error!(error = %err, "effect body raised an error with no boundary to absorb it");
            }
        }
    }
}

fn destroy_effect(effect: &Rc<EffectInner>) {
    if effect.is_destroyed() {
        return;
    }
    effect.owner.dispose();
    let reaction = effect.clone() as Rc<dyn AnyReaction>;
    crate::reactivity::tracking::remove_reactions(reaction, 0);
    effect.mark_destroyed();
}

// =============================================================================
// EFFECT<T> WRAPPER
// =============================================================================

/// A handle to a running effect. Disposes the effect (running its
/// teardown and any nested cleanups) when the last clone is dropped, or
/// explicitly via [`Effect::dispose`].
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    fn from_inner(inner: Rc<EffectInner>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Rc<EffectInner> {
        &self.inner
    }

    pub fn as_any_reaction(&self) -> Rc<dyn AnyReaction> {
        self.inner.clone() as Rc<dyn AnyReaction>
    }

    pub fn is_destroyed(&self) -> bool {
        AnyReaction::is_destroyed(&*self.inner)
    }

    /// Dispose the effect immediately: disposes its owner (running any
    /// nested effects' own disposal and registered cleanups) and its
    /// own teardown.
    pub fn dispose(&self) {
        destroy_effect(&self.inner);
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        if Rc::strong_count(&self.inner) == 1 {
            self.dispose();
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect").field("destroyed", &self.is_destroyed()).finish()
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

fn create_effect(effect_type: u32, func: EffectFn) -> Effect {
    let parent_owner = with_context(|ctx| ctx.owner_or_root());
    let owner = Owner::new_child(&parent_owner);
    let inner = EffectInner::new(effect_type, func, owner.clone());

    // An ancestor disposing must stop this effect too, not just detach the
    // primitives it created: the owner's own dispose hook is the only thing
    // a parent's `reset`/`dispose` actually drives.
    {
        let inner = inner.clone();
        owner.on_dispose(move || destroy_effect(&inner));
    }

    // Runs synchronously on creation, matching a signal's immediate first
    // read: an effect's initial run isn't "scheduled", it just happens.
    update_effect(&inner);

    Effect::from_inner(inner)
}

/// Create an effect that reruns (post-render, "user" tier) whenever a
/// signal or derived it reads changes.
///
/// ```
/// use reactive_core::{signal, primitives::effect::effect};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = signal(0);
/// let seen = Rc::new(Cell::new(0));
/// let seen_clone = seen.clone();
/// let count_clone = count.clone();
/// let _handle = effect(move || {
///     seen_clone.set(count_clone.get());
/// });
/// assert_eq!(seen.get(), 0);
/// count.set(5);
/// assert_eq!(seen.get(), 5);
/// ```
pub fn effect<F>(mut f: F) -> Effect
where
    F: FnMut() + 'static,
{
    create_effect(EFFECT | USER_EFFECT | EAGER, Box::new(move || {
        f();
        None
    }))
}

/// Create an effect whose body returns a teardown closure, run before the
/// next rerun and on disposal.
pub fn effect_with_cleanup<F>(f: F) -> Effect
where
    F: FnMut() -> Option<CleanupFn> + 'static,
{
    create_effect(EFFECT | USER_EFFECT | EAGER, Box::new(f))
}

/// Create an effect that reruns in the render tier: earlier than ordinary
/// effects within a flush, intended for view-layer synchronization that
/// must land before post-render side effects observe the result.
pub fn render_effect<F>(f: F) -> Effect
where
    F: FnMut() -> Option<CleanupFn> + 'static,
{
    create_effect(EFFECT | RENDER_EFFECT | EAGER, Box::new(f))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::{create_root, on_cleanup, Context};
    use crate::primitives::{derived, signal};
    use crate::reactivity::batching::{batch, untrack};
    use std::cell::Cell as StdCell;

    #[test]
    fn effect_runs_immediately_on_creation() {
        let ran = Rc::new(StdCell::new(false));
        let ran_clone = ran.clone();
        let _handle = effect(move || ran_clone.set(true));
        assert!(ran.get());
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let count = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let runs_clone = runs.clone();
        let count_clone = count.clone();
        let _handle = effect(move || {
            let _ = count_clone.get();
            runs_clone.set(runs_clone.get() + 1);
        });

        assert_eq!(runs.get(), 1);
        count.set(1);
        assert_eq!(runs.get(), 2);
        count.set(1);
        assert_eq!(runs.get(), 2, "unchanged writes must not rerun the effect");
    }

    #[test]
    fn effect_reacts_to_derived() {
        let a = signal(1);
        let doubled = derived({
            let a = a.clone();
            move || a.get() * 2
        });

        let seen = Rc::new(StdCell::new(0));
        let seen_clone = seen.clone();
        let doubled_clone = doubled.clone();
        let _handle = effect(move || seen_clone.set(doubled_clone.get()));

        assert_eq!(seen.get(), 2);
        a.set(5);
        assert_eq!(seen.get(), 10);
    }

    #[test]
    fn teardown_runs_before_next_execution_and_on_dispose() {
        let count = signal(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_clone = log.clone();
        let count_clone = count.clone();
        let handle = effect_with_cleanup(move || {
            let value = count_clone.get();
            let log = log_clone.clone();
            log.borrow_mut().push(format!("run {value}"));
            Some(Box::new(move || log.borrow_mut().push(format!("cleanup {value}"))) as CleanupFn)
        });

        assert_eq!(*log.borrow(), vec!["run 0"]);

        count.set(1);
        assert_eq!(*log.borrow(), vec!["run 0", "cleanup 0", "run 1"]);

        drop(handle);
        assert_eq!(*log.borrow(), vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]);
    }

    #[test]
    fn dropping_the_last_handle_disposes_the_effect() {
        let count = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let runs_clone = runs.clone();
        let count_clone = count.clone();
        let handle = effect(move || {
            let _ = count_clone.get();
            runs_clone.set(runs_clone.get() + 1);
        });

        assert_eq!(runs.get(), 1);
        drop(handle);
        count.set(1);
        assert_eq!(runs.get(), 1, "a disposed effect must not rerun");
    }

    #[test]
    fn disposing_an_effect_detaches_it_from_its_sources() {
        let count = signal(0);
        let handle = effect({
            let count = count.clone();
            move || {
                let _ = count.get();
            }
        });
        assert_eq!(count.as_any_source().reaction_count(), 1);

        drop(handle);
        assert_eq!(count.as_any_source().reaction_count(), 0);
    }

    #[test]
    fn cloned_handle_keeps_effect_alive() {
        let count = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let runs_clone = runs.clone();
        let count_clone = count.clone();
        let handle = effect(move || {
            let _ = count_clone.get();
            runs_clone.set(runs_clone.get() + 1);
        });
        let handle2 = handle.clone();

        drop(handle);
        count.set(1);
        assert_eq!(runs.get(), 2, "effect survives while any clone is alive");

        drop(handle2);
        count.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn nested_effect_created_in_body_is_reset_between_reruns() {
        let outer_count = signal(0);
        let inner_runs = Rc::new(StdCell::new(0));

        let inner_runs_clone = inner_runs.clone();
        let outer_count_clone = outer_count.clone();
        let _outer = effect(move || {
            let _ = outer_count_clone.get();
            let inner_runs = inner_runs_clone.clone();
            let _inner = effect(move || {
                inner_runs.set(inner_runs.get() + 1);
            });
        });

        assert_eq!(inner_runs.get(), 1, "nested effect runs once per outer run");
        outer_count.set(1);
        assert_eq!(
            inner_runs.get(),
            2,
            "outer rerun disposes the old nested effect and creates a fresh one"
        );
    }

    #[test]
    fn on_cleanup_registered_inside_effect_fires_on_rerun() {
        let count = signal(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_clone = log.clone();
        let count_clone = count.clone();
        let _handle = effect(move || {
            let value = count_clone.get();
            let log = log_clone.clone();
            let _ = on_cleanup(move || log.borrow_mut().push(value));
        });

        assert!(log.borrow().is_empty());
        count.set(1);
        assert_eq!(*log.borrow(), vec![0]);
    }

    #[test]
    fn batched_writes_coalesce_into_a_single_rerun() {
        let a = signal(1);
        let b = signal(2);
        let runs = Rc::new(StdCell::new(0));

        let runs_clone = runs.clone();
        let a_clone = a.clone();
        let b_clone = b.clone();
        let _handle = effect(move || {
            let _ = a_clone.get() + b_clone.get();
            runs_clone.set(runs_clone.get() + 1);
        });

        assert_eq!(runs.get(), 1);
        batch(|| {
            a.set(10);
            b.set(20);
        });
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn untrack_prevents_dependency_registration() {
        let a = signal(1);
        let b = signal(2);
        let runs = Rc::new(StdCell::new(0));

        let runs_clone = runs.clone();
        let a_clone = a.clone();
        let b_clone = b.clone();
        let _handle = effect(move || {
            let _ = a_clone.get();
            untrack(|| {
                let _ = b_clone.get();
            });
            runs_clone.set(runs_clone.get() + 1);
        });

        assert_eq!(runs.get(), 1);
        b.set(20);
        assert_eq!(runs.get(), 1, "untracked read must not create a dependency");
        a.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn effect_propagates_context_through_owner() {
        let ctx: Context<i32> = Context::new();
        let seen = Rc::new(StdCell::new(0));

        create_root(|root| {
            root.provide(&ctx, 7);
            let seen_clone = seen.clone();
            let _handle = effect(move || {
                if let Some(owner) = crate::owner::get_owner() {
                    if let Some(value) = owner.get(&ctx) {
                        seen_clone.set(*value);
                    }
                }
            });
        });

        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn render_effect_runs_immediately_and_tracks() {
        let a = signal(1);
        let seen = Rc::new(StdCell::new(0));

        let seen_clone = seen.clone();
        let a_clone = a.clone();
        let _handle = render_effect(move || {
            seen_clone.set(a_clone.get());
            None
        });

        assert_eq!(seen.get(), 1);
        a.set(9);
        assert_eq!(seen.get(), 9);
    }

    #[test]
    fn unhandled_effect_error_does_not_panic_the_process() {
        let a = signal(1);
        let a_clone = a.clone();
        let _handle = effect(move || {
            if a_clone.get() == 2 {
                crate::core::control::fail(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
            }
        });

        // Must not panic: the error has no boundary to absorb it, so it is
        // logged and the rest of the runtime keeps working.
        a.set(2);
        a.set(3);
    }

    #[test]
    fn effect_error_is_absorbed_by_an_owner_error_handler() {
        let a = signal(1);
        let absorbed = Rc::new(StdCell::new(false));

        create_root(|root| {
            let flag = absorbed.clone();
            root.set_error_handler(move |_err| {
                flag.set(true);
                true
            });

            let a_clone = a.clone();
            let _handle = effect(move || {
                if a_clone.get() == 2 {
                    crate::core::control::fail(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
                }
            });

            a.set(2);
        });

        assert!(absorbed.get());
    }
}
