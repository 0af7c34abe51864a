// ============================================================================
// reactive-core - Introspection helpers
//
// Thin wrappers over the tracked-compute machinery in `core::control` and
// the active-reaction slot in `core::context`. Where the host language needs
// a dedicated combinator (`flatten`) because its signals don't compose,
// Rust closures already do; `flatten` here is a two-line adapter, not a new
// mechanism.
// ============================================================================

use std::rc::Weak;

use crate::core::constants::LOADING;
use crate::core::context::with_context;
use crate::core::control::{raise_error, run_tracked, ControlSignal};
use crate::core::types::AnyReaction;
use crate::primitives::derived::Derived;
use crate::primitives::signal::Signal;

/// The reaction currently being tracked against, if any. `None` outside of
/// a computation or effect body.
pub fn get_observer() -> Option<Weak<dyn AnyReaction>> {
    with_context(|ctx| ctx.get_active_reaction())
}

/// Run `f` with `observer` installed as the active reaction, so reads
/// inside `f` register dependencies against it instead of whatever was
/// previously running. Restores the previous observer afterward, including
/// on unwind.
pub fn run_with_observer<T>(observer: Option<Weak<dyn AnyReaction>>, f: impl FnOnce() -> T) -> T {
    let prev = with_context(|ctx| ctx.set_active_reaction(observer));
    let result = run_tracked(f);
    with_context(|ctx| ctx.set_active_reaction(prev));
    match result {
        Ok(value) => value,
        Err(ControlSignal::NotReady) => crate::core::control::raise_not_ready(),
        Err(ControlSignal::Error(err)) => raise_error(err),
    }
}

/// Run `f` and report whether a dependency read inside it is currently
/// LOADING, without letting the interrupt escape. With `include_self`, a
/// LOADING flag already set on the enclosing reaction also counts, even if
/// `f` itself happened not to touch a loading source this time.
pub fn is_pending<T>(f: impl FnOnce() -> T, include_self: bool) -> bool {
    let pending = match run_tracked(f) {
        Ok(_) => false,
        Err(ControlSignal::NotReady) => true,
        Err(ControlSignal::Error(err)) => raise_error(err),
    };
    if pending {
        return true;
    }
    if include_self {
        if let Some(reaction) = get_observer().and_then(|w| w.upgrade()) {
            return reaction.flags() & LOADING != 0;
        }
    }
    false
}

/// Wrap a tracked read in a change detector: each call compares the newly
/// computed value against the one from the previous call (by `PartialEq`)
/// and reports whether it differs. The first call has no prior value to
/// compare against and reports `false`.
pub fn has_updated<T>(f: impl Fn() -> T + 'static) -> impl Fn() -> bool
where
    T: PartialEq + Clone + 'static,
{
    let previous: std::cell::RefCell<Option<T>> = std::cell::RefCell::new(None);
    move || {
        let next = f();
        let mut slot = previous.borrow_mut();
        let changed = slot.as_ref().is_some_and(|prev| *prev != next);
        *slot = Some(next);
        changed
    }
}

/// Wrap a tracked read so that a LOADING interrupt returns the last
/// successfully computed value instead of propagating. Returns `None` until
/// the first successful computation; never clears a stale value on error
/// unless the error is a genuine captured error, which still propagates.
pub fn latest<T>(f: impl Fn() -> T + 'static) -> impl Fn() -> Option<T>
where
    T: Clone + 'static,
{
    let stale: std::cell::RefCell<Option<T>> = std::cell::RefCell::new(None);
    move || match run_tracked(&f) {
        Ok(value) => {
            *stale.borrow_mut() = Some(value.clone());
            Some(value)
        }
        Err(ControlSignal::NotReady) => stale.borrow().clone(),
        Err(ControlSignal::Error(err)) => raise_error(err),
    }
}

/// Something a reactive read can be flattened through: a `Signal<T>` or
/// `Derived<T>` handle returned by an outer computation.
pub trait Readable<T> {
    fn read(&self) -> T;
}

impl<T: Clone + 'static> Readable<T> for Signal<T> {
    fn read(&self) -> T {
        self.get()
    }
}

impl<T: Clone + 'static> Readable<T> for Derived<T> {
    fn read(&self) -> T {
        self.get()
    }
}

/// Flatten a computation that returns another reactive handle into one that
/// reads straight through to the inner value, tracking both layers.
pub fn flatten<T, R>(f: impl Fn() -> R + 'static) -> impl Fn() -> T
where
    R: Readable<T>,
    T: Clone + 'static,
{
    move || f().read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::with_context as ctx;
    use crate::primitives::derived::derived;
    use crate::primitives::signal::signal;

    #[test]
    fn observer_is_none_outside_a_reaction() {
        assert!(get_observer().is_none());
    }

    #[test]
    fn is_pending_reports_loading_reads() {
        let s = signal(1);
        let s_clone = s.clone();
        assert!(!is_pending(|| s_clone.get(), false));

        s.set_loading();
        let s_clone = s.clone();
        assert!(is_pending(|| s_clone.get(), false));
    }

    #[test]
    fn is_pending_propagates_real_errors() {
        let s = signal(1);
        s.set_error(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let s_clone = s.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            is_pending(|| s_clone.get(), false)
        }));
        assert!(result.is_err());
    }

    #[test]
    fn has_updated_is_false_on_first_call_then_tracks_changes() {
        let s = signal(1);
        let s_clone = s.clone();
        let check = has_updated(move || s_clone.get());

        assert!(!check());
        assert!(!check());

        s.set(2);
        assert!(check());
        assert!(!check());
    }

    #[test]
    fn latest_returns_stale_value_while_loading() {
        let s = signal(1);
        let s_clone = s.clone();
        let read = latest(move || s_clone.get());

        assert_eq!(read(), Some(1));

        s.set_loading();
        assert_eq!(read(), Some(1));

        s.clear_loading();
        s.set(2);
        assert_eq!(read(), Some(2));
    }

    #[test]
    fn latest_has_no_value_before_the_first_success() {
        let s = signal(1);
        s.set_loading();
        let s_clone = s.clone();
        let read = latest(move || s_clone.get());
        assert_eq!(read(), None);
    }

    #[test]
    fn flatten_reads_through_a_nested_signal() {
        let inner = signal(5);
        let inner_clone = inner.clone();
        let outer = derived(move || inner_clone.clone());
        let read = flatten(move || outer.get());

        assert_eq!(read(), 5);
        inner.set(9);
        assert_eq!(read(), 9);
    }

    #[test]
    fn run_with_observer_restores_previous_observer() {
        ctx(|c| {
            assert!(c.get_active_reaction().is_none());
        });
        run_with_observer(None, || {});
        ctx(|c| {
            assert!(c.get_active_reaction().is_none());
        });
    }
}
