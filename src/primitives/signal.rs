// ============================================================================
// reactive-core - Signal Primitive
// The core writable reactive source
// ============================================================================

use std::rc::Rc;

use crate::core::constants::DIRTY;
use crate::core::context::with_context;
use crate::core::control::{raise_error, raise_not_ready};
use crate::core::error::ReadError;
use crate::core::types::{AnySource, ErrorPayload, EqualsFn, SourceInner};
use crate::queue::NotifyMask;
use crate::reactivity::tracking::{mark_reactions, notify_write, track_read};

// =============================================================================
// SIGNAL<T> - The public signal handle
// =============================================================================

/// A reactive signal holding a value of type `T`.
///
/// Signals are the only writable source in the graph. When a signal's
/// value changes, every dependent computation and effect is notified and
/// (eventually) re-evaluated.
///
/// ```
/// use reactive_core::signal;
///
/// let count = signal(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
#[derive(Clone)]
pub struct Signal<T> {
    inner: Rc<SourceInner<T>>,
}

impl<T> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self
    where
        T: PartialEq + 'static,
    {
        Self {
            inner: Rc::new(SourceInner::new(value)),
        }
    }

    /// Create a new signal with a custom equality function.
    pub fn new_with_equals(value: T, equals: EqualsFn<T>) -> Self
    where
        T: 'static,
    {
        Self {
            inner: Rc::new(SourceInner::new_with_equals(value, equals)),
        }
    }

    /// Get the current value, cloning it.
    ///
    /// Inside a tracked compute this registers the signal as a dependency.
    /// If the signal is LOADING, unwinds with [`crate::core::control::raise_not_ready`];
    /// if it carries a captured error, unwinds with that error. Both are
    /// caught by the nearest enclosing `run_tracked` (a computation's or
    /// effect's update), not by ordinary caller code.
    pub fn get(&self) -> T
    where
        T: Clone + 'static,
    {
        if let Some(err) = self.inner.error() {
            raise_error(err);
        }
        if self.inner.is_loading() {
            raise_not_ready();
        }
        track_read(self.inner.clone() as Rc<dyn AnySource>);
        self.inner.get()
    }

    /// Read the current value without unwinding on LOADING/error; the
    /// caller decides how to handle both cases.
    pub fn try_get(&self) -> Result<T, ReadError<ErrorPayload>>
    where
        T: Clone + 'static,
    {
        if let Some(err) = self.inner.error() {
            return Err(ReadError::Error(err));
        }
        if self.inner.is_loading() {
            return Err(ReadError::NotReady);
        }
        track_read(self.inner.clone() as Rc<dyn AnySource>);
        Ok(self.inner.get())
    }

    /// Access the current value with a closure, avoiding a clone. Same
    /// LOADING/error unwind behavior as [`Signal::get`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R
    where
        T: 'static,
    {
        if let Some(err) = self.inner.error() {
            raise_error(err);
        }
        if self.inner.is_loading() {
            raise_not_ready();
        }
        track_read(self.inner.clone() as Rc<dyn AnySource>);
        self.inner.with(f)
    }

    /// Set the signal's value. Returns whether it was considered a change
    /// (per the signal's equality function); unchanged writes notify no one.
    /// A successful write clears any previously captured LOADING/error state.
    pub fn set(&self, value: T) -> bool
    where
        T: 'static,
    {
        let changed = self.inner.set(value);
        if changed {
            self.clear_loading();
            self.clear_error();
            with_context(|ctx| {
                let wv = ctx.increment_write_version();
                self.inner.set_write_version(wv);
            });
            notify_write(self.inner.clone() as Rc<dyn AnySource>);
        }
        changed
    }

    /// Update the value in place using a closure.
    pub fn update(&self, f: impl FnOnce(&mut T))
    where
        T: Clone + 'static,
    {
        let had_reactions = self.inner.update(f);
        self.clear_loading();
        self.clear_error();
        if had_reactions {
            with_context(|ctx| {
                let wv = ctx.increment_write_version();
                self.inner.set_write_version(wv);
            });
            notify_write(self.inner.clone() as Rc<dyn AnySource>);
        }
    }

    /// Mark the signal LOADING: reads unwind with `NotReady` until either
    /// a value is set or [`Signal::clear_loading`] is called directly.
    /// Forwards a notification to the owning queue tree so an enclosing
    /// suspense boundary can react.
    pub fn set_loading(&self)
    where
        T: 'static,
    {
        let was_loading = self.inner.is_loading();
        self.inner.mark_loading();
        if !was_loading {
            with_context(|ctx| {
                let wv = ctx.increment_write_version();
                self.inner.set_write_version(wv);
                ctx.current_queue().notify(NotifyMask::Loading, true);
            });
            mark_reactions(self.inner.clone() as Rc<dyn AnySource>, DIRTY);
        }
    }

    /// Clear the LOADING bit without otherwise touching the value.
    pub fn clear_loading(&self)
    where
        T: 'static,
    {
        let was_loading = self.inner.is_loading();
        self.inner.clear_loading();
        if was_loading {
            with_context(|ctx| {
                let wv = ctx.increment_write_version();
                self.inner.set_write_version(wv);
                ctx.current_queue().notify(NotifyMask::Loading, false);
            });
            mark_reactions(self.inner.clone() as Rc<dyn AnySource>, DIRTY);
        }
    }

    /// Capture an error on this signal: reads unwind with this error until
    /// cleared or overwritten by a successful `set`/`update`.
    pub fn set_error<E: std::error::Error + 'static>(&self, err: E)
    where
        T: 'static,
    {
        let was_error = self.inner.is_error();
        self.inner.set_error(Rc::new(err));
        if !was_error {
            with_context(|ctx| {
                let wv = ctx.increment_write_version();
                self.inner.set_write_version(wv);
                ctx.current_queue().notify(NotifyMask::Error, true);
            });
            mark_reactions(self.inner.clone() as Rc<dyn AnySource>, DIRTY);
        }
    }

    /// Clear a captured error without otherwise touching the value.
    pub fn clear_error(&self)
    where
        T: 'static,
    {
        let was_error = self.inner.is_error();
        self.inner.clear_error_payload();
        if was_error {
            with_context(|ctx| {
                let wv = ctx.increment_write_version();
                self.inner.set_write_version(wv);
                ctx.current_queue().notify(NotifyMask::Error, false);
            });
            mark_reactions(self.inner.clone() as Rc<dyn AnySource>, DIRTY);
        }
    }

    /// Get a reference to the inner source (advanced use: flags, error
    /// inspection, manual wiring).
    pub fn inner(&self) -> &Rc<SourceInner<T>> {
        &self.inner
    }

    /// Get the inner source as a type-erased `AnySource`, for storing
    /// signals of different types in the same collection.
    pub fn as_any_source(&self) -> Rc<dyn AnySource>
    where
        T: 'static,
    {
        self.inner.clone()
    }
}

impl<T> std::fmt::Debug for Signal<T>
where
    T: std::fmt::Debug + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.inner.with(|v| format!("{v:?}")))
            .finish()
    }
}

// =============================================================================
// SIGNAL CREATION FUNCTIONS
// =============================================================================

/// Create a new reactive signal.
///
/// ```
/// use reactive_core::signal;
///
/// let count = signal(0);
/// let name = signal(String::from("hello"));
///
/// count.set(42);
/// assert_eq!(count.get(), 42);
/// ```
pub fn signal<T>(value: T) -> Signal<T>
where
    T: PartialEq + 'static,
{
    Signal::new(value)
}

/// Create a signal with a custom equality function.
///
/// ```
/// use reactive_core::primitives::signal::signal_with_equals;
///
/// let always_notify = signal_with_equals(0, |_, _| false);
/// assert!(always_notify.set(0));
/// ```
pub fn signal_with_equals<T>(value: T, equals: EqualsFn<T>) -> Signal<T>
where
    T: 'static,
{
    Signal::new_with_equals(value, equals)
}

// =============================================================================
// SOURCE (low-level alias)
// =============================================================================

/// Options for creating a source via [`source`].
pub struct SourceOptions<T> {
    pub equals: Option<EqualsFn<T>>,
}

impl<T> Default for SourceOptions<T> {
    fn default() -> Self {
        Self { equals: None }
    }
}

/// Low-level alias for signal creation with optional custom equality. Most
/// callers should use [`signal`] directly.
pub fn source<T>(value: T, options: Option<SourceOptions<T>>) -> Signal<T>
where
    T: PartialEq + 'static,
{
    match options.and_then(|o| o.equals) {
        Some(eq) => Signal::new_with_equals(value, eq),
        None => Signal::new(value),
    }
}

// =============================================================================
// TESTS
// =============================================================================
