// ============================================================================
// reactive-core - Event layer contract
//
// The core does not ship a stream/event implementation; it ships the
// contract an upper layer's event system is expected to satisfy so it can
// interoperate with the scheduler and ownership tree built elsewhere in
// this crate: `Observer<T>`, the `Handler`/`Emitter` traits, and a pair of
// combinators for adapting one `Observer` into another. An `Emitter`
// drives its `Observer` using `queue::Queue::enqueue` as its scheduling
// substrate and `owner::run_with_owner` to carry ownership across an async
// resumption; neither is reimplemented here.
// ============================================================================

use std::rc::Rc;

use crate::core::types::ErrorPayload;

/// The three callbacks an event source drives to report its state:
/// `next` for a value, `error` for an unrecoverable failure, and `wait`
/// for "the next value isn't ready yet" (the event-layer analogue of a
/// signal's LOADING bit).
pub struct Observer<T> {
    pub next: Box<dyn Fn(T)>,
    pub error: Box<dyn Fn(ErrorPayload)>,
    pub wait: Box<dyn Fn()>,
}

impl<T> Observer<T> {
    pub fn new(
        next: impl Fn(T) + 'static,
        error: impl Fn(ErrorPayload) + 'static,
        wait: impl Fn() + 'static,
    ) -> Self {
        Self {
            next: Box::new(next),
            error: Box::new(error),
            wait: Box::new(wait),
        }
    }

    /// Adapt this observer to receive values of a different type by mapping
    /// each one through `f` first. `error` and `wait` pass through
    /// unchanged.
    pub fn map<U>(self, f: impl Fn(U) -> T + 'static) -> Observer<U>
    where
        T: 'static,
    {
        let Observer { next, error, wait } = self;
        Observer {
            next: Box::new(move |v: U| next(f(v))),
            error,
            wait,
        }
    }

    /// Adapt this observer to drop values that don't satisfy `predicate`
    /// before they reach the wrapped `next`. `error` and `wait` pass
    /// through unchanged.
    pub fn filter(self, predicate: impl Fn(&T) -> bool + 'static) -> Observer<T>
    where
        T: 'static,
    {
        let Observer { next, error, wait } = self;
        Observer {
            next: Box::new(move |v: T| {
                if predicate(&v) {
                    next(v);
                }
            }),
            error,
            wait,
        }
    }
}

/// A sink that reacts to a single value. Implemented by upper-layer types
/// that want to be driven by an `Emitter` without exposing their own
/// `Observer` plumbing.
pub trait Handler<T> {
    fn handle(&self, value: T);
}

impl<T, F: Fn(T)> Handler<T> for F {
    fn handle(&self, value: T) {
        self(value)
    }
}

/// A source that drives a subscribed `Observer` with values, errors, and
/// wait notifications. `subscribe` returns an unsubscribe callback; calling
/// it more than once must be a no-op.
pub trait Emitter<T> {
    fn subscribe(&self, observer: Observer<T>) -> Box<dyn FnOnce()>;
}

/// A no-op emitter that never calls back; useful as a default or as a test
/// double for code that only needs the `Emitter<T>` shape.
pub struct Never;

impl<T> Emitter<T> for Never {
    fn subscribe(&self, _observer: Observer<T>) -> Box<dyn FnOnce()> {
        Box::new(|| {})
    }
}

/// A single immediately-delivered value, then done. Grounded in how a
/// resolved async read is expected to behave at the event-layer boundary:
/// one `next`, no `wait`.
pub struct Once<T>(pub Rc<T>);

impl<T: Clone + 'static> Emitter<T> for Once<T> {
    fn subscribe(&self, observer: Observer<T>) -> Box<dyn FnOnce()> {
        (observer.next)((*self.0).clone());
        Box::new(|| {})
    }
}
