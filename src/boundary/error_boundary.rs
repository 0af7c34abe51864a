// ============================================================================
// reactive-core - Error boundary
//
// Captures both kinds of error the rest of the core produces: a signal or
// derived's captured error (propagated as an ERROR notification on the
// queue tree) and an effect body's unhandled error (propagated by walking
// the owner tree, see `Owner::handle_error`). Either one pauses the
// boundary's queue; `reset` clears the capture and resumes it.
// ============================================================================

use std::rc::Rc;

use crate::core::context::with_context;
use crate::core::types::ErrorPayload;
use crate::owner::{run_with_owner, Owner};
use crate::primitives::signal::{signal_with_equals, Signal};
use crate::queue::{NotifyMask, Queue};
use crate::reactivity::equality::never_equals;

/// An error boundary: a child owner/queue pair that captures the first
/// unhandled error from its subtree and exposes it as a reactive value.
pub struct ErrorBoundary {
    owner: Rc<Owner>,
    queue: Rc<Queue>,
    error: Signal<Option<ErrorPayload>>,
}

impl ErrorBoundary {
    pub fn owner(&self) -> &Rc<Owner> {
        &self.owner
    }

    /// The captured error, if any. Reading this inside a tracked
    /// computation subscribes to it like any other signal.
    pub fn error(&self) -> Option<ErrorPayload> {
        self.error.get()
    }

    pub fn has_error(&self) -> bool {
        self.error.get().is_some()
    }

    /// Run `f` with this boundary's owner installed as current, so signals,
    /// deriveds and effects created inside attach to its subtree.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        run_with_owner(&self.owner, f)
    }

    /// Clear the captured error and resume the subtree's paused queue.
    pub fn reset(&self) {
        self.error.set(None);
        self.queue.resume();
    }
}

/// Create an error boundary as a child of the current owner. `on_error` is
/// called (for logging, reporting, etc.) the first time an error is
/// captured; it does not influence whether the boundary absorbs it.
pub fn create_error_boundary(on_error: impl Fn(&ErrorPayload) + 'static) -> ErrorBoundary {
    let parent_owner = with_context(|ctx| ctx.owner_or_root());
    let queue = Queue::new_child(&parent_owner.queue());
    let owner = Owner::new_child_with_queue(&parent_owner, queue.clone());

    let error: Signal<Option<ErrorPayload>> = signal_with_equals(None, never_equals);

    let error_for_handler = error.clone();
    let queue_for_handler = queue.clone();
    owner.set_error_handler(move |err| {
        on_error(&err);
        error_for_handler.set(Some(err));
        queue_for_handler.pause();
        true
    });

    let error_for_notify = error.clone();
    let queue_for_notify = queue.clone();
    queue.set_notify_handler(move |mask, entering| {
        if mask != NotifyMask::Error {
            // Not ours to absorb; let an enclosing suspense boundary see it.
            return false;
        }
        if entering && error_for_notify.get().is_none() {
            queue_for_notify.pause();
        }
        true
    });

    ErrorBoundary { owner, queue, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::effect::effect;
    use crate::primitives::signal::signal;
    use std::cell::Cell;

    #[test]
    fn starts_out_without_an_error() {
        let boundary = create_error_boundary(|_| {});
        assert!(!boundary.has_error());
    }

    #[test]
    fn bare_signal_error_pauses_the_queue_without_a_captured_payload() {
        // A signal's captured error only reaches the boundary as a plain
        // ERROR notification (no payload travels with it); only an
        // unhandled effect error, routed through the owner tree, carries
        // enough to populate `error()`.
        let boundary = create_error_boundary(|_| {});
        let source = boundary.run(|| signal(0));

        source.set_error(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(!boundary.has_error());
        assert!(boundary.owner().queue().is_paused());
    }

    #[test]
    fn captures_an_unhandled_effect_error() {
        let seen = Rc::new(Cell::new(false));
        let seen_clone = seen.clone();
        let boundary = create_error_boundary(move |_| seen_clone.set(true));

        let a = boundary.run(|| signal(1));
        let a_clone = a.clone();
        let _handle = boundary.run(|| {
            effect(move || {
                if a_clone.get() == 2 {
                    crate::core::control::fail(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
                }
            })
        });

        a.set(2);
        assert!(seen.get());
        assert!(boundary.has_error());
    }

    #[test]
    fn reset_clears_the_capture_and_resumes_the_queue() {
        let boundary = create_error_boundary(|_| {});
        let a = boundary.run(|| signal(1));
        let a_clone = a.clone();
        let _handle = boundary.run(|| {
            effect(move || {
                if a_clone.get() == 2 {
                    crate::core::control::fail(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
                }
            })
        });

        a.set(2);
        assert!(boundary.has_error());
        assert!(boundary.owner().queue().is_paused());

        boundary.reset();
        assert!(!boundary.has_error());
        assert!(!boundary.owner().queue().is_paused());
    }
}
