// ============================================================================
// reactive-core - Suspense boundary
//
// Installs a child queue that aggregates LOADING notifications from its
// subtree into a single reactive `pending` signal, and (outside of
// `ShowStale` mode) pauses that queue's render/user phases until the
// subtree is quiescent again.
// ============================================================================

use std::cell::Cell;
use std::rc::Rc;

use crate::core::context::with_context;
use crate::owner::{run_with_owner, Owner};
use crate::primitives::signal::{signal, Signal};
use crate::queue::{NotifyMask, Queue};

/// How a suspense boundary presents its subtree while pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspenseMode {
    /// Keep rendering the existing content; `pending()` is still reactive
    /// but the boundary never pauses its queue.
    ShowStale,
    /// Pause the subtree's render/user effects until quiescent, presumably
    /// swapped for a fallback by the caller while `is_pending()` is true.
    Hide,
    /// Like `Hide`, but intended for callers that keep the previous tree
    /// live and commit the new one only once it stops being pending (the
    /// core does not itself hold two trees; it only gates the timing).
    Transition,
}

/// A suspense boundary: a child owner/queue pair that tracks how many
/// LOADING notifications from its subtree are currently outstanding.
pub struct Suspense {
    owner: Rc<Owner>,
    queue: Rc<Queue>,
    mode: SuspenseMode,
    pending: Signal<bool>,
}

impl Suspense {
    pub fn owner(&self) -> &Rc<Owner> {
        &self.owner
    }

    pub fn mode(&self) -> SuspenseMode {
        self.mode
    }

    /// Whether any LOADING notification from the subtree is still
    /// outstanding. Reading this inside a tracked computation subscribes
    /// to it like any other signal.
    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// The reactive pending flag itself, for composing into derived views.
    pub fn pending_signal(&self) -> Signal<bool> {
        self.pending.clone()
    }

    /// Run `f` with this boundary's owner installed as current, so signals,
    /// deriveds and effects created inside attach to its subtree.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        run_with_owner(&self.owner, f)
    }
}

/// Create a suspense boundary as a child of the current owner.
pub fn create_suspense(mode: SuspenseMode) -> Suspense {
    let parent_owner = with_context(|ctx| ctx.owner_or_root());
    let queue = Queue::new_child(&parent_owner.queue());
    let owner = Owner::new_child_with_queue(&parent_owner, queue.clone());

    let pending = signal(false);
    let loading_count = Rc::new(Cell::new(0u32));

    let pending_for_handler = pending.clone();
    let queue_for_handler = queue.clone();
    queue.set_notify_handler(move |mask, entering| {
        if mask != NotifyMask::Loading {
            // Not ours to absorb; let an enclosing error boundary see it.
            return false;
        }

        let count = if entering {
            loading_count.set(loading_count.get() + 1);
            loading_count.get()
        } else {
            let next = loading_count.get().saturating_sub(1);
            loading_count.set(next);
            next
        };

        let now_pending = count > 0;
        if pending_for_handler.get() != now_pending {
            pending_for_handler.set(now_pending);
        }
        if !now_pending && matches!(mode, SuspenseMode::Hide | SuspenseMode::Transition) {
            queue_for_handler.resume();
        }
        true
    });

    if matches!(mode, SuspenseMode::Hide | SuspenseMode::Transition) {
        queue.pause();
    }

    Suspense { owner, queue, mode, pending }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::signal::signal as make_signal;

    #[test]
    fn starts_out_not_pending() {
        let boundary = create_suspense(SuspenseMode::ShowStale);
        assert!(!boundary.is_pending());
    }

    #[test]
    fn loading_notification_sets_pending_and_clearing_resolves_it() {
        let boundary = create_suspense(SuspenseMode::ShowStale);
        let source = boundary.run(|| make_signal(0));

        source.set_loading();
        assert!(boundary.is_pending());

        source.clear_loading();
        assert!(!boundary.is_pending());
    }

    #[test]
    fn hide_mode_pauses_until_quiescent() {
        let boundary = create_suspense(SuspenseMode::Hide);
        assert!(boundary.owner().queue().is_paused());

        let source = boundary.run(|| make_signal(0));
        source.set_loading();
        assert!(boundary.owner().queue().is_paused());

        source.clear_loading();
        assert!(!boundary.owner().queue().is_paused());
    }

    #[test]
    fn show_stale_mode_never_pauses() {
        let boundary = create_suspense(SuspenseMode::ShowStale);
        let source = boundary.run(|| make_signal(0));
        source.set_loading();
        assert!(!boundary.owner().queue().is_paused());
    }

    #[test]
    fn error_notifications_are_not_absorbed() {
        let boundary = create_suspense(SuspenseMode::ShowStale);
        let source = boundary.run(|| make_signal(0));
        source.set_error(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(!boundary.is_pending(), "an ERROR notification must not set the pending flag");
    }
}
