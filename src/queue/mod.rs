// ============================================================================
// reactive-core - Scheduler / Queue
//
// A tree of tiered effect queues. Every computation's owner holds the
// nearest enclosing queue; a boundary (suspense/error) installs a fresh
// child queue for its subtree so it can intercept LOADING/ERROR
// notifications before they reach the parent.
//
// Grounded on the teacher's `reactivity::scheduling`/`batching` flat
// pending-reaction list, generalized into the spec's pure/render/user
// tiers and a queue tree (the teacher has neither tiers nor hierarchy).
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::core::context::with_context;
use crate::core::error::RuntimeError;
use crate::core::types::AnyReaction;

/// Which slot a reaction is scheduled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Fixed-point recomputation stage; always populated alongside Render/User.
    Pure,
    /// Synchronous view-update effects; run after the clock advances.
    Render,
    /// Post-render side effects.
    User,
}

/// What a notification concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMask {
    Loading,
    Error,
}

type NotifyHandler = dyn Fn(NotifyMask, bool) -> bool;

/// A node in the scheduler's queue tree.
pub struct Queue {
    pure: RefCell<Vec<Weak<dyn AnyReaction>>>,
    render: RefCell<Vec<Weak<dyn AnyReaction>>>,
    user: RefCell<Vec<Weak<dyn AnyReaction>>>,
    children: RefCell<Vec<Rc<Queue>>>,
    parent: RefCell<Option<Weak<Queue>>>,
    running: Cell<bool>,
    /// Paused queues retain their effect-phase work instead of draining it;
    /// used by suspense in `hide`/`transition` mode.
    paused: Cell<bool>,
    notify_handler: RefCell<Option<Box<NotifyHandler>>>,
    self_weak: RefCell<Weak<Queue>>,
}

impl Queue {
    /// Create a detached root queue (no parent).
    pub fn new_root() -> Rc<Self> {
        Self::new(None)
    }

    /// Create a child queue of `parent`.
    pub fn new_child(parent: &Rc<Queue>) -> Rc<Self> {
        let child = Self::new(Some(Rc::downgrade(parent)));
        parent.children.borrow_mut().push(child.clone());
        child
    }

    fn new(parent: Option<Weak<Queue>>) -> Rc<Self> {
        let queue = Rc::new(Self {
            pure: RefCell::new(Vec::new()),
            render: RefCell::new(Vec::new()),
            user: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(parent),
            running: Cell::new(false),
            paused: Cell::new(false),
            notify_handler: RefCell::new(None),
            self_weak: RefCell::new(Weak::new()),
        });
        *queue.self_weak.borrow_mut() = Rc::downgrade(&queue);
        queue
    }

    pub fn parent(&self) -> Option<Rc<Queue>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    pub fn pause(&self) {
        self.paused.set(true);
    }

    /// Resume a paused queue, replaying its retained effect-phase work.
    pub fn resume(&self) {
        if !self.paused.get() {
            return;
        }
        self.paused.set(false);
        request_flush();
    }

    pub fn add_child(self: &Rc<Self>, child: Rc<Queue>) {
        *child.parent.borrow_mut() = Some(Rc::downgrade(self));
        self.children.borrow_mut().push(child);
    }

    pub fn remove_child(&self, child: &Rc<Queue>) {
        self.children.borrow_mut().retain(|c| !Rc::ptr_eq(c, child));
    }

    /// Install the handler deciding whether this queue absorbs a
    /// LOADING/ERROR notification from its subtree. Used by boundaries.
    /// The handler's `bool` argument is `true` when a cell is entering the
    /// state named by `mask`, `false` when one is leaving it.
    pub fn set_notify_handler(&self, handler: impl Fn(NotifyMask, bool) -> bool + 'static) {
        *self.notify_handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Schedule `reaction` into `tier`. Always recorded in the pure slot
    /// too (that's the signal that there is work); non-pure tiers get an
    /// additional entry in their own slot.
    pub fn enqueue(&self, tier: Tier, reaction: Weak<dyn AnyReaction>) {
        self.pure.borrow_mut().push(reaction.clone());
        match tier {
            Tier::Render => self.render.borrow_mut().push(reaction),
            Tier::User => self.user.borrow_mut().push(reaction),
            Tier::Pure => {}
        }
        request_flush();
    }

    /// A notification about a cell entering (`entering = true`) or leaving
    /// (`entering = false`) a LOADING/ERROR state. Forwarded to the parent
    /// unless a boundary handler absorbs it.
    pub fn notify(self: &Rc<Self>, mask: NotifyMask, entering: bool) {
        let absorbed = self
            .notify_handler
            .borrow()
            .as_ref()
            .map(|h| h(mask, entering))
            .unwrap_or(false);

        if !absorbed {
            if let Some(parent) = self.parent() {
                parent.notify(mask, entering);
            }
        }
    }

    fn has_pure_work(&self) -> bool {
        !self.pure.borrow().is_empty() || self.children.borrow().iter().any(|c| c.has_pure_work())
    }

    /// Drain one tier's slot, recursing into children. Returns whether
    /// more pure-tier work exists anywhere in the subtree afterward.
    pub fn run(&self, tier: Tier) -> bool {
        if self.paused.get() {
            return self.has_pure_work();
        }

        let items = match tier {
            Tier::Pure => self.pure.take(),
            Tier::Render => self.render.take(),
            Tier::User => self.user.take(),
        };

        for weak in items {
            let Some(reaction) = weak.upgrade() else { continue };
            if reaction.is_destroyed() {
                continue;
            }
            match tier {
                Tier::Pure => {
                    trace!("running pure-phase compute for a queued reaction");
                    reaction.update();
                }
                Tier::Render | Tier::User => {
                    reaction.run_effect_phase();
                }
            }
        }

        let mut more = !self.pure.borrow().is_empty();
        for child in self.children.borrow().iter() {
            if child.run(tier) {
                more = true;
            }
        }
        more
    }

    /// Run this queue (and descendants) to quiescence: pure phase to a
    /// fixed point, advance the clock once, then render, then user.
    /// Reentrant calls are no-ops; the outer flush continues draining.
    pub fn flush(self: &Rc<Self>) {
        if self.running.get() {
            return;
        }
        self.running.set(true);

        let mut did_pure_work = false;
        while self.has_pure_work() {
            did_pure_work = true;
            self.run(Tier::Pure);
        }

        if did_pure_work {
            with_context(|ctx| ctx.advance_clock());
        }

        self.run(Tier::Render);
        self.run(Tier::User);

        self.running.set(false);
    }
}

thread_local! {
    static FLUSH_REQUESTED: Cell<bool> = const { Cell::new(false) };
}

/// Ask the host to run a flush after the current synchronous region. With
/// no host scheduler installed this runs the flush immediately, matching
/// the teacher's "flush immediately unless batching" behavior.
fn request_flush() {
    let should_run_now = with_context(|ctx| !ctx.is_batching() && !ctx.is_flushing_sync());
    if should_run_now {
        flush_sync();
    } else {
        FLUSH_REQUESTED.with(|f| f.set(true));
    }
}

/// Synchronously flush the root queue until no further work is pending,
/// aborting with a diagnostic if it never converges (an effect writing to
/// a signal it depends on, for example).
pub fn flush_sync() {
    let root = with_context(|ctx| ctx.root_queue());
    let bound = with_context(|ctx| ctx.config().max_flush_iterations);

    let was_flushing = with_context(|ctx| {
        let was = ctx.is_flushing_sync();
        ctx.set_flushing_sync(true);
        was
    });
    if was_flushing {
        return;
    }

    FLUSH_REQUESTED.with(|f| f.set(false));

    let mut iterations: u32 = 0;
    loop {
        root.flush();
        iterations += 1;

        let more_requested = FLUSH_REQUESTED.with(|f| f.replace(false));
        if !more_requested && !root.has_pure_work() {
            break;
        }

        if iterations > bound {
            with_context(|ctx| ctx.set_flushing_sync(false));
            warn!(iterations, "flush_sync exceeded its iteration bound");
            if with_context(|ctx| ctx.config().panic_on_cycle) {
                panic!(
                    "{}",
                    RuntimeError::FlushBudgetExceeded(bound)
                );
            } else {
                return;
            }
        }
    }

    debug!(iterations, "flush_sync converged");
    with_context(|ctx| ctx.set_flushing_sync(false));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_queue_links_to_parent() {
        let root = Queue::new_root();
        let child = Queue::new_child(&root);
        assert!(Rc::ptr_eq(&child.parent().unwrap(), &root));
        assert_eq!(root.children.borrow().len(), 1);
    }

    #[test]
    fn remove_child_detaches() {
        let root = Queue::new_root();
        let child = Queue::new_child(&root);
        root.remove_child(&child);
        assert_eq!(root.children.borrow().len(), 0);
    }

    #[test]
    fn notify_forwards_to_parent_by_default() {
        let root = Queue::new_root();
        let child = Queue::new_child(&root);
        let seen = Rc::new(Cell::new(false));
        let seen_clone = seen.clone();
        root.set_notify_handler(move |_mask, _entering| {
            seen_clone.set(true);
            true
        });
        child.notify(NotifyMask::Loading, true);
        assert!(seen.get());
    }

    #[test]
    fn notify_handler_can_absorb() {
        let root = Queue::new_root();
        let child = Queue::new_child(&root);
        child.set_notify_handler(|_mask, _entering| true);
        let root_saw_it = Rc::new(Cell::new(false));
        let flag = root_saw_it.clone();
        root.set_notify_handler(move |_mask, _entering| {
            flag.set(true);
            true
        });
        child.notify(NotifyMask::Error, true);
        assert!(!root_saw_it.get(), "absorbed notification must not reach parent");
    }

    #[test]
    fn paused_queue_reports_pending_work_without_running() {
        let root = Queue::new_root();
        root.pause();
        assert!(!root.run(Tier::Render));
    }
}
