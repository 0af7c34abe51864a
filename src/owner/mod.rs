// ============================================================================
// reactive-core - Ownership tree
//
// Generalizes the teacher's `primitives::scope::EffectScope` (a flat
// parent/child scope with a cleanup list and pause/resume) into a full
// ownership tree: each `Owner` also carries a context map keyed by
// identity tokens, an optional error handler, and a pointer to the
// scheduler queue its descendants enqueue work into.
// ============================================================================

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::core::context::with_context;
use crate::core::error::RuntimeError;
use crate::core::types::ErrorPayload;
use crate::queue::Queue;

/// Identity token for a context value, distinct per [`Context`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);

/// A typed key for values threaded down the ownership tree. Created once
/// (typically in a `static` or at setup time) and passed by reference to
/// `Owner::provide`/`Owner::get`.
pub struct Context<T> {
    id: ContextId,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Context<T> {
    pub fn new() -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for Context<T> {
    fn default() -> Self {
        Self::new()
    }
}

type ErrorHandler = dyn Fn(ErrorPayload) -> bool;

/// A node in the ownership tree. Owns a LIFO cleanup stack, a context
/// map, an optional error handler, and the scheduler queue its
/// descendants' effects enqueue into.
pub struct Owner {
    parent: RefCell<Option<Weak<Owner>>>,
    children: RefCell<Vec<Rc<Owner>>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    /// Runs once, during `dispose`, after children and `cleanups` have run.
    /// Distinct from `cleanups` so effects can reuse the same owner across
    /// reruns (`reset` drains `cleanups` every run) while keeping a single
    /// destruction step that only ever fires once (see `primitives::effect`).
    dispose_hook: RefCell<Option<Box<dyn FnOnce()>>>,
    context: RefCell<HashMap<ContextId, Rc<dyn Any>>>,
    error_handler: RefCell<Option<Box<ErrorHandler>>>,
    queue: Rc<Queue>,
    disposed: std::cell::Cell<bool>,
}

impl Owner {
    /// Create a detached root owner with its own queue.
    pub fn new_root() -> Rc<Self> {
        Self::new(None, Queue::new_root())
    }

    /// Create a child owner under `parent`, sharing (or, for a boundary,
    /// overriding via `queue`) the scheduler queue.
    pub fn new_child(parent: &Rc<Owner>) -> Rc<Self> {
        let child = Self::new(Some(Rc::downgrade(parent)), parent.queue.clone());
        parent.children.borrow_mut().push(child.clone());
        child
    }

    /// Create a child owner with its own queue (used by suspense/error
    /// boundaries, which need to intercept notifications separately).
    pub fn new_child_with_queue(parent: &Rc<Owner>, queue: Rc<Queue>) -> Rc<Self> {
        let child = Self::new(Some(Rc::downgrade(parent)), queue);
        parent.children.borrow_mut().push(child.clone());
        child
    }

    fn new(parent: Option<Weak<Owner>>, queue: Rc<Queue>) -> Rc<Self> {
        Rc::new(Self {
            parent: RefCell::new(parent),
            children: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
            dispose_hook: RefCell::new(None),
            context: RefCell::new(HashMap::new()),
            error_handler: RefCell::new(None),
            queue,
            disposed: std::cell::Cell::new(false),
        })
    }

    pub fn queue(&self) -> Rc<Queue> {
        self.queue.clone()
    }

    pub fn parent(&self) -> Option<Rc<Owner>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Register a cleanup to run (LIFO) when this owner is disposed.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) {
        self.cleanups.borrow_mut().push(Box::new(f));
    }

    /// Set the single hook that fires once, during `dispose`, after
    /// children and `cleanups` have run. Overwrites any previous hook.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        *self.dispose_hook.borrow_mut() = Some(Box::new(f));
    }

    /// Store a context value visible to this owner and its descendants.
    pub fn provide<T: 'static>(&self, ctx: &Context<T>, value: T) {
        self.context.borrow_mut().insert(ctx.id, Rc::new(value));
    }

    /// Look up a context value, walking up through ancestors.
    pub fn get<T: 'static>(self: &Rc<Self>, ctx: &Context<T>) -> Option<Rc<T>> {
        let mut current = Some(self.clone());
        while let Some(owner) = current {
            if let Some(value) = owner.context.borrow().get(&ctx.id) {
                if let Ok(downcast) = value.clone().downcast::<T>() {
                    return Some(downcast);
                }
            }
            current = owner.parent();
        }
        None
    }

    pub fn has_context<T: 'static>(self: &Rc<Self>, ctx: &Context<T>) -> bool {
        self.get(ctx).is_some()
    }

    /// Install this owner as an error boundary. `handler` returns `true`
    /// if it absorbed the error, `false` to let it keep bubbling up.
    pub fn set_error_handler(&self, handler: impl Fn(ErrorPayload) -> bool + 'static) {
        *self.error_handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Walk up from `self` looking for an owner willing to absorb `err`.
    /// Returns whether some ancestor handled it.
    pub fn handle_error(self: &Rc<Self>, err: ErrorPayload) -> bool {
        let mut current = Some(self.clone());
        while let Some(owner) = current {
            if let Some(handler) = owner.error_handler.borrow().as_ref() {
                if handler(err.clone()) {
                    return true;
                }
            }
            current = owner.parent();
        }
        false
    }

    /// Dispose every child and drain `cleanups` (LIFO) without marking
    /// this owner itself disposed or detaching it from its parent. Used
    /// to reuse an owner across reruns (an effect's scope between two
    /// executions of its body).
    pub fn reset(&self) {
        for child in self.children.take() {
            child.dispose();
        }
        for cleanup in self.cleanups.take().into_iter().rev() {
            cleanup();
        }
    }

    /// Detach this owner from its parent and run every cleanup (LIFO),
    /// recursing into children first so descendants tear down before
    /// their ancestor's own state disappears.
    pub fn dispose(self: &Rc<Self>) {
        if self.disposed.get() {
            return;
        }
        self.disposed.set(true);

        self.reset();

        if let Some(hook) = self.dispose_hook.borrow_mut().take() {
            hook();
        }

        if let Some(parent) = self.parent() {
            parent.children.borrow_mut().retain(|c| !Rc::ptr_eq(c, self));
        }
        trace!("owner disposed");
    }
}

/// Run `f` with a fresh detached root owner, returning its result. The
/// owner is handed to `f` so it can be disposed explicitly; callers that
/// don't need manual disposal can simply let it drop.
pub fn create_root<T>(f: impl FnOnce(Rc<Owner>) -> T) -> T {
    let owner = Owner::new_root();
    run_with_owner(&owner, || f(owner.clone()))
}

/// Run `f` with `owner` installed as the current owner, restoring the
/// previous one (if any) afterward, even on panic.
pub fn run_with_owner<T>(owner: &Rc<Owner>, f: impl FnOnce() -> T) -> T {
    with_context(|ctx| ctx.push_owner(owner.clone()));
    struct PopGuard;
    impl Drop for PopGuard {
        fn drop(&mut self) {
            with_context(|ctx| ctx.pop_owner());
        }
    }
    let _guard = PopGuard;
    f()
}

/// The owner active at the point this is called, if any.
pub fn get_owner() -> Option<Rc<Owner>> {
    with_context(|ctx| ctx.current_owner())
}

/// Register a cleanup on the current owner.
///
/// Returns an error if there is no active owner (calling this at module
/// scope outside of `create_root`/`run_with_owner`, for instance).
pub fn on_cleanup(f: impl FnOnce() + 'static) -> Result<(), RuntimeError> {
    match get_owner() {
        Some(owner) => {
            owner.on_cleanup(f);
            Ok(())
        }
        None => Err(RuntimeError::NoOwner),
    }
}
