// ============================================================================
// reactive-core - Reactive Context
// Thread-local state for tracking the current reaction, owner, and clock
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::config::RuntimeConfig;
use super::types::{AnyReaction, AnySource};
use crate::owner::Owner;
use crate::queue::Queue;

// =============================================================================
// REACTIVE CONTEXT
// =============================================================================

/// Thread-local reactive context holding all global state for reactivity:
/// the current reaction/owner, dependency-tracking scratch space, the
/// batching depth, the global clock, and the runtime's configuration.
pub struct ReactiveContext {
    // =========================================================================
    // REACTION TRACKING
    // =========================================================================
    /// Currently executing reaction (effect or derived)
    pub active_reaction: RefCell<Option<Weak<dyn AnyReaction>>>,

    /// Currently executing effect (for effect tree management)
    pub active_effect: RefCell<Option<Weak<dyn AnyReaction>>>,

    /// Whether we're currently untracking (reading without creating dependencies)
    pub untracking: Cell<bool>,

    // =========================================================================
    // OWNERSHIP TREE
    // =========================================================================
    /// Stack of currently-active owners; the top is the owner new cells,
    /// cleanups, and child owners attach to.
    owner_stack: RefCell<Vec<Rc<Owner>>>,

    /// The always-present detached root owner, created lazily on first use.
    root_owner: RefCell<Option<Rc<Owner>>>,

    // =========================================================================
    // VERSION COUNTERS
    // =========================================================================
    /// Global write version - incremented on every signal write
    pub write_version: Cell<u32>,

    /// Global read version - incremented on every reaction run
    pub read_version: Cell<u32>,

    /// Monotonic clock, advanced exactly once per flush between the pure
    /// fixed point and the render phase. Cells stamp their creation time
    /// with this to short-circuit revalidation against older writes.
    clock: Cell<u64>,

    // =========================================================================
    // DEPENDENCY TRACKING (during reaction execution)
    // =========================================================================
    /// New dependencies collected during current reaction execution
    pub new_deps: RefCell<Vec<Rc<dyn AnySource>>>,

    /// Number of existing dependencies that matched (optimization)
    pub skipped_deps: Cell<usize>,

    /// Signals written to during current reaction (for self-invalidation detection)
    pub untracked_writes: RefCell<Vec<Rc<dyn AnySource>>>,

    // =========================================================================
    // BATCHING
    // =========================================================================
    /// Current batch depth (for nested batches)
    pub batch_depth: Cell<u32>,

    /// Whether we're currently flushing synchronously
    pub is_flushing_sync: Cell<bool>,

    // =========================================================================
    // CONFIG
    // =========================================================================
    config: Cell<RuntimeConfig>,
}

impl ReactiveContext {
    /// Create a new reactive context with default values
    pub fn new() -> Self {
        Self {
            active_reaction: RefCell::new(None),
            active_effect: RefCell::new(None),
            untracking: Cell::new(false),
            owner_stack: RefCell::new(Vec::new()),
            root_owner: RefCell::new(None),
            write_version: Cell::new(1),
            read_version: Cell::new(0),
            clock: Cell::new(0),
            new_deps: RefCell::new(Vec::new()),
            skipped_deps: Cell::new(0),
            untracked_writes: RefCell::new(Vec::new()),
            batch_depth: Cell::new(0),
            is_flushing_sync: Cell::new(false),
            config: Cell::new(RuntimeConfig::default()),
        }
    }

    // =========================================================================
    // REACTION TRACKING
    // =========================================================================

    /// Set the active reaction, returning the previous one
    pub fn set_active_reaction(
        &self,
        reaction: Option<Weak<dyn AnyReaction>>,
    ) -> Option<Weak<dyn AnyReaction>> {
        self.active_reaction.replace(reaction)
    }

    /// Get the active reaction
    pub fn get_active_reaction(&self) -> Option<Weak<dyn AnyReaction>> {
        self.active_reaction.borrow().clone()
    }

    /// Check if there's an active reaction
    pub fn has_active_reaction(&self) -> bool {
        self.active_reaction.borrow().is_some()
    }

    /// Set the active effect, returning the previous one
    pub fn set_active_effect(
        &self,
        effect: Option<Weak<dyn AnyReaction>>,
    ) -> Option<Weak<dyn AnyReaction>> {
        self.active_effect.replace(effect)
    }

    /// Get the active effect
    pub fn get_active_effect(&self) -> Option<Weak<dyn AnyReaction>> {
        self.active_effect.borrow().clone()
    }

    /// Set untracking mode, returning previous value
    pub fn set_untracking(&self, value: bool) -> bool {
        self.untracking.replace(value)
    }

    /// Check if currently untracking
    pub fn is_untracking(&self) -> bool {
        self.untracking.get()
    }

    // =========================================================================
    // OWNERSHIP TREE
    // =========================================================================

    fn root_owner(&self) -> Rc<Owner> {
        if let Some(owner) = self.root_owner.borrow().as_ref() {
            return owner.clone();
        }
        let owner = Owner::new_root();
        *self.root_owner.borrow_mut() = Some(owner.clone());
        owner
    }

    /// The innermost active owner, falling back to the lazily-created root.
    pub fn current_owner(&self) -> Option<Rc<Owner>> {
        self.owner_stack.borrow().last().cloned().or(None)
    }

    pub fn push_owner(&self, owner: Rc<Owner>) {
        self.owner_stack.borrow_mut().push(owner);
    }

    pub fn pop_owner(&self) {
        self.owner_stack.borrow_mut().pop();
    }

    /// The owner a freshly created primitive should attach to: the
    /// innermost active owner, or the lazily-created root if none is
    /// active.
    pub fn owner_or_root(&self) -> Rc<Owner> {
        match self.current_owner() {
            Some(owner) => owner,
            None => self.root_owner(),
        }
    }

    /// The queue new effects should enqueue into: the current owner's
    /// queue if one is active, otherwise the root queue.
    pub fn current_queue(&self) -> Rc<Queue> {
        match self.current_owner() {
            Some(owner) => owner.queue(),
            None => self.root_owner().queue(),
        }
    }

    /// The top-level queue that `flush_sync` drains.
    pub fn root_queue(&self) -> Rc<Queue> {
        self.root_owner().queue()
    }

    // =========================================================================
    // VERSION COUNTERS / CLOCK
    // =========================================================================

    /// Increment and return the write version
    pub fn increment_write_version(&self) -> u32 {
        let v = self.write_version.get() + 1;
        self.write_version.set(v);
        v
    }

    /// Get the current write version
    pub fn get_write_version(&self) -> u32 {
        self.write_version.get()
    }

    /// Increment and return the read version
    pub fn increment_read_version(&self) -> u32 {
        let v = self.read_version.get() + 1;
        self.read_version.set(v);
        v
    }

    /// Get the current read version
    pub fn get_read_version(&self) -> u32 {
        self.read_version.get()
    }

    /// The current value of the global clock.
    pub fn clock(&self) -> u64 {
        self.clock.get()
    }

    /// Advance the clock by one tick. Called exactly once per flush,
    /// between the pure fixed point and the render phase.
    pub fn advance_clock(&self) -> u64 {
        let next = self.clock.get() + 1;
        self.clock.set(next);
        next
    }

    // =========================================================================
    // DEPENDENCY TRACKING
    // =========================================================================

    /// Swap out the new_deps list, returning the old one
    pub fn swap_new_deps(&self, deps: Vec<Rc<dyn AnySource>>) -> Vec<Rc<dyn AnySource>> {
        self.new_deps.replace(deps)
    }

    /// Add a dependency to the new_deps list
    pub fn add_new_dep(&self, source: Rc<dyn AnySource>) {
        self.new_deps.borrow_mut().push(source);
    }

    /// Get the number of new deps collected
    pub fn new_dep_count(&self) -> usize {
        self.new_deps.borrow().len()
    }

    /// Set skipped_deps count, returning previous
    pub fn set_skipped_deps(&self, count: usize) -> usize {
        self.skipped_deps.replace(count)
    }

    /// Get skipped_deps count
    pub fn get_skipped_deps(&self) -> usize {
        self.skipped_deps.get()
    }

    /// Increment skipped_deps
    pub fn increment_skipped_deps(&self) {
        self.skipped_deps.set(self.skipped_deps.get() + 1);
    }

    /// Add an untracked write
    pub fn add_untracked_write(&self, source: Rc<dyn AnySource>) {
        self.untracked_writes.borrow_mut().push(source);
    }

    /// Clear untracked writes, returning them
    pub fn take_untracked_writes(&self) -> Vec<Rc<dyn AnySource>> {
        self.untracked_writes.replace(Vec::new())
    }

    // =========================================================================
    // BATCHING
    // =========================================================================

    /// Increment batch depth, returns new depth
    pub fn enter_batch(&self) -> u32 {
        let depth = self.batch_depth.get() + 1;
        self.batch_depth.set(depth);
        depth
    }

    /// Decrement batch depth, returns new depth
    pub fn exit_batch(&self) -> u32 {
        let depth = self.batch_depth.get().saturating_sub(1);
        self.batch_depth.set(depth);
        depth
    }

    /// Get current batch depth
    pub fn get_batch_depth(&self) -> u32 {
        self.batch_depth.get()
    }

    /// Check if currently in a batch
    pub fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }

    /// Set flushing sync mode, returning previous
    pub fn set_flushing_sync(&self, value: bool) -> bool {
        self.is_flushing_sync.replace(value)
    }

    /// Check if currently flushing synchronously
    pub fn is_flushing_sync(&self) -> bool {
        self.is_flushing_sync.get()
    }

    // =========================================================================
    // CONFIG
    // =========================================================================

    pub fn config(&self) -> RuntimeConfig {
        self.config.get()
    }

    pub fn set_config(&self, config: RuntimeConfig) {
        self.config.set(config);
    }
}

impl Default for ReactiveContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    /// The thread-local reactive context
    static CONTEXT: ReactiveContext = ReactiveContext::new();
}

/// Access the thread-local reactive context.
///
/// # Example
///
/// ```ignore
/// with_context(|ctx| {
///     ctx.increment_write_version();
/// });
/// ```
pub fn with_context<R>(f: impl FnOnce(&ReactiveContext) -> R) -> R {
    CONTEXT.with(f)
}

// =============================================================================
// CONVENIENCE FUNCTIONS
// =============================================================================

/// Check if currently tracking dependencies (inside a reaction, not untracking)
pub fn is_tracking() -> bool {
    with_context(|ctx| ctx.has_active_reaction() && !ctx.is_untracking())
}

/// Check if currently untracking
pub fn is_untracking() -> bool {
    with_context(|ctx| ctx.is_untracking())
}

/// Check if currently in a batch
pub fn is_batching() -> bool {
    with_context(|ctx| ctx.is_batching())
}

/// Get the current write version
pub fn write_version() -> u32 {
    with_context(|ctx| ctx.get_write_version())
}

/// Get the current read version
pub fn read_version() -> u32 {
    with_context(|ctx| ctx.get_read_version())
}

/// Get the current value of the global clock.
pub fn clock() -> u64 {
    with_context(|ctx| ctx.clock())
}

/// Set the runtime's configuration (flush iteration bound, etc).
pub fn set_config(config: RuntimeConfig) {
    with_context(|ctx| ctx.set_config(config));
}

// =============================================================================
// TESTS
// =============================================================================
