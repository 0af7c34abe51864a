// ============================================================================
// reactive-core - Dependency Tracking
// The core of the reactivity system - tracking reads and propagating writes
// ============================================================================
//
// The key challenge in Rust is borrow scoping: we must release RefCell
// borrows before mutating, using the "collect-then-mutate" pattern
// throughout this module.
// ============================================================================

use std::rc::Rc;

use crate::core::constants::*;
use crate::core::context::with_context;
use crate::core::types::{AnyReaction, AnySource};
use crate::queue::Tier;

// =============================================================================
// TRACK READ - Register dependency when reading a signal
// =============================================================================

/// Track a read of a source, registering it as a dependency if inside a reaction.
///
/// Called by `Signal::get()`/`Derived::get()` after reading the value.
pub fn track_read(source: Rc<dyn AnySource>) {
    with_context(|ctx| {
        if !ctx.has_active_reaction() || ctx.is_untracking() {
            return;
        }

        let reaction_weak = match ctx.get_active_reaction() {
            Some(r) => r,
            None => return,
        };

        let reaction = match reaction_weak.upgrade() {
            Some(r) => r,
            None => return,
        };

        if reaction.is_updating() {
            // Version-based deduplication: only add if not already tracked this cycle
            let read_version = ctx.get_read_version();

            if source.read_version() < read_version {
                source.set_read_version(read_version);
                ctx.add_new_dep(source.clone());
            }
        } else {
            reaction.add_dep(source.clone());
            source.add_reaction(Rc::downgrade(&reaction));
        }
    });
}

// =============================================================================
// NOTIFY WRITE - Called when a signal's value changes
// =============================================================================

/// Notify the reactive system that a source's value has changed.
///
/// Called by `Signal::set()`/`Signal::update()` after the value is updated.
/// Writing to a signal from inside a derived's compute body is a misuse of
/// the graph (deriveds must be pure) and is rejected rather than silently
/// tolerated.
pub fn notify_write(source: Rc<dyn AnySource>) {
    with_context(|ctx| {
        if let Some(reaction_weak) = ctx.get_active_reaction() {
            if let Some(reaction) = reaction_weak.upgrade() {
                if (reaction.flags() & DERIVED) != 0 {
                    panic!(
                        "cannot write to a signal inside a derived's compute; \
                         deriveds must be pure"
                    );
                }
            }
        }
    });

    mark_reactions(source, DIRTY);
}

// =============================================================================
// MARK REACTIONS - Propagate dirty state through the graph
// =============================================================================

/// Mark all reactions of a source with the given status.
///
/// Direct dependents get `status` (usually DIRTY); deriveds cascade CHECK
/// to their own dependents; eager computations (effects) newly marked
/// dirty get scheduled onto their owning queue's pure tier.
///
/// Uses an iterative approach with an explicit stack to avoid stack
/// overflow on deep dependency chains, and the "collect-then-mutate"
/// pattern to avoid `RefCell` borrow conflicts while cascading.
pub fn mark_reactions(source: Rc<dyn AnySource>, status: u32) {
    let mut to_schedule: Vec<Rc<dyn AnyReaction>> = Vec::new();

    let mut stack: Vec<(Rc<dyn AnySource>, u32)> = vec![(source, status)];

    while let Some((current_source, current_status)) = stack.pop() {
        current_source.cleanup_dead_reactions();

        let reactions: Vec<Rc<dyn AnyReaction>> = {
            let mut collected = Vec::new();
            current_source.for_each_reaction(&mut |reaction| {
                collected.push(reaction);
                true
            });
            collected
        };

        for reaction in reactions {
            let flags = reaction.flags();
            let not_dirty = (flags & DIRTY) == 0;

            if not_dirty {
                set_signal_status(&*reaction, current_status);
            }

            if (flags & DERIVED) != 0 {
                if let Some(derived_as_source) = reaction.as_derived_source() {
                    stack.push((derived_as_source, CHECK));
                }
            } else if not_dirty && (flags & EAGER) != 0 {
                to_schedule.push(reaction);
            }
        }
    }

    for reaction in to_schedule {
        schedule_eager(reaction);
    }
}

/// Enqueue a newly-dirtied eager computation (an effect) onto its own
/// owning queue, not whatever queue happens to be ambient at the write
/// site: a write from outside a paused boundary's scope must still land
/// on that boundary's (paused) queue, not slip onto the writer's.
fn schedule_eager(reaction: Rc<dyn AnyReaction>) {
    let queue = reaction.queue().unwrap_or_else(|| with_context(|ctx| ctx.current_queue()));
    let tier = if (reaction.flags() & RENDER_EFFECT) != 0 {
        Tier::Render
    } else {
        Tier::User
    };
    queue.enqueue(tier, Rc::downgrade(&reaction));
}

// =============================================================================
// SET SIGNAL STATUS - Helper to update status flags
// =============================================================================

/// Set the status flags of a reaction (CLEAN, DIRTY, CHECK), preserving
/// every other bit (kind flags, LOADING/ERROR, lifecycle flags).
pub fn set_signal_status(target: &dyn AnyReaction, status: u32) {
    let new_flags = (target.flags() & STATUS_MASK) | status;
    target.set_flags(new_flags);
}

/// Same operation for an `AnySource`.
pub fn set_source_status(target: &dyn AnySource, status: u32) {
    let new_flags = (target.flags() & STATUS_MASK) | status;
    target.set_flags(new_flags);
}

// =============================================================================
// IS DIRTY
// =============================================================================

/// Whether a reaction needs to update before its value can be trusted.
///
/// DIRTY is unconditional; CHECK means an upstream source's identity
/// changed but may still compare equal, so callers that can afford the
/// dependency walk (derived's `update`) should prefer that over this
/// conservative true.
pub fn is_dirty(reaction: &dyn AnyReaction) -> bool {
    let flags = reaction.flags();

    if (flags & DIRTY) != 0 {
        return true;
    }

    (flags & CHECK) != 0
}

// =============================================================================
// REMOVE REACTIONS - Clean up stale dependencies
// =============================================================================

/// Remove a reaction from its dependencies, starting at the given index.
pub fn remove_reactions(reaction: Rc<dyn AnyReaction>, start: usize) {
    let deps_to_remove: Vec<Rc<dyn AnySource>> = {
        let mut collected = Vec::new();
        let mut idx = 0;
        reaction.for_each_dep(&mut |dep| {
            if idx >= start {
                collected.push(dep.clone());
            }
            idx += 1;
            true
        });
        collected
    };

    for dep in deps_to_remove {
        dep.remove_reaction(&reaction);
    }

    reaction.remove_deps_from(start);
}

// =============================================================================
// INSTALL DEPENDENCIES - Wire up deps after reaction execution
// =============================================================================

/// Install new dependencies after a reaction's compute has run: drop deps
/// that weren't re-read this cycle, register the fresh ones.
pub fn install_dependencies(reaction: Rc<dyn AnyReaction>, skipped: usize) {
    with_context(|ctx| {
        let new_deps = ctx.swap_new_deps(Vec::new());

        if new_deps.is_empty() && skipped == 0 {
            reaction.clear_deps();
            return;
        }

        remove_reactions(reaction.clone(), skipped);

        for dep in &new_deps {
            reaction.add_dep(dep.clone());
            dep.add_reaction(Rc::downgrade(&reaction));
        }
    });
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::with_context;
    use crate::core::types::SourceInner;
    use std::any::Any;
    use std::cell::{Cell, RefCell};
    use std::rc::Weak;

    struct MockReaction {
        flags: Cell<u32>,
        deps: RefCell<Vec<Rc<dyn AnySource>>>,
    }

    impl MockReaction {
        fn new() -> Self {
            Self {
                flags: Cell::new(EFFECT | CLEAN),
                deps: RefCell::new(Vec::new()),
            }
        }
    }

    impl AnyReaction for MockReaction {
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
            self.deps.borrow_mut().retain(|dep| {
                let dep_ptr = Rc::as_ptr(dep) as *const ();
                dep_ptr != source_ptr
            });
        }

        fn update(&self) -> bool {
            false
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_derived_source(&self) -> Option<Rc<dyn AnySource>> {
            None
        }
    }

    #[test]
    fn track_read_outside_reaction_does_nothing() {
        let source: Rc<dyn AnySource> = Rc::new(SourceInner::new(42));
        track_read(source.clone());
        assert_eq!(source.reaction_count(), 0);
    }

    #[test]
    fn track_read_registers_dependency() {
        let source: Rc<dyn AnySource> = Rc::new(SourceInner::new(42));
        let reaction: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());

        with_context(|ctx| {
            ctx.set_active_reaction(Some(Rc::downgrade(&reaction)));
        });

        track_read(source.clone());

        with_context(|ctx| {
            ctx.set_active_reaction(None);
        });

        assert_eq!(reaction.dep_count(), 1);
        assert_eq!(source.reaction_count(), 1);
    }

    #[test]
    fn track_read_with_untracking_does_not_register() {
        let source: Rc<dyn AnySource> = Rc::new(SourceInner::new(42));
        let reaction: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());

        with_context(|ctx| {
            ctx.set_active_reaction(Some(Rc::downgrade(&reaction)));
            ctx.set_untracking(true);
        });

        track_read(source.clone());

        with_context(|ctx| {
            ctx.set_active_reaction(None);
            ctx.set_untracking(false);
        });

        assert_eq!(reaction.dep_count(), 0);
        assert_eq!(source.reaction_count(), 0);
    }

    #[test]
    fn mark_reactions_marks_direct_deps_dirty() {
        let source: Rc<dyn AnySource> = Rc::new(SourceInner::new(42));
        let reaction: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());

        source.add_reaction(Rc::downgrade(&reaction));
        assert!(reaction.is_clean());

        mark_reactions(source.clone(), DIRTY);

        assert!(reaction.is_dirty());
        assert!(!reaction.is_clean());
    }

    #[test]
    fn mark_reactions_does_not_downgrade_dirty_to_check() {
        let source: Rc<dyn AnySource> = Rc::new(SourceInner::new(42));
        let reaction: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());

        reaction.mark_dirty();
        source.add_reaction(Rc::downgrade(&reaction));

        mark_reactions(source.clone(), CHECK);

        assert!(reaction.is_dirty());
        assert!(!reaction.is_check());
    }

    #[test]
    fn is_dirty_reports_correctly() {
        let reaction: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());

        assert!(!is_dirty(&*reaction));

        reaction.mark_dirty();
        assert!(is_dirty(&*reaction));

        reaction.mark_check();
        assert!(is_dirty(&*reaction));

        reaction.mark_clean();
        assert!(!is_dirty(&*reaction));
    }

    #[test]
    fn remove_reactions_cleans_up_deps() {
        let source1: Rc<dyn AnySource> = Rc::new(SourceInner::new(1));
        let source2: Rc<dyn AnySource> = Rc::new(SourceInner::new(2));
        let source3: Rc<dyn AnySource> = Rc::new(SourceInner::new(3));
        let reaction: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());

        reaction.add_dep(source1.clone());
        reaction.add_dep(source2.clone());
        reaction.add_dep(source3.clone());

        source1.add_reaction(Rc::downgrade(&reaction));
        source2.add_reaction(Rc::downgrade(&reaction));
        source3.add_reaction(Rc::downgrade(&reaction));

        assert_eq!(reaction.dep_count(), 3);

        remove_reactions(reaction.clone(), 1);

        assert_eq!(reaction.dep_count(), 1);
        assert_eq!(source2.reaction_count(), 0);
        assert_eq!(source3.reaction_count(), 0);
        assert_eq!(source1.reaction_count(), 1);
    }

    #[test]
    fn borrow_safety_multiple_reactions() {
        let source: Rc<dyn AnySource> = Rc::new(SourceInner::new(42));
        let reaction1: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());
        let reaction2: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());
        let reaction3: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());

        source.add_reaction(Rc::downgrade(&reaction1));
        source.add_reaction(Rc::downgrade(&reaction2));
        source.add_reaction(Rc::downgrade(&reaction3));

        mark_reactions(source.clone(), DIRTY);

        assert!(reaction1.is_dirty());
        assert!(reaction2.is_dirty());
        assert!(reaction3.is_dirty());
    }

    #[test]
    fn version_based_deduplication() {
        let source: Rc<dyn AnySource> = Rc::new(SourceInner::new(42));
        let reaction: Rc<dyn AnyReaction> = Rc::new(MockReaction::new());

        reaction.set_flags(reaction.flags() | UPDATING);

        with_context(|ctx| {
            ctx.set_active_reaction(Some(Rc::downgrade(&reaction)));
            ctx.increment_read_version();

            track_read(source.clone());
            assert_eq!(ctx.new_dep_count(), 1);

            track_read(source.clone());
            assert_eq!(ctx.new_dep_count(), 1);

            ctx.set_active_reaction(None);
            ctx.swap_new_deps(Vec::new());
        });
    }
}
