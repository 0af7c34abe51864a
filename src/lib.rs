// ============================================================================
// reactive-core - A fine-grained reactive runtime core
// ============================================================================
//
// Signals, deriveds and effects wired through a tiered scheduler and an
// ownership tree with cleanup, context, and error handling. Suspense and
// error boundaries sit on top of the same owner/queue primitives; the
// `event` module ships the observer contract an upper event layer is
// expected to satisfy, not a stream implementation.
// ============================================================================

pub mod boundary;
pub mod core;
pub mod event;
pub mod owner;
pub mod primitives;
pub mod queue;
pub mod reactivity;

// Re-export core items at crate root for ergonomic access.
pub use core::constants;
pub use core::context::{
    is_batching, is_tracking, is_untracking, read_version, with_context, write_version,
    ReactiveContext,
};
pub use core::control::{fail, raise_error, raise_not_ready, run_tracked, ControlSignal};
pub use core::error::{NotReady, ReadError, RuntimeError};
pub use core::types::{default_equals, AnyReaction, AnySource, EqualsFn, ErrorPayload, SourceInner};
pub use core::RuntimeConfig;

// Re-export primitives at crate root.
pub use primitives::derived::{derived, derived_with_equals, Derived, DerivedInner};
pub use primitives::effect::{
    effect, effect_with_cleanup, render_effect, CleanupFn, Effect, EffectInner,
};
pub use primitives::signal::{signal, signal_with_equals, source, Signal, SourceOptions};

// Re-export the scheduler.
pub use queue::{flush_sync, NotifyMask, Queue, Tier};

// Re-export the ownership tree.
pub use owner::{create_root, get_owner, on_cleanup, run_with_owner, Context, ContextId, Owner};

// Re-export boundaries.
pub use boundary::{create_error_boundary, create_suspense, ErrorBoundary, Suspense, SuspenseMode};

// Re-export the event-layer contract.
pub use event::{Emitter, Handler, Never, Observer, Once};

// Re-export reactivity functions.
pub use reactivity::batching::{batch, peek, tick, untrack};
pub use reactivity::equality::{always_equals, default_equals_fn, equals, never_equals};
pub use reactivity::introspection::{
    flatten, get_observer, has_updated, is_pending, latest, run_with_observer, Readable,
};
pub use reactivity::tracking::{
    is_dirty, install_dependencies, mark_reactions, notify_write, remove_reactions,
    set_signal_status, set_source_status, track_read,
};
