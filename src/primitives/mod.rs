// ============================================================================
// reactive-core - Primitives Module
// Core reactive primitives: signal, derived, effect
// ============================================================================

pub mod derived;
pub mod effect;
pub mod signal;

pub use derived::{derived, derived_with_equals, Derived, DerivedInner};
pub use effect::{effect, effect_with_cleanup, render_effect, CleanupFn, Effect, EffectInner};
pub use signal::{signal, signal_with_equals, source, Signal, SourceOptions};
