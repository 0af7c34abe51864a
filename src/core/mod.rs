// ============================================================================
// reactive-core - Core Module
// Fundamental types, traits, and context for the reactive system
// ============================================================================

pub mod config;
pub mod constants;
pub mod context;
pub mod control;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use config::RuntimeConfig;
pub use constants::*;
pub use context::{
    clock, is_batching, is_tracking, is_untracking, read_version, set_config, with_context,
    write_version, ReactiveContext,
};
pub use control::{fail, raise_error, raise_not_ready, run_tracked, ControlSignal};
pub use error::{NotReady, ReadError, RuntimeError};
pub use types::{default_equals, AnyReaction, AnySource, EqualsFn, ErrorPayload, SourceInner};
