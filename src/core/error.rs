// ============================================================================
// reactive-core - Error kinds
// ============================================================================
//
// `NotReady` is deliberately NOT a `RuntimeError` variant: it is raised and
// caught entirely inside `Computation::update` (see primitives::derived) and
// must never allocate or unwind past a single cell's recompute in the common
// case. `ReadError<E>` keeps that path monomorphic and allocation-free.
// ============================================================================

use std::fmt;

/// Distinguished marker: reading this cell would observe a dependency that is
/// still LOADING. Caught by a computation's `update`, never surfaced to user
/// code unless explicitly unwrapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotReady;

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read blocked on a LOADING dependency")
    }
}

impl std::error::Error for NotReady {}

/// The result of reading a cell that may be LOADING or carrying a captured
/// error of type `E`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError<E> {
    /// An upstream dependency has not resolved yet.
    NotReady,
    /// The cell (or an upstream) captured a user error during compute.
    Error(E),
}

impl<E: fmt::Display> fmt::Display for ReadError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::NotReady => write!(f, "read blocked on a LOADING dependency"),
            ReadError::Error(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ReadError<E> {}

/// Errors raised by scheduler/owner-level operations.
///
/// Deliberately excludes `NotReady`, which is a per-read control signal
/// rather than a runtime fault (see [`ReadError`]).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A context lookup found no value and no default was registered.
    #[error("no value found for this context key")]
    ContextNotFound,

    /// An operation requiring an active owner ran with none installed.
    #[error("operation requires an owner scope, but none is active")]
    NoOwner,

    /// A cell re-entered its own `update` while already updating.
    #[error("cycle detected: cell recomputation re-entered itself")]
    Cycle,

    /// `flush_sync` exceeded its configured iteration bound without
    /// reaching a quiescent state.
    #[error("flush did not converge after {0} iterations; likely an effect writing to its own dependency")]
    FlushBudgetExceeded(u32),

    /// A user error captured from a compute/effect body and re-raised
    /// because no boundary or error handler absorbed it.
    #[error("unhandled error escaped the reactive graph: {0}")]
    Captured(#[source] Box<dyn std::error::Error>),

    /// Attempted to attach the same boundary subtree under more than one
    /// parent owner; rejected rather than guessed at (see DESIGN.md).
    #[error("a boundary's subtree cannot be attached under more than one owner")]
    MultiParentBoundary,
}
