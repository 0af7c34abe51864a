// ============================================================================
// reactive-core - Suspense & error boundaries
//
// Neither primitive exists in the teacher; both are grounded on the same
// ownership/queue building blocks the teacher's `primitives::scope` and the
// scheduler already provide: a boundary is a child `Owner` paired with a
// child `Queue` that intercepts LOADING/ERROR notifications before they
// reach the parent queue.
// ============================================================================

pub mod error_boundary;
pub mod suspense;

pub use error_boundary::{create_error_boundary, ErrorBoundary};
pub use suspense::{create_suspense, Suspense, SuspenseMode};
