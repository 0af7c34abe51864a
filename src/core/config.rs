// ============================================================================
// reactive-core - Runtime configuration
// ============================================================================

/// Tunables for the scheduler's flush loop. The teacher hardcodes its
/// `MAX_FLUSH_COUNT`; this generalizes it into a value the host can
/// override per `ReactiveContext` (useful for tests that want a tight
/// bound to catch runaway cycles quickly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on `flush_sync`'s pure-phase iterations before it is
    /// considered non-convergent.
    pub max_flush_iterations: u32,

    /// When the bound above is exceeded: `true` panics with
    /// [`crate::core::error::RuntimeError::FlushBudgetExceeded`], `false`
    /// logs a warning and returns, leaving the graph in whatever state it
    /// reached.
    pub panic_on_cycle: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_iterations: 100_000,
            panic_on_cycle: true,
        }
    }
}
