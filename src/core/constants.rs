// ============================================================================
// reactive-core - Constants
// Flag bits shared by every cell in the dependency graph
// ============================================================================

// =============================================================================
// CELL KIND FLAGS
// =============================================================================

/// Plain writable source (a signal).
pub const SOURCE: u32 = 1 << 0;

/// Lazily-recomputed derived value.
pub const DERIVED: u32 = 1 << 1;

/// Side-effecting reaction (never a source for other cells).
pub const EFFECT: u32 = 1 << 2;

/// Effect fires in the render phase of a flush.
pub const RENDER_EFFECT: u32 = 1 << 3;

/// Effect fires in the user phase of a flush.
pub const USER_EFFECT: u32 = 1 << 4;

/// Effect is always considered observed and runs during the pure phase
/// regardless of downstream demand (an `EagerComputation`).
pub const EAGER: u32 = 1 << 5;

// =============================================================================
// STATUS FLAGS (mutually exclusive, see STATUS_MASK)
// =============================================================================

/// Up to date; value and all sources are current.
pub const CLEAN: u32 = 1 << 10;

/// An upstream source changed identity but may still compare equal;
/// sources must be checked before recomputing.
pub const CHECK: u32 = 1 << 11;

/// Known out of date; must recompute on next demand.
pub const DIRTY: u32 = 1 << 12;

// =============================================================================
// ORTHOGONAL STATE FLAGS
// =============================================================================

/// An upstream dependency is in a waiting (not-yet-ready) state.
pub const LOADING: u32 = 1 << 16;

/// This cell (or an upstream) is propagating a captured error.
pub const ERROR: u32 = 1 << 17;

// =============================================================================
// LIFECYCLE / REENTRANCY FLAGS
// =============================================================================

/// The cell is currently executing its compute function; used to detect
/// a cell re-entering its own `update` (a dependency cycle).
pub const UPDATING: u32 = 1 << 20;

/// The cell has been disposed; no further scheduling or reads are valid.
pub const DESTROYED: u32 = 1 << 21;

/// The cell is paused (inside a paused owner/queue); writes are recorded
/// but effects do not fire until resumed.
pub const INERT: u32 = 1 << 22;

// =============================================================================
// MASKS
// =============================================================================

/// Mask covering the three mutually-exclusive status bits.
pub const STATUS_MASK: u32 = !(CLEAN | CHECK | DIRTY);
