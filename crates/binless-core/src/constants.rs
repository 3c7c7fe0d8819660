// =============================================================================
// Numeric Defaults
// =============================================================================
//
// Values shared between configuration defaults and the algorithms.
//
// =============================================================================

/// Initial ADMM step size.
pub const DEFAULT_ADMM_ALPHA: f64 = 5.0;

/// Factor applied to the ADMM step size when primal and dual residuals drift
/// apart.
pub const DEFAULT_ADMM_INFLATE: f64 = 2.0;

/// Inner ADMM iteration cap per optimization round.
pub const DEFAULT_ADMM_MAX_ITERATIONS: usize = 10_000;

/// Ratio between primal and dual residuals that triggers a step size change.
pub const ADMM_RESIDUAL_BALANCE: f64 = 10.0;

/// Number of ADMM iterations over which the contraction rate of β is
/// measured before a stop is allowed.
pub const ADMM_CONTRACTION_WINDOW: usize = 5;

/// ADMM iterations during which α may be rebalanced. α stays fixed after.
pub const ADMM_ADAPTIVE_ITERATIONS: usize = 500;

/// Iteration cap for the bounded Brent search.
pub const BRENT_MAX_ITERATIONS: usize = 1000;

/// Brent precision is limited to half the mantissa of an f64.
pub const BRENT_MAX_BITS: i32 = 26;

/// Ratio between the outer tolerance and the ADMM convergence threshold.
pub const ADMM_CONVERGE_DIVISOR: f64 = 20.0;
