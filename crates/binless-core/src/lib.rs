// =============================================================================
// Binless Core Library
// =============================================================================
//
// Pure Rust estimation of piecewise-constant signal on triangular contact
// grids. No Python code involved; the `binless` crate wraps this one.
//
// STRUCTURE:
// ----------
//   - grid:        triangle grid indexing, adjacency, trail decomposition
//   - solvers:     1D TV denoising, ADMM fused lasso, Brent line search
//   - sparsity:    patches, threshold candidates, BIC penalty selection
//   - signal:      observation table, residuals, outer estimation loop
//   - diagnostics: iteration observers and per-step snapshots
//   - error:       error type used throughout the library
//
// FOR MAINTAINERS:
// ----------------
// When adding new functionality:
//   1. Add it to the appropriate module (or create a new one)
//   2. Write tests in that module (see existing tests for examples)
//   3. Re-export public items here
//   4. Update the Python bindings in the `binless` crate
//
// =============================================================================

pub mod constants;
pub mod diagnostics;
pub mod error;
pub mod grid;
pub mod signal;
pub mod solvers;
pub mod sparsity;

pub use diagnostics::{IterationObserver, IterationSnapshot, LogObserver, NoopObserver};
pub use error::{BinlessError, Result};
pub use grid::{triangle_grid_chains, TrailSet, TriangleGrid};
pub use signal::{
    fit_binless, fit_binless_observed, BinlessConfig, BinlessResult, Observation, ResidualFamily,
    SignalData,
};
pub use solvers::{
    soft_threshold, FusedLassoConfig, FusedLassoSolver, GeneralizedFusedLassoEstimator, SolverState,
};
pub use sparsity::{
    optimize_lambda1, optimize_lambda1_ecprime, BinnedSignal, CalculationKind, Degeneracy, Offset,
    PatchGrouper, PenaltySelection, SearchPath, Sign, SparsityConfig,
};
