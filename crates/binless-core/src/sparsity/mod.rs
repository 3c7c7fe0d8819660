// =============================================================================
// Sparsity Penalty Selection
// =============================================================================
//
// After the fused lasso has smoothed the signal, a second penalty λ₁ zeroes
// out small patches by soft-thresholding around an offset. This module picks
// λ₁ (and, for difference maps, the offset) by minimising a BIC-like score:
//
//   patches     connected components of tolerance-equal adjacent cells
//   bounds      forbidden values and admissibility checks
//   candidates  λ₁ values where the number of surviving patches changes
//   selector    the two score functions and the search driving them
//
// The score is piecewise smooth with a jump every time a patch crosses the
// threshold, so a smooth line search is followed by explicit evaluation at
// nearby candidates.
//
// POLICIES:
// ---------
//   Sign        Any | Positive         sign constraint on the estimate
//   Degeneracy  Allow | Forbid         whether diagonal minima are forbidden
//   Offset      Zero | Estimated       offset held at zero or searched for
//   Kind        Signal | Difference    which score function applies
//
// =============================================================================

pub mod bounds;
pub mod candidates;
pub mod patches;
pub mod selector;

pub use bounds::{forbidden_values, minimum_upper_bound, BoundsChecker};
pub use candidates::CandidateGenerator;
pub use patches::{PatchGrouper, Patches};
pub use selector::{
    optimize_lambda1, optimize_lambda1_ecprime, DifferenceObjective, PenaltySelection,
    PenaltySelector, SearchPath, SignalObjective, SparsityObjective,
};

use ndarray::Array1;

use crate::error::{BinlessError, Result};
use crate::grid::TriangleGrid;

/// Sign constraint on the thresholded estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sign {
    #[default]
    Any,
    Positive,
}

/// Whether per-diagonal minima must stay inside the thresholded band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Degeneracy {
    Allow,
    #[default]
    Forbid,
}

/// How the soft-threshold offset is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Offset {
    #[default]
    Zero,
    Estimated,
}

/// Which quantity is being thresholded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalculationKind {
    /// Log signal of one dataset; offset fixed at zero.
    #[default]
    Signal,
    /// Log ratio between two datasets; offset estimated.
    Difference,
}

impl CalculationKind {
    pub fn offset(self) -> Offset {
        match self {
            CalculationKind::Signal => Offset::Zero,
            CalculationKind::Difference => Offset::Estimated,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Options for the penalty search.
#[derive(Debug, Clone)]
pub struct SparsityConfig {
    /// Tolerance for value equality and patch membership.
    /// Default: 1e-2
    pub tol_val: f64,

    /// Smallest λ₁ considered.
    /// Default: 0.0
    pub lambda1_min: f64,

    /// Candidates evaluated on each side of the line search minimum
    /// (signal maps).
    /// Default: 20
    pub refine_num: usize,

    /// Width, in percent of λ₁, of the refinement window (difference maps).
    /// Default: 10.0
    pub percent_closest: f64,

    pub sign: Sign,

    pub degeneracy: Degeneracy,
}

impl Default for SparsityConfig {
    fn default() -> Self {
        Self {
            tol_val: 1e-2,
            lambda1_min: 0.0,
            refine_num: 20,
            percent_closest: 10.0,
            sign: Sign::Any,
            degeneracy: Degeneracy::Forbid,
        }
    }
}

impl SparsityConfig {
    /// Configuration from the host flags `positive` and `constrained`.
    pub fn from_flags(tol_val: f64, positive: bool, constrained: bool) -> Self {
        Self {
            tol_val,
            sign: if positive { Sign::Positive } else { Sign::Any },
            degeneracy: if constrained {
                Degeneracy::Forbid
            } else {
                Degeneracy::Allow
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tol_val > 0.0) || !self.tol_val.is_finite() {
            return Err(BinlessError::InvalidValue(format!(
                "tol_val must be positive, got {}",
                self.tol_val
            )));
        }
        if !(self.lambda1_min >= 0.0) {
            return Err(BinlessError::InvalidValue(format!(
                "lambda1_min must be non-negative, got {}",
                self.lambda1_min
            )));
        }
        if !(self.percent_closest >= 0.0) {
            return Err(BinlessError::InvalidValue(format!(
                "percent_closest must be non-negative, got {}",
                self.percent_closest
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Input table
// =============================================================================

/// Per-cell inputs of the penalty search, one entry per grid cell in linear
/// index order.
#[derive(Debug, Clone)]
pub struct BinnedSignal {
    grid: TriangleGrid,
    /// Fused lasso solution.
    pub beta: Array1<f64>,
    /// Working estimate the solution is compared against.
    pub phihat: Array1<f64>,
    pub weight: Array1<f64>,
    /// Number of observations behind each cell.
    pub ncounts: Array1<f64>,
}

impl BinnedSignal {
    pub fn new(
        nbins: usize,
        beta: Array1<f64>,
        phihat: Array1<f64>,
        weight: Array1<f64>,
        ncounts: Array1<f64>,
    ) -> Result<Self> {
        let grid = TriangleGrid::new(nbins);
        let n = grid.ncells();
        if n == 0 {
            return Err(BinlessError::EmptyInput("grid has no cells".to_string()));
        }
        for (name, len) in [
            ("beta", beta.len()),
            ("phihat", phihat.len()),
            ("weight", weight.len()),
            ("ncounts", ncounts.len()),
        ] {
            if len != n {
                return Err(BinlessError::DimensionMismatch(format!(
                    "{} has {} entries but a grid of {} bins has {} cells",
                    name, len, nbins, n
                )));
            }
        }
        Ok(Self {
            grid,
            beta,
            phihat,
            weight,
            ncounts,
        })
    }

    pub fn grid(&self) -> &TriangleGrid {
        &self.grid
    }

    pub fn nbins(&self) -> usize {
        self.grid.nbins()
    }

    pub fn len(&self) -> usize {
        self.beta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beta.is_empty()
    }

    /// Counter-diagonal index of every cell.
    pub fn diag_idx(&self) -> Vec<usize> {
        self.grid.diagonal_indices()
    }

    /// `ln(Σ ncounts)`, the per-patch BIC penalty. 0 without counts.
    pub fn log_total_counts(&self) -> f64 {
        let total = self.ncounts.sum();
        if total > 0.0 {
            total.ln()
        } else {
            0.0
        }
    }
}
