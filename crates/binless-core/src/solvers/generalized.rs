// =============================================================================
// Generalized Fused Lasso Estimator
// =============================================================================
//
// Thin wrapper around the ADMM solver used by the outer loop. The fused lasso
// step only smooths: the sparsity part of the penalty (λ₁ around an offset)
// is applied afterwards by soft-thresholding the fused solution, which is
// exact for the 1-parameter family of fused-lasso-plus-lasso problems.
//
// =============================================================================

use ndarray::Array1;

use crate::error::{BinlessError, Result};
use crate::solvers::fused_lasso::{FusedLassoConfig, FusedLassoSolver, SolveStatus};
use crate::solvers::soft_threshold;

/// Fused lasso estimate plus soft-thresholded read-out.
#[derive(Debug, Clone)]
pub struct GeneralizedFusedLassoEstimator {
    solver: FusedLassoSolver,
    clamp: Option<f64>,
    optimized: bool,
}

impl GeneralizedFusedLassoEstimator {
    /// Estimator over a grid of `nrows` bins.
    ///
    /// `clamp` limits `|beta|` before thresholding; it is ignored unless
    /// strictly positive.
    pub fn new(nrows: usize, config: FusedLassoConfig, clamp: Option<f64>) -> Self {
        Self {
            solver: FusedLassoSolver::new(nrows, config),
            clamp: clamp.filter(|&c| c > 0.0),
            optimized: false,
        }
    }

    /// Warm-start the solver at `beta_init` and fit `y` with weights `w`.
    pub fn optimize(
        &mut self,
        y: &Array1<f64>,
        beta_init: &Array1<f64>,
        w: &Array1<f64>,
        lambda2: f64,
    ) -> Result<SolveStatus> {
        self.solver.prepare(beta_init)?;
        let status = self.solver.optimize(y, w, lambda2)?;
        self.optimized = true;
        Ok(status)
    }

    /// Fused solution, clamped when a limit is set.
    pub fn beta(&self) -> Result<Array1<f64>> {
        if !self.optimized {
            return Err(BinlessError::NotOptimized);
        }
        let beta = self.solver.beta();
        Ok(match self.clamp {
            Some(limit) => beta.mapv(|b| b.clamp(-limit, limit)),
            None => beta.clone(),
        })
    }

    /// Soft-thresholded solution `S(beta; offset, lambda1)`.
    pub fn get(&self, offset: f64, lambda1: f64) -> Result<Array1<f64>> {
        Ok(self.beta()?.mapv(|b| soft_threshold(b, offset, lambda1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_get_before_optimize_is_an_error() {
        let est = GeneralizedFusedLassoEstimator::new(2, FusedLassoConfig::default(), None);
        assert_eq!(est.get(0.0, 0.0), Err(BinlessError::NotOptimized));
        assert_eq!(est.beta(), Err(BinlessError::NotOptimized));
    }

    #[test]
    fn test_get_applies_soft_threshold() {
        let mut est = GeneralizedFusedLassoEstimator::new(2, FusedLassoConfig::default(), None);
        let y = array![3.0, -1.0, 0.5];
        est.optimize(&y, &Array1::zeros(3), &Array1::ones(3), 0.0).unwrap();
        assert_eq!(est.get(0.0, 0.0).unwrap(), y);
        assert_eq!(est.get(0.0, 1.0).unwrap(), array![2.0, 0.0, 0.0]);
        assert_eq!(est.get(1.0, 0.5).unwrap(), array![1.5, -1.5, 0.0]);
    }

    #[test]
    fn test_clamp_limits_magnitude() {
        let mut est = GeneralizedFusedLassoEstimator::new(2, FusedLassoConfig::default(), Some(2.0));
        let y = array![5.0, -7.0, 1.0];
        est.optimize(&y, &Array1::zeros(3), &Array1::ones(3), 0.0).unwrap();
        assert_eq!(est.get(0.0, 0.0).unwrap(), array![2.0, -2.0, 1.0]);
    }

    #[test]
    fn test_non_positive_clamp_is_ignored() {
        let mut est = GeneralizedFusedLassoEstimator::new(1, FusedLassoConfig::default(), Some(0.0));
        est.optimize(&array![9.0], &array![0.0], &array![1.0], 0.0).unwrap();
        assert_eq!(est.get(0.0, 0.0).unwrap(), array![9.0]);
    }

    #[test]
    fn test_get_is_read_only() {
        let mut est = GeneralizedFusedLassoEstimator::new(2, FusedLassoConfig::default(), None);
        est.optimize(&array![1.0, 2.0, 3.0], &Array1::zeros(3), &Array1::ones(3), 0.0)
            .unwrap();
        let first = est.get(0.5, 0.25).unwrap();
        let _ = est.get(10.0, 3.0).unwrap();
        assert_eq!(est.get(0.5, 0.25).unwrap(), first);
    }
}
