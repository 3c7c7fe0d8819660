// =============================================================================
// Fused Lasso on the Triangle Grid (ADMM over trails)
// =============================================================================
//
// We solve
//
//     argmin_β  Σ_i w_i (y_i - β_i)²  +  λ₂ Σ_{i~j} |β_i - β_j|
//
// where i~j runs over physically adjacent grid cells. The 2D penalty is the
// sum of 1D penalties along the row and column trails, so we introduce one
// copy z_k of β for every trail entry k and solve the consensus problem
//
//     min  Σ w_i (y_i - β_i)² + λ₂ Σ_t TV(z_t)   s.t.  z_k = β_{cell(k)}
//
// with scaled-form ADMM. One iteration:
//
//   1. β-update, cell by cell (closed form):
//          β_i = (2 w_i y_i + α Σ_{k∈T(i)} (z_k - u_k)) / (2 w_i + α |T(i)|)
//      A zero weight simply drops the data term. |T(i)| >= 1 for every cell
//      so the denominator never vanishes.
//   2. z-update, trail by trail: exact 1D TV denoising of β_t + u_t with
//      penalty λ₂ / α.
//   3. u-update: u_k += β_{cell(k)} - z_k.
//   4. Residual balancing: when the primal residual ‖β_t - z‖ and the dual
//      residual α‖z - z_old‖ differ by more than a factor 10, α is scaled by
//      `inflate` (and u by its inverse, as u is the dual divided by α).
//
// CONVERGENCE
// -----------
// A small step in β does not mean β is close to the solution: with weights
// far below α each iteration moves β by a tiny fraction of the remaining
// distance. The slowest step ratio r over the last `ADMM_CONTRACTION_WINDOW`
// iterations bounds the contraction, and the remaining distance is
// estimated as max|Δβ| / (1 - r), relative to the range of the weighted
// data (1 when the data is flat). We stop once that estimate and the RMS
// primal residual are both below `converge`. Iterations that rebalance α
// restart the window, and α is frozen after `ADMM_ADAPTIVE_ITERATIONS`.
// Hitting the iteration cap is not an error: β is still the best current
// estimate and the state says why we stopped.
//
// =============================================================================

use std::collections::VecDeque;

use ndarray::Array1;

use crate::constants::{
    ADMM_ADAPTIVE_ITERATIONS, ADMM_CONTRACTION_WINDOW, ADMM_RESIDUAL_BALANCE, DEFAULT_ADMM_ALPHA, DEFAULT_ADMM_INFLATE, DEFAULT_ADMM_MAX_ITERATIONS,
};
use crate::error::{BinlessError, Result};
use crate::grid::TrailSet;
use crate::solvers::tv1d::tv1d_denoise;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration options for the ADMM fused lasso solver.
#[derive(Debug, Clone)]
pub struct FusedLassoConfig {
    /// Relative precision at which the inner loop stops.
    /// Default: 5e-4
    pub converge: f64,

    /// Initial ADMM step size.
    /// Default: 5.0
    pub alpha: f64,

    /// Step size adaptation factor (1 disables adaptation).
    /// Default: 2.0
    pub inflate: f64,

    /// Inner iteration cap per `optimize` call.
    /// Default: 10000
    pub max_iterations: usize,
}

impl Default for FusedLassoConfig {
    fn default() -> Self {
        Self {
            converge: 5e-4,
            alpha: DEFAULT_ADMM_ALPHA,
            inflate: DEFAULT_ADMM_INFLATE,
            max_iterations: DEFAULT_ADMM_MAX_ITERATIONS,
        }
    }
}

impl FusedLassoConfig {
    /// Default configuration with a given convergence threshold.
    pub fn with_converge(converge: f64) -> Self {
        Self {
            converge,
            ..Self::default()
        }
    }
}

// =============================================================================
// Solver state
// =============================================================================

/// Lifecycle of a solver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    /// No warm start has been provided yet.
    Uninitialized,
    /// `prepare` was called; `optimize` may run.
    Primed,
    /// The last `optimize` met the convergence criterion.
    Converged,
    /// The last `optimize` stopped at the iteration cap.
    MaxIterReached,
}

/// Summary of one `optimize` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStatus {
    pub state: SolverState,
    /// Inner ADMM iterations performed.
    pub iterations: usize,
    /// Estimated distance to the solution at exit, relative to the data
    /// range. Infinite when the solver stopped while α was still moving.
    pub precision: f64,
    /// Step size at exit.
    pub alpha: f64,
}

impl SolveStatus {
    pub fn converged(&self) -> bool {
        self.state == SolverState::Converged
    }
}

/// ADMM solver for the triangle grid fused lasso.
///
/// Owns its ADMM state (`beta`, `z`, `u`, `alpha`, iteration counter). The
/// state is reset by [`prepare`](Self::prepare) and carried across inner
/// iterations of [`optimize`](Self::optimize) only.
#[derive(Debug, Clone)]
pub struct FusedLassoSolver {
    config: FusedLassoConfig,
    trails: TrailSet,
    node_counts: Vec<f64>,
    state: SolverState,
    alpha: f64,
    counter: usize,
    beta: Array1<f64>,
    z: Vec<f64>,
    u: Vec<f64>,
}

impl FusedLassoSolver {
    /// Solver for a grid with `nrows` bins.
    pub fn new(nrows: usize, config: FusedLassoConfig) -> Self {
        Self::with_trails(TrailSet::triangle_grid(nrows), config)
    }

    /// Solver over an arbitrary trail decomposition.
    pub fn with_trails(trails: TrailSet, config: FusedLassoConfig) -> Self {
        let node_counts = trails.node_counts().into_iter().map(|c| c as f64).collect();
        let n = trails.nodes();
        let tsz = trails.len();
        let alpha = config.alpha;
        Self {
            config,
            trails,
            node_counts,
            state: SolverState::Uninitialized,
            alpha,
            counter: 0,
            beta: Array1::zeros(n),
            z: vec![0.0; tsz],
            u: vec![0.0; tsz],
        }
    }

    /// Number of grid cells.
    pub fn ncells(&self) -> usize {
        self.trails.nodes()
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Current estimate. Right after `prepare` this is the warm start.
    pub fn beta(&self) -> &Array1<f64> {
        &self.beta
    }

    /// Reset the ADMM state around a warm start.
    pub fn prepare(&mut self, beta_init: &Array1<f64>) -> Result<()> {
        if beta_init.len() != self.ncells() {
            return Err(BinlessError::DimensionMismatch(format!(
                "beta_init has {} elements but the grid has {} cells",
                beta_init.len(),
                self.ncells()
            )));
        }
        self.beta.assign(beta_init);
        for (zk, &cell) in self.z.iter_mut().zip(self.trails.flat()) {
            *zk = beta_init[cell];
        }
        self.u.iter_mut().for_each(|uk| *uk = 0.0);
        self.alpha = self.config.alpha;
        self.counter = 0;
        self.state = SolverState::Primed;
        Ok(())
    }

    /// Run ADMM on `Σ w(y-β)² + λ₂ TV(β)` from the primed state.
    pub fn optimize(&mut self, y: &Array1<f64>, w: &Array1<f64>, lambda2: f64) -> Result<SolveStatus> {
        self.validate(y, w, lambda2)?;

        let n = self.ncells();
        if n == 0 {
            self.state = SolverState::Converged;
            return Ok(self.status(0.0));
        }

        if lambda2 == 0.0 {
            // every cell independent: weighted least squares is y itself
            for ((b, &yi), &wi) in self.beta.iter_mut().zip(y.iter()).zip(w.iter()) {
                if wi > 0.0 {
                    *b = yi;
                }
            }
            let Self { trails, beta, z, u, .. } = self;
            for ((zk, uk), &cell) in z.iter_mut().zip(u.iter_mut()).zip(trails.flat()) {
                *zk = beta[cell];
                *uk = 0.0;
            }
            self.counter += 1;
            self.state = SolverState::Converged;
            return Ok(self.status(0.0));
        }

        let converge = self.config.converge;
        let inflate = self.config.inflate.max(1.0);
        let max_iterations = self.config.max_iterations;

        let Self {
            trails,
            node_counts,
            state,
            alpha,
            counter,
            beta,
            z,
            u,
            ..
        } = self;
        let flat = trails.flat();
        let tsz = flat.len();

        let mut consensus = vec![0.0; n];
        let mut target = vec![0.0; tsz];
        let mut z_old = vec![0.0; tsz];
        let mut beta_old = beta.clone();
        let mut changes: VecDeque<f64> = VecDeque::with_capacity(ADMM_CONTRACTION_WINDOW + 1);
        let mut precision = f64::INFINITY;
        let scale = data_range(y, w);

        *state = SolverState::MaxIterReached;
        while *counter < max_iterations {
            *counter += 1;
            beta_old.assign(beta);

            // β-update
            consensus.iter_mut().for_each(|c| *c = 0.0);
            for k in 0..tsz {
                consensus[flat[k]] += z[k] - u[k];
            }
            for i in 0..n {
                let denom = 2.0 * w[i] + *alpha * node_counts[i];
                if denom > 0.0 {
                    beta[i] = (2.0 * w[i] * y[i] + *alpha * consensus[i]) / denom;
                }
            }

            // z-update, one exact 1D solve per trail
            z_old.copy_from_slice(z);
            for k in 0..tsz {
                target[k] = beta[flat[k]] + u[k];
            }
            let mu = lambda2 / *alpha;
            for t in 0..trails.ntrails() {
                let range = trails.range(t);
                tv1d_denoise(&target[range.clone()], mu, &mut z[range]);
            }

            // u-update and residuals
            let mut primal_sq = 0.0;
            let mut dual_sq = 0.0;
            for k in 0..tsz {
                let diff = beta[flat[k]] - z[k];
                u[k] += diff;
                primal_sq += diff * diff;
                let dz = z[k] - z_old[k];
                dual_sq += dz * dz;
            }
            let primal = primal_sq.sqrt();
            let dual = *alpha * dual_sq.sqrt();

            let mut rebalanced = false;
            if inflate > 1.0 && *counter <= ADMM_ADAPTIVE_ITERATIONS {
                if primal > ADMM_RESIDUAL_BALANCE * dual {
                    *alpha *= inflate;
                    u.iter_mut().for_each(|uk| *uk /= inflate);
                    rebalanced = true;
                } else if dual > ADMM_RESIDUAL_BALANCE * primal {
                    *alpha /= inflate;
                    u.iter_mut().for_each(|uk| *uk *= inflate);
                    rebalanced = true;
                }
            }

            if rebalanced {
                changes.clear();
                precision = f64::INFINITY;
                continue;
            }
            if changes.len() > ADMM_CONTRACTION_WINDOW {
                changes.pop_front();
            }
            let step = beta
                .iter()
                .zip(beta_old.iter())
                .fold(0.0_f64, |d, (&a, &b)| d.max((a - b).abs()));
            changes.push_back(step);
            precision = remaining_distance(&changes) / scale;

            let primal_rms = primal / (tsz as f64).sqrt();
            if precision < converge && primal_rms < converge * scale {
                *state = SolverState::Converged;
                break;
            }
        }

        if self.state == SolverState::MaxIterReached {
            log::warn!(
                "fused lasso stopped after {} iterations at relative precision {:.3e}",
                self.counter,
                precision
            );
        } else {
            log::trace!(
                "fused lasso converged in {} iterations, alpha = {:.3}",
                self.counter,
                self.alpha
            );
        }
        Ok(self.status(precision))
    }

    fn status(&self, precision: f64) -> SolveStatus {
        SolveStatus {
            state: self.state,
            iterations: self.counter,
            precision,
            alpha: self.alpha,
        }
    }

    fn validate(&self, y: &Array1<f64>, w: &Array1<f64>, lambda2: f64) -> Result<()> {
        if self.state != SolverState::Primed {
            return Err(BinlessError::InvalidValue(
                "prepare must be called before every optimize".to_string(),
            ));
        }
        let n = self.ncells();
        if y.len() != n || w.len() != n {
            return Err(BinlessError::DimensionMismatch(format!(
                "y has {} and w has {} elements but the grid has {} cells",
                y.len(),
                w.len(),
                n
            )));
        }
        if !(lambda2 >= 0.0) || !lambda2.is_finite() {
            return Err(BinlessError::InvalidValue(format!(
                "lambda2 must be finite and non-negative, got {}",
                lambda2
            )));
        }
        if w.iter().any(|&wi| !(wi >= 0.0)) {
            return Err(BinlessError::InvalidValue(
                "weights must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// `max|new - old|` relative to the range of `new` (absolute when flat).
pub(crate) fn relative_change(new: &Array1<f64>, old: &Array1<f64>) -> f64 {
    let mut delta: f64 = 0.0;
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for (&a, &b) in new.iter().zip(old.iter()) {
        delta = delta.max((a - b).abs());
        lo = lo.min(a);
        hi = hi.max(a);
    }
    let range = hi - lo;
    if range > 0.0 {
        delta / range
    } else {
        delta
    }
}

/// Range of `y` over cells with positive weight, or 1 when that is flat.
fn data_range(y: &Array1<f64>, w: &Array1<f64>) -> f64 {
    let (lo, hi) = y
        .iter()
        .zip(w.iter())
        .filter(|(_, &wi)| wi > 0.0)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (&yi, _)| (lo.min(yi), hi.max(yi)));
    let range = hi - lo;
    if range > 0.0 {
        range
    } else {
        1.0
    }
}

/// Distance left to the fixed point, `Δ / (1 - r)`, from the latest steps.
///
/// `r` is the largest ratio between consecutive steps in the window.
/// Infinite until the window is full or while the steps are not shrinking.
fn remaining_distance(changes: &VecDeque<f64>) -> f64 {
    let last = match changes.back() {
        Some(&last) => last,
        None => return f64::INFINITY,
    };
    if last == 0.0 {
        return 0.0;
    }
    if changes.len() <= ADMM_CONTRACTION_WINDOW {
        return f64::INFINITY;
    }
    let rate = changes
        .iter()
        .zip(changes.iter().skip(1))
        .map(|(&prev, &next)| if prev > 0.0 { next / prev } else { f64::INFINITY })
        .fold(0.0_f64, f64::max);
    if rate < 1.0 {
        last / (1.0 - rate)
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn objective(beta: &Array1<f64>, y: &Array1<f64>, w: &Array1<f64>, lambda2: f64, nrows: usize) -> f64 {
        let fit: f64 = (0..beta.len()).map(|i| w[i] * (y[i] - beta[i]).powi(2)).sum();
        let tv: f64 = crate::grid::TriangleGrid::new(nrows)
            .adjacent_pairs()
            .iter()
            .map(|&(i, j)| (beta[i] - beta[j]).abs())
            .sum();
        fit + lambda2 * tv
    }

    #[test]
    fn test_get_beta_before_optimize_returns_warm_start() {
        let mut solver = FusedLassoSolver::new(3, FusedLassoConfig::default());
        let init = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        solver.prepare(&init).unwrap();
        assert_eq!(solver.state(), SolverState::Primed);
        assert_eq!(solver.beta(), &init);
    }

    #[test]
    fn test_optimize_requires_prepare() {
        let mut solver = FusedLassoSolver::new(2, FusedLassoConfig::default());
        let y = Array1::zeros(3);
        let w = Array1::ones(3);
        assert!(solver.optimize(&y, &w, 1.0).is_err());
    }

    #[test]
    fn test_zero_penalty_returns_data() {
        let mut solver = FusedLassoSolver::new(3, FusedLassoConfig::default());
        let y = array![0.5, -1.0, 2.0, 3.25, 0.0, 7.0];
        let w = array![1.0, 10.0, 0.1, 3.0, 2.0, 0.5];
        solver.prepare(&Array1::zeros(6)).unwrap();
        let status = solver.optimize(&y, &w, 0.0).unwrap();
        assert!(status.converged());
        assert_eq!(solver.beta(), &y);
    }

    #[test]
    fn test_zero_penalty_keeps_warm_start_for_zero_weight() {
        let mut solver = FusedLassoSolver::new(2, FusedLassoConfig::default());
        let y = array![1.0, 2.0, 3.0];
        let w = array![1.0, 0.0, 1.0];
        solver.prepare(&array![9.0, 9.0, 9.0]).unwrap();
        solver.optimize(&y, &w, 0.0).unwrap();
        assert_eq!(solver.beta(), &array![1.0, 9.0, 3.0]);
    }

    #[test]
    fn test_uniform_data_stays_uniform() {
        let mut solver = FusedLassoSolver::new(3, FusedLassoConfig::default());
        let y = Array1::from_elem(6, 0.7);
        let w = Array1::ones(6);
        solver.prepare(&Array1::zeros(6)).unwrap();
        let status = solver.optimize(&y, &w, 1.0).unwrap();
        assert!(status.converged());
        for &b in solver.beta().iter() {
            assert!((b - 0.7).abs() < 1e-3, "beta = {}", b);
        }
    }

    #[test]
    fn test_zero_weights_do_not_break_solver() {
        let mut solver = FusedLassoSolver::new(3, FusedLassoConfig::default());
        let y = array![1.0, 1.0, 1.0, 5.0, 5.0, 5.0];
        let w = array![1.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        solver.prepare(&Array1::zeros(6)).unwrap();
        solver.optimize(&y, &w, 0.5).unwrap();
        assert!(solver.beta().iter().all(|b| b.is_finite()));
    }

    #[test]
    fn test_large_penalty_fuses_everything() {
        let mut solver = FusedLassoSolver::new(3, FusedLassoConfig::with_converge(1e-6));
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let w = Array1::ones(6);
        solver.prepare(&Array1::zeros(6)).unwrap();
        solver.optimize(&y, &w, 100.0).unwrap();
        let beta = solver.beta();
        for &b in beta.iter() {
            assert!((b - 3.5).abs() < 1e-2, "beta = {}", b);
        }
    }

    #[test]
    fn test_solution_is_near_optimal() {
        let nrows = 4;
        let mut solver = FusedLassoSolver::new(nrows, FusedLassoConfig::with_converge(1e-7));
        let y = array![0.0, 0.1, 2.0, 2.1, 0.2, 1.9, 2.2, 2.0, 2.1, 1.8];
        let w = array![1.0, 2.0, 1.0, 1.0, 3.0, 1.0, 1.0, 2.0, 1.0, 1.0];
        let lambda2 = 0.3;
        solver.prepare(&Array1::zeros(10)).unwrap();
        solver.optimize(&y, &w, lambda2).unwrap();
        let beta = solver.beta().clone();
        let best = objective(&beta, &y, &w, lambda2, nrows);
        assert!(best <= objective(&y, &y, &w, lambda2, nrows) + 1e-6);
        for i in 0..beta.len() {
            for delta in [-0.05, 0.05] {
                let mut other = beta.clone();
                other[i] += delta;
                assert!(objective(&other, &y, &w, lambda2, nrows) >= best - 1e-3);
            }
        }
    }

    #[test]
    fn test_small_weights_do_not_stop_at_warm_start() {
        // weights far below alpha: each early step moves beta very little
        let nrows = 4;
        let mut solver = FusedLassoSolver::new(nrows, FusedLassoConfig::with_converge(5e-4));
        let init = Array1::from_iter((0..10).map(|i| i as f64 / 9.0));
        let y = &init + 0.05;
        let w = Array1::from_elem(10, 0.002);
        let lambda2 = 1e-4;
        solver.prepare(&init).unwrap();
        let status = solver.optimize(&y, &w, lambda2).unwrap();
        assert!(status.iterations > 1);
        let beta = solver.beta().clone();
        // the warm start is 5e-5 worse than y itself
        let reached = objective(&beta, &y, &w, lambda2, nrows);
        assert!(reached < objective(&y, &y, &w, lambda2, nrows) + 5e-6, "objective = {}", reached);
        let moved = (0..10).map(|i| (beta[i] - init[i]).abs()).fold(0.0, f64::max);
        assert!(moved > 0.02, "beta moved by {}", moved);
    }

    #[test]
    fn test_remaining_distance_needs_shrinking_steps() {
        let flat: VecDeque<f64> = std::iter::repeat(1e-5).take(ADMM_CONTRACTION_WINDOW + 1).collect();
        assert_eq!(remaining_distance(&flat), f64::INFINITY);
        let short: VecDeque<f64> = [1e-3, 1e-4].into_iter().collect();
        assert_eq!(remaining_distance(&short), f64::INFINITY);
        let halving: VecDeque<f64> = (0..=ADMM_CONTRACTION_WINDOW).map(|k| 0.5f64.powi(k as i32)).collect();
        let last = 0.5f64.powi(ADMM_CONTRACTION_WINDOW as i32);
        assert!((remaining_distance(&halving) - 2.0 * last).abs() < 1e-15);
        assert_eq!(remaining_distance(&[1.0, 0.0].into_iter().collect()), 0.0);
    }

    #[test]
    fn test_iteration_cap_is_reported() {
        let config = FusedLassoConfig {
            converge: 1e-14,
            max_iterations: 3,
            ..FusedLassoConfig::default()
        };
        let mut solver = FusedLassoSolver::new(4, config);
        let y = Array1::from_iter((0..10).map(|i| (i as f64).sin()));
        solver.prepare(&Array1::zeros(10)).unwrap();
        let status = solver.optimize(&y, &Array1::ones(10), 0.2).unwrap();
        assert_eq!(status.state, SolverState::MaxIterReached);
        assert_eq!(status.iterations, 3);
        assert!(solver.beta().iter().all(|b| b.is_finite()));
    }

    #[test]
    fn test_rejects_negative_weights_and_penalty() {
        let mut solver = FusedLassoSolver::new(2, FusedLassoConfig::default());
        solver.prepare(&Array1::zeros(3)).unwrap();
        assert!(solver.optimize(&Array1::zeros(3), &array![1.0, -1.0, 1.0], 1.0).is_err());
        assert!(solver.optimize(&Array1::zeros(3), &Array1::ones(3), -1.0).is_err());
        assert!(solver.optimize(&Array1::zeros(2), &Array1::ones(3), 1.0).is_err());
    }

    #[test]
    fn test_relative_change_flat_vector_is_absolute() {
        let a = array![1.0, 1.0];
        let b = array![0.5, 1.0];
        assert!((relative_change(&a, &b) - 0.5).abs() < 1e-15);
        let c = array![0.0, 2.0];
        let d = array![0.0, 1.0];
        assert!((relative_change(&c, &d) - 0.5).abs() < 1e-15);
    }
}
