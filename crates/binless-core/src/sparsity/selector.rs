// =============================================================================
// Penalty Selection by BIC
// =============================================================================
//
// For a fixed fused solution β, the thresholded estimate S(β; c, λ₁) and its
// degrees of freedom (number of distinct patches that stay non-zero) depend
// only on λ₁ and the offset c. We score each choice with
//
//     BIC = Σ w (φ̂ - fit)²  +  ln(Σ ncounts) · dof
//
// and minimise it over log10(λ₁).
//
// Two score functions exist and they are NOT the same up to a parameter:
//
//   Signal      c = 0, fit = S(β; 0, λ₁),
//               infeasible if a forbidden value lies outside ±(λ₁ + tol/2)
//   Difference  c chosen from λ₁ and the patch range, fit = S(β; c, λ₁) + c,
//               infeasible if a forbidden value lies outside c ± (λ₁ + tol)
//
// Infeasible choices score +∞ so the line search walks away from them.
//
// SEARCH
// ------
// Border cases are answered in closed form (single patch, empty interval).
// Otherwise a bounded Brent search runs on log10(λ₁) with a precision
// derived from tol, and the result is refined by scoring nearby candidates:
// the score jumps where a patch crosses the threshold and Brent alone can
// stop on the wrong side of a jump.
//
// =============================================================================

use crate::constants::BRENT_MAX_ITERATIONS;
use crate::error::Result;
use crate::solvers::brent::{bits_from_tolerance, brent_minimize_bits};
use crate::solvers::soft_threshold;
use crate::sparsity::bounds::{forbidden_values, minimum_upper_bound, Bounds, BoundsChecker};
use crate::sparsity::candidates::CandidateGenerator;
use crate::sparsity::patches::{PatchGrouper, Patches};
use crate::sparsity::{BinnedSignal, CalculationKind, SparsityConfig};

/// Score of one (offset, λ₁) choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub lambda1: f64,
    pub ecprime: f64,
    /// `+∞` when the choice violates the degeneracy constraint.
    pub bic: f64,
    /// `None` when infeasible.
    pub dof: Option<usize>,
}

impl Evaluation {
    fn infeasible(lambda1: f64, ecprime: f64) -> Self {
        Self {
            lambda1,
            ecprime,
            bic: f64::INFINITY,
            dof: None,
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.dof.is_some()
    }
}

/// How a selection was reached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchPath {
    /// Only one patch: nothing to threshold.
    SinglePatch,
    /// The admissible interval is empty or a single point.
    CollapsedInterval,
    /// Line search followed by candidate refinement.
    Brent { iterations: usize, converged: bool },
}

/// Selected penalty and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltySelection {
    pub lambda1: f64,
    pub ecprime: f64,
    pub bic: f64,
    pub dof: Option<usize>,
    pub path: SearchPath,
}

impl PenaltySelection {
    fn from_evaluation(eval: Evaluation, path: SearchPath) -> Self {
        Self {
            lambda1: eval.lambda1,
            ecprime: eval.ecprime,
            bic: eval.bic,
            dof: eval.dof,
            path,
        }
    }
}

/// A BIC score as a function of λ₁.
pub trait SparsityObjective {
    fn evaluate(&self, lambda1: f64) -> Evaluation;

    /// Score at `log10(λ₁) = x`, the line search variable.
    fn score(&self, x: f64) -> f64 {
        self.evaluate(10f64.powf(x)).bic
    }
}

// =============================================================================
// Shared scoring
// =============================================================================

/// Data and patch structure every score function reads.
#[derive(Debug, Clone, Copy)]
struct ScoreData<'a> {
    binned: &'a BinnedSignal,
    membership: &'a [usize],
    npatches: usize,
    penalty: f64,
    tol: f64,
}

impl<'a> ScoreData<'a> {
    fn new(binned: &'a BinnedSignal, patches: &'a Patches, tol: f64) -> Self {
        Self {
            binned,
            membership: &patches.membership,
            npatches: patches.npatches,
            penalty: binned.log_total_counts(),
            tol,
        }
    }

    /// BIC and dof of `S(β; offset, λ₁)`, adding `shift` to the fit.
    fn bic(&self, offset: f64, lambda1: f64, shift: f64) -> (f64, usize) {
        let mut selected = vec![false; self.npatches];
        let mut rss = 0.0;
        let b = self.binned;
        for i in 0..b.len() {
            let soft = soft_threshold(b.beta[i], offset, lambda1);
            if soft.abs() > self.tol / 2.0 {
                selected[self.membership[i]] = true;
            }
            let resid = b.phihat[i] - (soft + shift);
            rss += b.weight[i] * resid * resid;
        }
        let dof = selected.iter().filter(|&&s| s).count();
        (rss + self.penalty * dof as f64, dof)
    }
}

// =============================================================================
// Score functions
// =============================================================================

/// Offset held at zero (signal maps).
#[derive(Debug, Clone)]
pub struct SignalObjective<'a> {
    data: ScoreData<'a>,
    checker: BoundsChecker,
}

impl<'a> SparsityObjective for SignalObjective<'a> {
    fn evaluate(&self, lambda1: f64) -> Evaluation {
        let bounds = Bounds::around(0.0, lambda1).widened(self.data.tol / 2.0);
        if !self.checker.degeneracy_ok(bounds) {
            return Evaluation::infeasible(lambda1, 0.0);
        }
        let (bic, dof) = self.data.bic(0.0, lambda1, 0.0);
        Evaluation {
            lambda1,
            ecprime: 0.0,
            bic,
            dof: Some(dof),
        }
    }
}

/// Offset estimated from the patch range (difference maps).
#[derive(Debug, Clone)]
pub struct DifferenceObjective<'a> {
    data: ScoreData<'a>,
    checker: BoundsChecker,
    minval: f64,
    maxval: f64,
}

impl<'a> DifferenceObjective<'a> {
    /// Offset implied by λ₁: centred when the band covers every patch,
    /// otherwise placed so the lowest patch sits just inside the band.
    pub fn ecprime(&self, lambda1: f64) -> f64 {
        let tol = self.data.tol;
        if self.maxval - self.minval < 2.0 * lambda1 + tol {
            (self.maxval + self.minval) / 2.0
        } else {
            lambda1 + self.minval - tol
        }
    }
}

impl<'a> SparsityObjective for DifferenceObjective<'a> {
    fn evaluate(&self, lambda1: f64) -> Evaluation {
        let ecprime = self.ecprime(lambda1);
        let bounds = Bounds::around(ecprime, lambda1).widened(self.data.tol);
        if !self.checker.degeneracy_ok(bounds) {
            return Evaluation::infeasible(lambda1, ecprime);
        }
        let (bic, dof) = self.data.bic(ecprime, lambda1, ecprime);
        Evaluation {
            lambda1,
            ecprime,
            bic,
            dof: Some(dof),
        }
    }
}

// =============================================================================
// Search
// =============================================================================

/// Keep the first of the lowest scores.
fn best_of<O, I>(objective: &O, start: Evaluation, lambdas: I) -> Evaluation
where
    O: SparsityObjective + ?Sized,
    I: IntoIterator<Item = f64>,
{
    lambdas.into_iter().fold(start, |best, lambda1| {
        let eval = objective.evaluate(lambda1);
        if eval.bic < best.bic {
            eval
        } else {
            best
        }
    })
}

/// λ₁ range `[max(λ(1 - p/100), λ_min), λ(1 + p/100)]` searched around the
/// line search point.
fn refinement_window(lambda1: f64, lambda1_min: f64, percent: f64) -> (f64, f64) {
    let lo = (lambda1 * (1.0 - percent / 100.0)).max(lambda1_min);
    (lo, lambda1 * (1.0 + percent / 100.0))
}

/// Chooses λ₁ (and the offset for difference maps).
#[derive(Debug, Clone)]
pub struct PenaltySelector {
    kind: CalculationKind,
    config: SparsityConfig,
}

impl PenaltySelector {
    pub fn new(kind: CalculationKind, config: SparsityConfig) -> Self {
        Self { kind, config }
    }

    pub fn select(&self, binned: &BinnedSignal) -> Result<PenaltySelection> {
        self.config.validate()?;
        let tol = self.config.tol_val;
        let patches = PatchGrouper::new(binned.nbins(), tol).group(&binned.beta)?;
        let selection = match self.kind {
            CalculationKind::Signal => self.select_signal(binned, &patches),
            CalculationKind::Difference => self.select_difference(binned, &patches),
        };
        log::debug!(
            "{:?} penalty: lambda1 = {:.4e}, eCprime = {:.4e}, BIC = {:.6e}, dof = {:?} ({} patches, {:?})",
            self.kind,
            selection.lambda1,
            selection.ecprime,
            selection.bic,
            selection.dof,
            patches.npatches,
            selection.path
        );
        Ok(selection)
    }

    fn checker(&self, binned: &BinnedSignal, forbidden: &[f64]) -> BoundsChecker {
        let beta = binned.beta.to_vec();
        BoundsChecker::new(self.config.sign, self.config.degeneracy, &beta, forbidden)
    }

    fn select_signal(&self, binned: &BinnedSignal, patches: &Patches) -> PenaltySelection {
        let cfg = &self.config;
        let tol = cfg.tol_val;
        let sorted = patches.sorted_values();
        let minval = sorted[0];
        let maxval = sorted[sorted.len() - 1];

        if patches.is_single() {
            let bic = binned
                .weight
                .iter()
                .zip(binned.phihat.iter())
                .map(|(w, p)| w * p * p)
                .sum();
            return PenaltySelection {
                lambda1: minval.abs().max(maxval.abs()),
                ecprime: 0.0,
                bic,
                dof: Some(0),
                path: SearchPath::SinglePatch,
            };
        }

        let offset = self.kind.offset();
        let forbidden = forbidden_values(binned, self.kind, cfg);
        let lmin = minimum_upper_bound(cfg, offset, &forbidden, minval);
        let lmax = minval.abs().max(maxval.abs());
        let objective = SignalObjective {
            data: ScoreData::new(binned, patches, tol),
            checker: self.checker(binned, &forbidden),
        };

        if lmin > lmax {
            return PenaltySelection::from_evaluation(objective.evaluate(lmin), SearchPath::CollapsedInterval);
        }

        let brent = brent_minimize_bits(
            |x| objective.score(x),
            lmin.log10(),
            lmax.log10(),
            bits_from_tolerance(tol),
            BRENT_MAX_ITERATIONS,
        );
        let lam = 10f64.powf(brent.x_min);
        let path = SearchPath::Brent {
            iterations: brent.iterations,
            converged: brent.converged,
        };

        let checker = &objective.checker;
        let candidates: Vec<f64> = CandidateGenerator::new(offset, cfg.sign, tol, lmin)
            .generate(&sorted)
            .into_iter()
            .filter(|&c| checker.sign_ok(Bounds::around(0.0, c)))
            .collect();
        if candidates.is_empty() {
            log::warn!("no threshold candidate above {:.4e}, keeping line search minimum", lmin);
            return PenaltySelection::from_evaluation(objective.evaluate(lam), path);
        }

        // lower bound and line search point, then the nearest candidates on
        // each side of it
        let start = best_of(&objective, objective.evaluate(lmin), [lam]);
        let below = candidates.iter().rev().filter(|&&c| c < lam).take(cfg.refine_num).copied();
        let above = candidates.iter().filter(|&&c| c >= lam).take(cfg.refine_num).copied();
        let best = best_of(&objective, start, below.chain(above));
        PenaltySelection::from_evaluation(best, path)
    }

    fn select_difference(&self, binned: &BinnedSignal, patches: &Patches) -> PenaltySelection {
        let cfg = &self.config;
        let tol = cfg.tol_val;
        let sorted = patches.sorted_values();
        let minval = sorted[0];
        let maxval = sorted[sorted.len() - 1];

        if patches.is_single() {
            let bic = binned
                .weight
                .iter()
                .zip(binned.phihat.iter())
                .map(|(w, p)| w * (p - minval).powi(2))
                .sum();
            return PenaltySelection {
                lambda1: cfg.lambda1_min,
                ecprime: minval,
                bic,
                dof: Some(0),
                path: SearchPath::SinglePatch,
            };
        }

        let offset = self.kind.offset();
        let forbidden = forbidden_values(binned, self.kind, cfg);
        let lambda1_min = minimum_upper_bound(cfg, offset, &forbidden, minval);
        let objective = DifferenceObjective {
            data: ScoreData::new(binned, patches, tol),
            checker: self.checker(binned, &forbidden),
            minval,
            maxval,
        };

        let valrange = maxval - minval;
        if valrange <= 2.0 * lambda1_min {
            return PenaltySelection::from_evaluation(
                objective.evaluate(lambda1_min),
                SearchPath::CollapsedInterval,
            );
        }

        let brent = brent_minimize_bits(
            |x| objective.score(x),
            lambda1_min.max(tol / 2.0).log10(),
            valrange.log10(),
            bits_from_tolerance(tol),
            BRENT_MAX_ITERATIONS,
        );
        let lam = 10f64.powf(brent.x_min);
        let path = SearchPath::Brent {
            iterations: brent.iterations,
            converged: brent.converged,
        };

        let (lo, hi) = refinement_window(lam, lambda1_min, cfg.percent_closest);
        let candidates: Vec<f64> = CandidateGenerator::new(offset, cfg.sign, tol, lambda1_min)
            .generate(&sorted)
            .into_iter()
            .filter(|&c| c >= lo && c <= hi)
            .collect();
        if candidates.is_empty() {
            log::warn!(
                "no threshold candidate in [{:.4e}, {:.4e}], keeping line search minimum",
                lo,
                hi
            );
        }
        let best = best_of(&objective, objective.evaluate(lam), candidates);
        PenaltySelection::from_evaluation(best, path)
    }
}

/// Penalty search for a signal map (offset zero).
pub fn optimize_lambda1(binned: &BinnedSignal, config: &SparsityConfig) -> Result<PenaltySelection> {
    PenaltySelector::new(CalculationKind::Signal, config.clone()).select(binned)
}

/// Penalty and offset search for a difference map.
pub fn optimize_lambda1_ecprime(binned: &BinnedSignal, config: &SparsityConfig) -> Result<PenaltySelection> {
    PenaltySelector::new(CalculationKind::Difference, config.clone()).select(binned)
}
