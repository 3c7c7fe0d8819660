// =============================================================================
// Admissible Thresholds
// =============================================================================
//
// Soft-thresholding at (offset, λ₁) zeroes every value inside the band
// [LB, UB] = [offset - λ₁, offset + λ₁]. Two constraints restrict the band:
//
//   - sign: for positive estimates LB must not exceed the smallest value,
//     so nothing is pushed below zero;
//   - degeneracy: the signal, the decay and the biases are only identifiable
//     if every counter diagonal keeps at least one zero after thresholding.
//     The "forbidden" values (one per diagonal) must all fall in the band.
//
// =============================================================================

use crate::sparsity::{BinnedSignal, CalculationKind, Degeneracy, Offset, Sign, SparsityConfig};

/// Lower and upper edges of the zeroed band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn around(offset: f64, lambda1: f64) -> Self {
        Self {
            lower: offset - lambda1,
            upper: offset + lambda1,
        }
    }

    /// Band widened by `slack` on both sides.
    pub fn widened(self, slack: f64) -> Self {
        Self {
            lower: self.lower - slack,
            upper: self.upper + slack,
        }
    }
}

/// Smallest value of each counter diagonal present in `diag_idx`, sorted
/// and deduplicated.
pub fn minimum_diagonal_values(beta: &[f64], diag_idx: &[usize]) -> Vec<f64> {
    let ndiags = diag_idx.iter().max().map_or(0, |&d| d + 1);
    let mut minima: Vec<Option<f64>> = vec![None; ndiags];
    for (&b, &d) in beta.iter().zip(diag_idx) {
        minima[d] = Some(minima[d].map_or(b, |m: f64| m.min(b)));
    }
    sorted_unique(minima.into_iter().flatten().collect())
}

/// Value of every counter diagonal that is constant within `tol`, sorted
/// and deduplicated.
pub fn constant_diagonal_values(beta: &[f64], diag_idx: &[usize], tol: f64) -> Vec<f64> {
    let ndiags = diag_idx.iter().max().map_or(0, |&d| d + 1);
    let mut ranges: Vec<Option<(f64, f64)>> = vec![None; ndiags];
    for (&b, &d) in beta.iter().zip(diag_idx) {
        ranges[d] = Some(match ranges[d] {
            Some((lo, hi)) => (lo.min(b), hi.max(b)),
            None => (b, b),
        });
    }
    let values = ranges
        .into_iter()
        .flatten()
        .filter(|(lo, hi)| hi - lo <= tol)
        .map(|(lo, _)| lo)
        .collect();
    sorted_unique(values)
}

fn sorted_unique(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    values.dedup();
    values
}

/// Values that must stay inside the zeroed band.
///
/// Empty when degeneracies are allowed. Positive signals and difference maps
/// use the per-diagonal minima; unconstrained-sign signals use the diagonals
/// that are already flat.
pub fn forbidden_values(binned: &BinnedSignal, kind: CalculationKind, config: &SparsityConfig) -> Vec<f64> {
    if config.degeneracy == Degeneracy::Allow {
        return Vec::new();
    }
    let beta = binned.beta.to_vec();
    let diag_idx = binned.diag_idx();
    match (kind, config.sign) {
        (CalculationKind::Signal, Sign::Any) => constant_diagonal_values(&beta, &diag_idx, config.tol_val),
        _ => minimum_diagonal_values(&beta, &diag_idx),
    }
}

/// Smallest admissible λ₁ before any search, given the forbidden values and
/// the smallest patch value `minval`.
pub fn minimum_upper_bound(config: &SparsityConfig, offset: Offset, forbidden: &[f64], minval: f64) -> f64 {
    let constrained = config.degeneracy == Degeneracy::Forbid && !forbidden.is_empty();
    match offset {
        Offset::Zero => {
            let floor = config.lambda1_min.max(config.tol_val / 2.0);
            if constrained && config.sign == Sign::Positive {
                let largest = forbidden.iter().fold(0.0f64, |m, f| m.max(f.abs()));
                floor.max(largest)
            } else {
                floor
            }
        }
        Offset::Estimated => {
            if constrained {
                let maxf = forbidden.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                config.lambda1_min.max((maxf - minval) / 2.0 + config.tol_val)
            } else {
                config.lambda1_min
            }
        }
    }
}

/// Checks a band against the sign and degeneracy policies.
#[derive(Debug, Clone)]
pub struct BoundsChecker {
    sign: Sign,
    degeneracy: Degeneracy,
    min_beta: f64,
    forbidden: Option<(f64, f64)>,
}

impl BoundsChecker {
    pub fn new(sign: Sign, degeneracy: Degeneracy, beta: &[f64], forbidden: &[f64]) -> Self {
        let min_beta = beta.iter().copied().fold(f64::INFINITY, f64::min);
        let forbidden = if forbidden.is_empty() {
            None
        } else {
            let lo = forbidden.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = forbidden.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Some((lo, hi))
        };
        Self {
            sign,
            degeneracy,
            min_beta,
            forbidden,
        }
    }

    /// Positive estimates require the band to start at or below the
    /// smallest value.
    pub fn sign_ok(&self, bounds: Bounds) -> bool {
        match self.sign {
            Sign::Any => true,
            Sign::Positive => bounds.lower <= self.min_beta,
        }
    }

    /// All forbidden values lie inside the band.
    pub fn degeneracy_ok(&self, bounds: Bounds) -> bool {
        match (self.degeneracy, self.forbidden) {
            (Degeneracy::Forbid, Some((lo, hi))) => bounds.lower <= lo && hi <= bounds.upper,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_minimum_diagonal_values() {
        // diag idx for 3 bins: [0, 1, 2, 0, 1, 0]
        let beta = [3.0, 1.0, 2.0, 0.5, 4.0, 0.5];
        let diag = [0, 1, 2, 0, 1, 0];
        assert_eq!(minimum_diagonal_values(&beta, &diag), vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_constant_diagonal_values() {
        let beta = [1.0, 2.0, 7.0, 1.05, 5.0, 1.02];
        let diag = [0, 1, 2, 0, 1, 0];
        // diagonal 0 is flat within 0.1, diagonal 2 has a single cell
        assert_eq!(constant_diagonal_values(&beta, &diag, 0.1), vec![1.0, 7.0]);
    }

    #[test]
    fn test_forbidden_values_follow_policy() {
        let binned = BinnedSignal::new(
            2,
            array![1.0, 2.0, 3.0],
            Array1::zeros(3),
            Array1::ones(3),
            Array1::ones(3),
        )
        .unwrap();
        let allow = SparsityConfig {
            degeneracy: Degeneracy::Allow,
            ..SparsityConfig::default()
        };
        assert!(forbidden_values(&binned, CalculationKind::Signal, &allow).is_empty());
        let positive = SparsityConfig::from_flags(0.1, true, true);
        assert_eq!(forbidden_values(&binned, CalculationKind::Signal, &positive), vec![1.0, 2.0]);
        let any = SparsityConfig::from_flags(0.1, false, true);
        // diagonal 0 holds 1.0 and 3.0, diagonal 1 holds only 2.0
        assert_eq!(forbidden_values(&binned, CalculationKind::Signal, &any), vec![2.0]);
        assert_eq!(forbidden_values(&binned, CalculationKind::Difference, &any), vec![1.0, 2.0]);
    }

    #[test]
    fn test_minimum_upper_bound() {
        let mut cfg = SparsityConfig::from_flags(0.1, true, true);
        cfg.lambda1_min = 0.2;
        assert!((minimum_upper_bound(&cfg, Offset::Zero, &[-0.5, 0.3], -0.5) - 0.5).abs() < 1e-12);
        assert!((minimum_upper_bound(&cfg, Offset::Zero, &[], 0.0) - 0.2).abs() < 1e-12);
        // (1.0 - (-1.0)) / 2 + 0.1
        assert!((minimum_upper_bound(&cfg, Offset::Estimated, &[0.0, 1.0], -1.0) - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_checker() {
        let checker = BoundsChecker::new(Sign::Positive, Degeneracy::Forbid, &[0.2, 1.0, 3.0], &[0.2, 1.0]);
        let band = Bounds::around(0.0, 1.0);
        assert!(checker.sign_ok(band) && checker.degeneracy_ok(band));
        // lower edge above the smallest value
        assert!(!checker.sign_ok(Bounds::around(0.5, 0.2)));
        // forbidden value 1.0 outside the band
        assert!(!checker.degeneracy_ok(Bounds::around(0.0, 0.5)));
        assert!(checker.degeneracy_ok(Bounds::around(0.0, 0.5).widened(0.5)));

        let free = BoundsChecker::new(Sign::Any, Degeneracy::Allow, &[0.0], &[]);
        let point = Bounds::around(100.0, 0.0);
        assert!(free.sign_ok(point) && free.degeneracy_ok(point));
    }
}
