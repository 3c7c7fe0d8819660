// =============================================================================
// Threshold Candidates
// =============================================================================
//
// The number of patches surviving soft-thresholding only changes when λ₁
// crosses a patch value (in λ₁ units). Between two such borders the score
// is a smooth quadratic, so the interesting λ₁ values are the borders
// themselves and the middle of each interval between them.
//
// Patch values are mapped to λ₁ units first:
//
//   offset zero, positive sign    v            (negative values never matter)
//   offset zero, any sign         |v|
//   offset estimated              (v - v_min + tol) / 2
//
// =============================================================================

use crate::sparsity::{Offset, Sign};

/// Produces ascending λ₁ candidates from sorted patch values.
#[derive(Debug, Clone, Copy)]
pub struct CandidateGenerator {
    offset: Offset,
    sign: Sign,
    tol: f64,
    min_ub: f64,
}

impl CandidateGenerator {
    /// `min_ub` is the smallest admissible λ₁.
    pub fn new(offset: Offset, sign: Sign, tol: f64, min_ub: f64) -> Self {
        Self {
            offset,
            sign,
            tol,
            min_ub,
        }
    }

    /// Patch values expressed in λ₁ units, sorted ascending.
    pub fn values(&self, patch_values: &[f64]) -> Vec<f64> {
        let mut values: Vec<f64> = match (self.offset, self.sign) {
            (Offset::Zero, Sign::Positive) => patch_values.iter().copied().filter(|&v| v >= 0.0).collect(),
            (Offset::Zero, Sign::Any) => patch_values.iter().map(|v| v.abs()).collect(),
            (Offset::Estimated, _) => {
                let v0 = patch_values.iter().copied().fold(f64::INFINITY, f64::min);
                patch_values.iter().map(|v| (v - v0 + self.tol) / 2.0).collect()
            }
        };
        values.sort_by(f64::total_cmp);
        values
    }

    /// Sorted borders starting at `min_ub`, merged within `tol`.
    pub fn borders(&self, patch_values: &[f64]) -> Vec<f64> {
        let mut borders = vec![self.min_ub];
        for v in self.values(patch_values) {
            if v > self.min_ub {
                borders.push(v);
            }
        }
        let mut merged: Vec<f64> = Vec::with_capacity(borders.len());
        for b in borders {
            match merged.last() {
                Some(&last) if b - last <= self.tol => {}
                _ => merged.push(b),
            }
        }
        if merged.len() == 1 {
            merged.push(self.min_ub + self.tol);
        }
        merged
    }

    /// First border, midpoints of consecutive borders, last border.
    pub fn generate(&self, patch_values: &[f64]) -> Vec<f64> {
        let borders = self.borders(patch_values);
        let mut candidates = Vec::with_capacity(borders.len() + 1);
        candidates.push(borders[0]);
        for pair in borders.windows(2) {
            candidates.push(0.5 * (pair[0] + pair[1]));
        }
        if let Some(&last) = borders.last() {
            candidates.push(last);
        }
        candidates
    }
}
