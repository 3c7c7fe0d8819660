// =============================================================================
// Bounded Brent Minimisation
// =============================================================================
//
// Penalty selection minimises a one-dimensional score on a bounded interval
// (log10 of the sparsity penalty). Brent's method mixes golden-section steps
// with parabolic interpolation: guaranteed to stay inside [a, b] and
// superlinear near a smooth minimum.
//
// The score is only piecewise smooth and may return +∞ on infeasible
// regions. Non-finite values make every parabolic fit fail its acceptance
// test, so the search falls back to golden-section steps there.
//
// =============================================================================

use crate::constants::BRENT_MAX_BITS;

/// Result from Brent's optimization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrentResult {
    pub x_min: f64,
    pub f_min: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Relative tolerance corresponding to `bits` bits of precision.
///
/// `bits` is capped at half the f64 mantissa; asking for more cannot be met
/// by a bracketing method.
pub fn tolerance_from_bits(bits: i32) -> f64 {
    let bits = bits.clamp(1, BRENT_MAX_BITS);
    2f64.powi(1 - bits)
}

/// Bits of precision requested for a given value tolerance,
/// `-8 log10(tol) + 1`, truncated.
pub fn bits_from_tolerance(tol: f64) -> i32 {
    (-8.0 * tol.log10() + 1.0) as i32
}

/// Golden-section fraction, (3 - sqrt(5)) / 2.
const GOLDEN: f64 = 0.381966011250105;

#[derive(Debug, Clone, Copy)]
struct Point {
    x: f64,
    f: f64,
}

/// Search state: the bracket `[lo, hi]`, the three lowest points seen
/// (`best` <= `second` <= `third` in score) and the last two step lengths.
struct Bracket {
    lo: f64,
    hi: f64,
    best: Point,
    second: Point,
    third: Point,
    step: f64,
    prev_step: f64,
}

impl Bracket {
    fn new(lo: f64, hi: f64, start: Point) -> Self {
        Self {
            lo,
            hi,
            best: start,
            second: start,
            third: start,
            step: 0.0,
            prev_step: 0.0,
        }
    }

    fn midpoint(&self) -> f64 {
        0.5 * (self.lo + self.hi)
    }

    /// Absolute tolerance around the current best abscissa.
    fn tolerance(&self, tol: f64) -> f64 {
        tol * self.best.x.abs() + tol / 4.0
    }

    fn is_narrow(&self, tol1: f64) -> bool {
        (self.best.x - self.midpoint()).abs() <= 2.0 * tol1 - 0.5 * (self.hi - self.lo)
    }

    /// Minimiser of the parabola through the three points, as an offset
    /// from `best`. `None` when the fit is degenerate, leaves the bracket
    /// or would not halve the step taken two iterations ago.
    fn parabola(&self) -> Option<f64> {
        let (x, w, v) = (self.best, self.second, self.third);
        let r = (x.x - w.x) * (x.f - v.f);
        let q = (x.x - v.x) * (x.f - w.f);
        let mut p = (x.x - v.x) * q - (x.x - w.x) * r;
        let mut q = 2.0 * (q - r);
        if q > 0.0 {
            p = -p;
        } else {
            q = -q;
        }
        let inside = p > q * (self.lo - x.x) && p < q * (self.hi - x.x);
        (p.abs() < (0.5 * q * self.prev_step).abs() && inside).then(|| p / q)
    }

    /// Offset from `best` of the next abscissa to evaluate.
    fn next_step(&mut self, tol1: f64) -> f64 {
        let x = self.best.x;
        let mid = self.midpoint();
        let parabolic = if self.prev_step.abs() > tol1 { self.parabola() } else { None };

        match parabolic {
            Some(step) => {
                self.prev_step = self.step;
                let u = x + step;
                // never evaluate right next to an end of the bracket
                self.step = if u - self.lo < 2.0 * tol1 || self.hi - u < 2.0 * tol1 {
                    if x < mid {
                        tol1
                    } else {
                        -tol1
                    }
                } else {
                    step
                };
            }
            None => {
                self.prev_step = if x < mid { self.hi - x } else { self.lo - x };
                self.step = GOLDEN * self.prev_step;
            }
        }

        if self.step.abs() >= tol1 {
            self.step
        } else if self.step > 0.0 {
            tol1
        } else {
            -tol1
        }
    }

    /// Shrink the bracket around the new point and reorder the three lowest.
    fn accept(&mut self, trial: Point) {
        if trial.f <= self.best.f {
            if trial.x < self.best.x {
                self.hi = self.best.x;
            } else {
                self.lo = self.best.x;
            }
            self.third = self.second;
            self.second = self.best;
            self.best = trial;
            return;
        }

        if trial.x < self.best.x {
            self.lo = trial.x;
        } else {
            self.hi = trial.x;
        }
        if trial.f <= self.second.f || self.second.x == self.best.x {
            self.third = self.second;
            self.second = trial;
        } else if trial.f <= self.third.f || self.third.x == self.best.x || self.third.x == self.second.x {
            self.third = trial;
        }
    }

    fn result(&self, iterations: usize, converged: bool) -> BrentResult {
        BrentResult {
            x_min: self.best.x,
            f_min: self.best.f,
            iterations,
            converged,
        }
    }
}

/// Brent's method for 1D minimization on `[a, b]`.
///
/// `tol` is relative to the abscissa; the bounds may be given in either
/// order.
pub fn brent_minimize<F>(f: F, a: f64, b: f64, tol: f64, max_iter: usize) -> BrentResult
where
    F: Fn(f64) -> f64,
{
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let x0 = lo + GOLDEN * (hi - lo);
    let mut bracket = Bracket::new(lo, hi, Point { x: x0, f: f(x0) });

    for iter in 0..max_iter {
        let tol1 = bracket.tolerance(tol);
        if bracket.is_narrow(tol1) {
            return bracket.result(iter + 1, true);
        }
        let x = bracket.best.x + bracket.next_step(tol1);
        bracket.accept(Point { x, f: f(x) });
    }

    bracket.result(max_iter, false)
}

/// Brent's method with precision given in bits, as used by the penalty search.
pub fn brent_minimize_bits<F>(f: F, a: f64, b: f64, bits: i32, max_iter: usize) -> BrentResult
where
    F: Fn(f64) -> f64,
{
    brent_minimize(f, a, b, tolerance_from_bits(bits), max_iter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brent_minimize_quadratic() {
        let result = brent_minimize(|x| (x - 2.0).powi(2), 0.0, 5.0, 1e-8, 100);

        assert!(result.converged);
        assert!((result.x_min - 2.0).abs() < 1e-5);
        assert!(result.f_min < 1e-10);
    }

    #[test]
    fn test_brent_minimize_cosine() {
        // minimum at pi
        let result = brent_minimize(|x| x.cos(), 2.0, 5.0, 1e-8, 100);

        assert!(result.converged);
        assert!((result.x_min - std::f64::consts::PI).abs() < 1e-5);
    }

    #[test]
    fn test_brent_minimize_at_boundary() {
        let result = brent_minimize(|x| -x, 0.0, 5.0, 1e-8, 100);
        assert!((result.x_min - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_brent_avoids_infinite_region() {
        // infeasible below 1, minimum at 3
        let f = |x: f64| if x < 1.0 { f64::INFINITY } else { (x - 3.0).powi(2) };
        let result = brent_minimize(f, -4.0, 6.0, 1e-8, 200);
        assert!((result.x_min - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_brent_accepts_reversed_bounds() {
        let result = brent_minimize(|x| (x + 1.5).powi(2), 3.0, -4.0, 1e-8, 100);
        assert!(result.converged);
        assert!((result.x_min + 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_bracket_keeps_three_lowest_points() {
        let mut bracket = Bracket::new(0.0, 4.0, Point { x: 1.0, f: 5.0 });
        bracket.accept(Point { x: 2.0, f: 3.0 });
        assert_eq!((bracket.lo, bracket.hi), (1.0, 4.0));
        assert_eq!(bracket.best.x, 2.0);
        assert_eq!(bracket.second.x, 1.0);

        // worse than best: only narrows the bracket and becomes second
        bracket.accept(Point { x: 3.0, f: 4.0 });
        assert_eq!((bracket.lo, bracket.hi), (1.0, 3.0));
        assert_eq!(bracket.best.x, 2.0);
        assert_eq!(bracket.second.x, 3.0);
        assert_eq!(bracket.third.x, 1.0);
    }

    #[test]
    fn test_parabola_finds_vertex() {
        // points on (x - 1.5)^2 around best at 1
        let mut bracket = Bracket::new(0.0, 4.0, Point { x: 1.0, f: 0.25 });
        bracket.second = Point { x: 2.0, f: 0.25 };
        bracket.third = Point { x: 3.0, f: 2.25 };
        bracket.prev_step = 2.0;
        let step = bracket.parabola().unwrap();
        assert!((step - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bits_conversion() {
        assert_eq!(bits_from_tolerance(0.05), 11);
        assert_eq!(bits_from_tolerance(0.003), 21);
        assert!((tolerance_from_bits(1) - 1.0).abs() < 1e-15);
        // capped at 26 bits
        assert_eq!(tolerance_from_bits(60), tolerance_from_bits(26));
    }

    #[test]
    fn test_brent_minimize_bits_degenerate_interval() {
        let result = brent_minimize_bits(|x| (x - 1.0).powi(2), 2.0, 2.0, 17, 50);
        assert!(result.converged);
        assert_eq!(result.x_min, 2.0);
    }
}
