// =============================================================================
// Exact 1D Total-Variation Denoising
// =============================================================================
//
// Solves, for a chain of values v:
//
//     argmin_x  1/2 Σ (x_k - v_k)² + μ Σ |x_{k+1} - x_k|
//
// with the direct taut-string algorithm of Condat (2013). It walks the chain
// once, keeping lower/upper bounds for the value of the current constant
// segment and backtracking only when a jump becomes unavoidable. No
// iterations and no tolerance: the result is exact up to rounding.
//
// =============================================================================

/// Denoise `input` into `output` with penalty `mu` on absolute differences.
///
/// Both slices must have the same length. `mu <= 0` copies the input.
pub fn tv1d_denoise(input: &[f64], mu: f64, output: &mut [f64]) {
    debug_assert_eq!(input.len(), output.len());
    let width = input.len();
    if width == 0 {
        return;
    }
    if width == 1 || mu <= 0.0 {
        output.copy_from_slice(input);
        return;
    }

    let two_mu = 2.0 * mu;
    let mut k = 0usize; // current sample
    let mut k0 = 0usize; // start of the current segment
    let mut kplus = 0usize; // last position where umax = -mu
    let mut kminus = 0usize; // last position where umin = mu
    let mut umin = mu;
    let mut umax = -mu;
    let mut vmin = input[0] - mu;
    let mut vmax = input[0] + mu;

    loop {
        // right boundary
        while k == width - 1 {
            if umin < 0.0 {
                // vmin too high, negative jump
                k0 = fill(output, k0, kminus, vmin);
                kminus = k0;
                k = k0;
                vmin = input[k0];
                umin = mu;
                umax = vmin + umin - vmax;
            } else if umax > 0.0 {
                // vmax too low, positive jump
                k0 = fill(output, k0, kplus, vmax);
                kplus = k0;
                k = k0;
                vmax = input[k0];
                umax = -mu;
                umin = vmax + umax - vmin;
            } else {
                vmin += umin / (k - k0 + 1) as f64;
                fill(output, k0, k, vmin);
                return;
            }
        }

        umin += input[k + 1] - vmin;
        if umin < -mu {
            k0 = fill(output, k0, kminus, vmin);
            k = k0;
            kplus = k0;
            kminus = k0;
            vmin = input[k0];
            vmax = vmin + two_mu;
            umin = mu;
            umax = -mu;
            continue;
        }

        umax += input[k + 1] - vmax;
        if umax > mu {
            k0 = fill(output, k0, kplus, vmax);
            k = k0;
            kplus = k0;
            kminus = k0;
            vmax = input[k0];
            vmin = vmax - two_mu;
            umin = mu;
            umax = -mu;
            continue;
        }

        // no jump, extend the segment
        k += 1;
        if umin >= mu {
            kminus = k;
            vmin += (umin - mu) / (kminus - k0 + 1) as f64;
            umin = mu;
        }
        if umax <= -mu {
            kplus = k;
            vmax += (umax + mu) / (kplus - k0 + 1) as f64;
            umax = -mu;
        }
    }
}

/// Write `value` to `output[from..=to]` (at least one slot) and return the
/// next segment start.
#[inline]
fn fill(output: &mut [f64], from: usize, to: usize, value: f64) -> usize {
    let end = to.max(from);
    for slot in &mut output[from..=end] {
        *slot = value;
    }
    end + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denoise(input: &[f64], mu: f64) -> Vec<f64> {
        let mut out = vec![0.0; input.len()];
        tv1d_denoise(input, mu, &mut out);
        out
    }

    fn objective(x: &[f64], v: &[f64], mu: f64) -> f64 {
        let fit: f64 = x.iter().zip(v).map(|(a, b)| 0.5 * (a - b).powi(2)).sum();
        let tv: f64 = x.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        fit + mu * tv
    }

    #[test]
    fn test_zero_penalty_is_identity() {
        let v = [1.0, -2.0, 3.5, 0.25];
        assert_eq!(denoise(&v, 0.0), v.to_vec());
    }

    #[test]
    fn test_constant_input_is_unchanged() {
        let v = [2.0; 6];
        for x in denoise(&v, 1.5) {
            assert!((x - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_large_penalty_gives_mean() {
        let v = [1.0, 4.0, 2.0, 7.0, 1.0];
        let mean = v.iter().sum::<f64>() / v.len() as f64;
        for x in denoise(&v, 100.0) {
            assert!((x - mean).abs() < 1e-10);
        }
    }

    #[test]
    fn test_two_point_closed_form() {
        // |v1 - v0| = 4 > 2 mu: each moves toward the other by mu
        let out = denoise(&[0.0, 4.0], 1.0);
        assert!((out[0] - 1.0).abs() < 1e-12);
        assert!((out[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_step_signal_keeps_jump() {
        let v = [0.0, 0.0, 0.0, 10.0, 10.0, 10.0];
        let out = denoise(&v, 0.5);
        // each plateau shrinks toward the other by mu / plateau length
        assert!((out[0] - 1.0 / 6.0).abs() < 1e-12);
        assert!((out[5] - (10.0 - 1.0 / 6.0)).abs() < 1e-12);
        assert!((out[2] - out[0]).abs() < 1e-12);
    }

    #[test]
    fn test_solution_beats_perturbations() {
        let v = [0.3, 2.1, -0.7, 1.8, 1.9, 4.0, 3.2, -1.0];
        let mu = 0.8;
        let x = denoise(&v, mu);
        let best = objective(&x, &v, mu);
        for i in 0..x.len() {
            for delta in [-1e-3, 1e-3] {
                let mut y = x.clone();
                y[i] += delta;
                assert!(objective(&y, &v, mu) >= best - 1e-12);
            }
        }
    }
}
