//! Post-hoc temperature scaling.
//!
//! A trained classifier's softmax confidences are rescaled by a single scalar
//! `T > 0`: calibrated probabilities are `softmax(logits / T)`. `T` is fit by
//! holding the classifier fixed and minimizing the mean negative
//! log-likelihood of the validation logits over `u = ln T`.
//!
//! # Algorithm
//!
//! With `z = logits · e^{-u}` and `p = softmax(z)`, per sample:
//!
//! ```text
//! dNLL/du   = z_y - E_p[z]
//! d²NLL/du² = Var_p[z] - (z_y - E_p[z])
//! ```
//!
//! Each iteration takes a Newton step when the curvature is positive and a
//! gradient step otherwise, caps the step at [`MAX_LOG_STEP`] and backtracks
//! until the Armijo condition holds. The validation logits are read once and
//! never recomputed. The fitted temperature is clamped to
//! [`MIN_TEMPERATURE`, `MAX_TEMPERATURE`].

use serde::{Deserialize, Serialize};

use emofuse_core::{EmoFuseError, Result};

/// Lower clamp for a fitted temperature.
pub const MIN_TEMPERATURE: f64 = 0.05;
/// Upper clamp for a fitted temperature.
pub const MAX_TEMPERATURE: f64 = 20.0;
/// Default iteration budget for [`fit_temperature`].
pub const DEFAULT_MAX_ITER: usize = 200;

/// Largest allowed change of `ln T` in one iteration.
const MAX_LOG_STEP: f64 = 1.0;
/// Search interval for `ln T`, wider than the final clamp.
const LOG_T_BOUNDS: (f64, f64) = (-6.0, 6.0);
const GRAD_TOL: f64 = 1e-9;
const ARMIJO_C: f64 = 1e-4;
const MIN_STEP_SCALE: f64 = 1e-8;

/// Softmax of `logits / temperature`, computed stably.
#[must_use]
pub fn softmax(logits: &[f64], temperature: f64) -> Vec<f64> {
    let scaled: Vec<f64> = logits.iter().map(|&l| l / temperature).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|&z| (z - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Row-wise [`softmax`].
#[must_use]
pub fn softmax_rows(logits: &[Vec<f64>], temperature: f64) -> Vec<Vec<f64>> {
    logits.iter().map(|row| softmax(row, temperature)).collect()
}

/// Mean cross-entropy of `softmax(logits / temperature)` against `labels`.
pub fn nll_at_temperature(logits: &[Vec<f64>], labels: &[usize], temperature: f64) -> Result<f64> {
    check_inputs(logits, labels)?;
    if !(temperature.is_finite() && temperature > 0.0) {
        return Err(EmoFuseError::Numeric(format!(
            "temperature must be positive and finite, got {temperature}"
        )));
    }
    Ok(objective(logits, labels, -temperature.ln()).0)
}

/// Outcome of a temperature fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureFit {
    /// Fitted temperature after clamping.
    pub temperature: f64,
    /// Iterations taken.
    pub iterations: usize,
    /// Validation NLL at `T = 1`.
    pub nll_before: f64,
    /// Validation NLL at the fitted temperature.
    pub nll_after: f64,
}

/// Fit a temperature on fixed validation logits.
///
/// # Errors
///
/// `Data` for empty or mismatched inputs and out-of-range labels, `Numeric`
/// for non-finite logits or a non-finite objective.
pub fn fit_temperature(logits: &[Vec<f64>], labels: &[usize], max_iter: usize) -> Result<TemperatureFit> {
    check_inputs(logits, labels)?;

    let mut u = 0.0_f64;
    let (mut f, mut g, mut h) = objective(logits, labels, u);
    let nll_before = f;
    if !f.is_finite() {
        return Err(EmoFuseError::Numeric(format!(
            "validation NLL is not finite at T=1: {f}"
        )));
    }

    let mut iterations = 0;
    while iterations < max_iter {
        if g.abs() < GRAD_TOL {
            break;
        }
        iterations += 1;

        let direction = if h > 1e-12 { -g / h } else { -g };
        let direction = direction.clamp(-MAX_LOG_STEP, MAX_LOG_STEP);

        let mut scale = 1.0;
        let mut accepted = None;
        while scale >= MIN_STEP_SCALE {
            let candidate = (u + scale * direction).clamp(LOG_T_BOUNDS.0, LOG_T_BOUNDS.1);
            let (fc, gc, hc) = objective(logits, labels, candidate);
            if fc.is_finite() && fc <= f + ARMIJO_C * scale * g * direction {
                accepted = Some((candidate, fc, gc, hc));
                break;
            }
            scale *= 0.5;
        }

        match accepted {
            Some((candidate, fc, gc, hc)) => {
                let moved = (candidate - u).abs();
                u = candidate;
                f = fc;
                g = gc;
                h = hc;
                if moved < 1e-12 {
                    break;
                }
            }
            None => break,
        }
    }

    let raw = u.exp();
    let temperature = raw.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
    let nll_after = objective(logits, labels, -temperature.ln()).0;
    if !nll_after.is_finite() {
        return Err(EmoFuseError::Numeric(format!(
            "calibrated NLL is not finite (T={temperature})"
        )));
    }

    tracing::debug!(
        raw_temperature = raw,
        temperature,
        iterations,
        nll_before,
        nll_after,
        "Fitted temperature"
    );

    Ok(TemperatureFit {
        temperature,
        iterations,
        nll_before,
        nll_after,
    })
}

fn check_inputs(logits: &[Vec<f64>], labels: &[usize]) -> Result<()> {
    if logits.is_empty() {
        return Err(EmoFuseError::Data(
            "cannot calibrate on an empty validation set".to_string(),
        ));
    }
    if logits.len() != labels.len() {
        return Err(EmoFuseError::Data(format!(
            "{} logit rows but {} labels",
            logits.len(),
            labels.len()
        )));
    }
    for (row, &y) in logits.iter().zip(labels) {
        if y >= row.len() {
            return Err(EmoFuseError::Data(format!(
                "label index {y} out of range for {} classes",
                row.len()
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(EmoFuseError::Numeric("non-finite validation logit".to_string()));
        }
    }
    Ok(())
}

/// Mean NLL and its first two derivatives with respect to `u = ln T`.
fn objective(logits: &[Vec<f64>], labels: &[usize], u: f64) -> (f64, f64, f64) {
    let inv_t = (-u).exp();
    let mut nll = 0.0;
    let mut grad = 0.0;
    let mut hess = 0.0;

    for (row, &y) in logits.iter().zip(labels) {
        let z: Vec<f64> = row.iter().map(|&l| l * inv_t).collect();
        let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = z.iter().map(|&v| (v - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        let log_sum = max + total.ln();

        let mut mean_z = 0.0;
        let mut mean_z2 = 0.0;
        for (&e, &v) in exps.iter().zip(&z) {
            let p = e / total;
            mean_z += p * v;
            mean_z2 += p * v * v;
        }
        let var_z = (mean_z2 - mean_z * mean_z).max(0.0);
        let gi = z[y] - mean_z;

        nll += log_sum - z[y];
        grad += gi;
        hess += var_z - gi;
    }

    let n = logits.len() as f64;
    (nll / n, grad / n, hess / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Draw logits and sample labels from `softmax(logits / true_t)`.
    fn synthetic(n: usize, true_t: f64, seed: u64) -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut logits = Vec::with_capacity(n);
        let mut labels = Vec::with_capacity(n);
        for _ in 0..n {
            let row: Vec<f64> = (0..4).map(|_| rng.gen_range(-3.0..3.0)).collect();
            let probs = softmax(&row, true_t);
            let draw: f64 = rng.gen();
            let mut acc = 0.0;
            let mut label = probs.len() - 1;
            for (k, p) in probs.iter().enumerate() {
                acc += p;
                if draw < acc {
                    label = k;
                    break;
                }
            }
            logits.push(row);
            labels.push(label);
        }
        (logits, labels)
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0, 4.0], 1.0);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[3] > p[2] && p[2] > p[1]);
    }

    #[test]
    fn test_softmax_temperature_softens() {
        let sharp = softmax(&[0.0, 4.0], 1.0);
        let soft = softmax(&[0.0, 4.0], 4.0);
        assert!(soft[1] < sharp[1]);
        assert!(soft[1] > 0.5);
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let p = softmax(&[1000.0, 1001.0], 1.0);
        assert!(p.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_well_calibrated_logits_fit_near_one() {
        let (logits, labels) = synthetic(4000, 1.0, 7);
        let fit = fit_temperature(&logits, &labels, DEFAULT_MAX_ITER).unwrap();
        assert!(
            (fit.temperature - 1.0).abs() < 0.15,
            "temperature = {}",
            fit.temperature
        );
        assert!(fit.nll_after <= fit.nll_before + 1e-9);
        assert!(fit.iterations < 100);
    }

    #[test]
    fn test_overconfident_logits_get_t_above_one() {
        // labels drawn at T=2, so logits read at T=1 are overconfident
        let (logits, labels) = synthetic(4000, 2.0, 11);
        let fit = fit_temperature(&logits, &labels, DEFAULT_MAX_ITER).unwrap();
        assert!(fit.temperature > 1.5, "temperature = {}", fit.temperature);
        assert!(fit.nll_after < fit.nll_before);
    }

    #[test]
    fn test_separable_logits_sharpen() {
        let logits = vec![vec![5.0, 0.0], vec![0.0, 5.0]];
        let fit = fit_temperature(&logits, &[0, 1], DEFAULT_MAX_ITER).unwrap();
        assert!(fit.temperature < 1.0);
        assert!(fit.temperature >= MIN_TEMPERATURE);
        assert!(fit.nll_after < fit.nll_before);
    }

    #[test]
    fn test_zero_iterations_keeps_t_one() {
        let (logits, labels) = synthetic(100, 2.0, 5);
        let fit = fit_temperature(&logits, &labels, 0).unwrap();
        assert_eq!(fit.temperature, 1.0);
        assert_eq!(fit.nll_after, fit.nll_before);
    }

    #[test]
    fn test_uninformative_logits_keep_t_one() {
        let logits = vec![vec![0.0; 4]; 10];
        let labels = vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1];
        let fit = fit_temperature(&logits, &labels, DEFAULT_MAX_ITER).unwrap();
        assert_eq!(fit.temperature, 1.0);
        assert_eq!(fit.iterations, 0);
    }

    #[test]
    fn test_objective_gradient_matches_finite_difference() {
        let (logits, labels) = synthetic(50, 1.3, 3);
        let u = 0.2;
        let h = 1e-5;
        let (_, g, hess) = objective(&logits, &labels, u);
        let (fp, gp, _) = objective(&logits, &labels, u + h);
        let (fm, gm, _) = objective(&logits, &labels, u - h);
        assert!((g - (fp - fm) / (2.0 * h)).abs() < 1e-6);
        assert!((hess - (gp - gm) / (2.0 * h)).abs() < 1e-5);
    }

    #[test]
    fn test_nll_at_temperature_matches_objective() {
        let logits = vec![vec![2.0, 0.0], vec![0.0, 1.0]];
        let nll = nll_at_temperature(&logits, &[0, 1], 1.0).unwrap();
        let expected = -(softmax(&logits[0], 1.0)[0].ln() + softmax(&logits[1], 1.0)[1].ln()) / 2.0;
        assert!((nll - expected).abs() < 1e-12);
        assert!(nll_at_temperature(&logits, &[0, 1], 0.0).is_err());
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(matches!(
            fit_temperature(&[], &[], 10),
            Err(EmoFuseError::Data(_))
        ));
        assert!(matches!(
            fit_temperature(&[vec![1.0, 2.0]], &[0, 1], 10),
            Err(EmoFuseError::Data(_))
        ));
        assert!(matches!(
            fit_temperature(&[vec![1.0, 2.0]], &[2], 10),
            Err(EmoFuseError::Data(_))
        ));
        assert!(matches!(
            fit_temperature(&[vec![f64::NAN, 2.0]], &[0], 10),
            Err(EmoFuseError::Numeric(_))
        ));
    }
}
