use serde::{Deserialize, Serialize};

/// Sigmoid mapping a decision value to a probability: `1 / (1 + exp(a*f + b))`.
///
/// Fitted with Platt's method using the Newton iteration with backtracking line
/// search of Lin, Lin and Weng, on regularized targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattSigmoid {
    pub a: f64,
    pub b: f64,
}

const MAX_ITER: usize = 100;
const MIN_STEP: f64 = 1e-10;
const SIGMA: f64 = 1e-12;
const EPS: f64 = 1e-5;

impl PlattSigmoid {
    /// A sigmoid that maps every decision value to (almost) `probability`.
    pub fn constant(positive: bool) -> Self {
        Self {
            a: 0.0,
            b: if positive { -20.0 } else { 20.0 },
        }
    }

    pub fn fit(decision_values: &[f64], labels: &[bool]) -> Self {
        let prior1 = labels.iter().filter(|&&l| l).count() as f64;
        let prior0 = labels.len() as f64 - prior1;
        let hi_target = (prior1 + 1.0) / (prior1 + 2.0);
        let lo_target = 1.0 / (prior0 + 2.0);
        let targets: Vec<f64> = labels
            .iter()
            .map(|&l| if l { hi_target } else { lo_target })
            .collect();

        let objective = |a: f64, b: f64| -> f64 {
            decision_values
                .iter()
                .zip(&targets)
                .map(|(&f, &t)| {
                    let f_apb = f * a + b;
                    if f_apb >= 0.0 {
                        t * f_apb + (-f_apb).exp().ln_1p()
                    } else {
                        (t - 1.0) * f_apb + f_apb.exp().ln_1p()
                    }
                })
                .sum()
        };

        let mut a = 0.0;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = objective(a, b);

        for _ in 0..MAX_ITER {
            let (mut h11, mut h22, mut h21) = (SIGMA, SIGMA, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);
            for (&f, &t) in decision_values.iter().zip(&targets) {
                let f_apb = f * a + b;
                let (p, q) = if f_apb >= 0.0 {
                    let e = (-f_apb).exp();
                    (e / (1.0 + e), 1.0 / (1.0 + e))
                } else {
                    let e = f_apb.exp();
                    (1.0 / (1.0 + e), e / (1.0 + e))
                };
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = t - p;
                g1 += f * d1;
                g2 += d1;
            }

            if g1.abs() < EPS && g2.abs() < EPS {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let d_a = -(h22 * g1 - h21 * g2) / det;
            let d_b = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * d_a + g2 * d_b;

            let mut step = 1.0;
            while step >= MIN_STEP {
                let new_a = a + step * d_a;
                let new_b = b + step * d_b;
                let new_f = objective(new_a, new_b);
                if new_f < fval + 0.0001 * step * gd {
                    a = new_a;
                    b = new_b;
                    fval = new_f;
                    break;
                }
                step /= 2.0;
            }
            if step < MIN_STEP {
                log::debug!("Platt line search failed to make progress");
                break;
            }
        }

        Self { a, b }
    }

    /// Probability of the positive class for a decision value.
    pub fn probability(&self, decision_value: f64) -> f64 {
        let f_apb = decision_value * self.a + self.b;
        if f_apb >= 0.0 {
            let e = (-f_apb).exp();
            e / (1.0 + e)
        } else {
            1.0 / (1.0 + f_apb.exp())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separable_scores_map_to_confident_probabilities() {
        let decisions = [-2.0, -1.5, -1.0, 1.0, 1.5, 2.0];
        let labels = [false, false, false, true, true, true];
        let sigmoid = PlattSigmoid::fit(&decisions, &labels);

        assert!(sigmoid.a < 0.0);
        assert!(sigmoid.probability(2.0) > 0.7);
        assert!(sigmoid.probability(-2.0) < 0.3);
        assert!(sigmoid.probability(1.0) > sigmoid.probability(-1.0));
    }

    #[test]
    fn test_inverted_scores_are_flipped() {
        let decisions = [2.0, 1.0, -1.0, -2.0];
        let labels = [false, false, true, true];
        let sigmoid = PlattSigmoid::fit(&decisions, &labels);
        assert!(sigmoid.probability(-2.0) > sigmoid.probability(2.0));
    }

    #[test]
    fn test_constant_sigmoid() {
        assert!(PlattSigmoid::constant(false).probability(5.0) < 1e-6);
        assert!(PlattSigmoid::constant(true).probability(-5.0) > 1.0 - 1e-6);
    }
}
