//! Linear support-vector classification with probability estimates.
//!
//! Multi-class problems are decomposed one-vs-rest: one binary linear SVM per
//! class, trained with `linfa-svm`. The linear decision function
//! `f(x) = w·x - rho` is folded into an explicit weight vector so inference is
//! a single dot product per class, and each class gets a Platt sigmoid so raw
//! margins become probabilities. Per-class probabilities are normalized to sum
//! to one.

use linfa::prelude::*;
use linfa_svm::Svm;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::classifier::ProbabilisticClassifier;
use super::platt::PlattSigmoid;
use super::split::stratified_k_fold;
use crate::error::{IntentError, Result};

/// One-vs-rest binary machine for a single class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BinaryMachine {
    weights: Vec<f64>,
    rho: f64,
    sigmoid: PlattSigmoid,
}

impl BinaryMachine {
    fn constant(dim: usize, positive: bool) -> Self {
        Self {
            weights: vec![0.0; dim],
            rho: if positive { -1.0 } else { 1.0 },
            sigmoid: PlattSigmoid::constant(positive),
        }
    }

    fn fit(records: &Array2<f64>, targets: Vec<bool>, c: f64) -> Result<Self> {
        let positives = targets.iter().filter(|&&t| t).count();
        if positives == 0 || positives == targets.len() {
            return Ok(Self::constant(records.ncols(), positives > 0));
        }

        let dataset = Dataset::new(records.clone(), Array1::from_vec(targets.clone()));
        let svm = Svm::<f64, bool>::params()
            .pos_neg_weights(c, c)
            .linear_kernel()
            .fit(&dataset)
            .map_err(|e| IntentError::Training(format!("SVM fit failed (C={}): {}", c, e)))?;

        // w = Σ(αᵢ·xᵢ)
        let mut weights = Array1::<f64>::zeros(records.ncols());
        for (&alpha, row) in svm.alpha.iter().zip(records.outer_iter()) {
            if alpha != 0.0 {
                weights.scaled_add(alpha, &row);
            }
        }
        let rho = svm.rho;

        let decisions: Vec<f64> = records.dot(&weights).iter().map(|d| d - rho).collect();
        let sigmoid = PlattSigmoid::fit(&decisions, &targets);

        Ok(Self {
            weights: weights.to_vec(),
            rho,
            sigmoid,
        })
    }

    fn decision(&self, x: &[f64]) -> f64 {
        self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() - self.rho
    }
}

/// Linear-kernel SVM classifier over embedding vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvmClassifier {
    c: f64,
    dimension: usize,
    machines: Vec<BinaryMachine>,
}

impl LinearSvmClassifier {
    /// Fits one binary machine per class id in `0..n_classes`.
    ///
    /// A class with no rows in `targets` gets a machine that always votes
    /// against it.
    pub fn fit(features: ArrayView2<'_, f32>, targets: &[usize], n_classes: usize, c: f64) -> Result<Self> {
        if features.nrows() != targets.len() {
            return Err(IntentError::Training(format!(
                "{} feature rows but {} targets",
                features.nrows(),
                targets.len()
            )));
        }
        let records = features.mapv(f64::from);
        let machines = (0..n_classes)
            .map(|class| {
                let binary: Vec<bool> = targets.iter().map(|&t| t == class).collect();
                BinaryMachine::fit(&records, binary, c)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            c,
            dimension: features.ncols(),
            machines,
        })
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl ProbabilisticClassifier for LinearSvmClassifier {
    fn n_classes(&self) -> usize {
        self.machines.len()
    }

    fn predict_proba(&self, features: ArrayView2<'_, f32>) -> Array2<f64> {
        let mut probabilities = Array2::<f64>::zeros((features.nrows(), self.machines.len()));
        for (row, mut out) in features.outer_iter().zip(probabilities.outer_iter_mut()) {
            let x: Vec<f64> = row.iter().map(|&v| f64::from(v)).collect();
            for (machine, p) in self.machines.iter().zip(out.iter_mut()) {
                *p = machine.sigmoid.probability(machine.decision(&x));
            }
            let total = out.sum();
            if total > 0.0 {
                out /= total;
            } else {
                out.fill(1.0 / self.machines.len() as f64);
            }
        }
        probabilities
    }
}

/// Outcome of the cross-validated search over `C`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchResult {
    pub best_c: f64,
    pub best_score: f64,
    /// Mean validation accuracy per candidate, in grid order
    pub scores: Vec<(f64, f64)>,
}

/// Exhaustive search over `grid` with stratified k-fold cross-validation.
///
/// Candidates are evaluated in parallel. The best mean accuracy wins, ties go
/// to the earlier candidate, and the winner is refit on all rows.
pub fn grid_search(
    features: ArrayView2<'_, f32>,
    targets: &[usize],
    n_classes: usize,
    grid: &[f64],
    folds: usize,
    seed: u64,
) -> Result<(LinearSvmClassifier, GridSearchResult)> {
    if grid.is_empty() {
        return Err(IntentError::Config("SVM C grid is empty".into()));
    }

    let splits = stratified_k_fold(targets, folds, seed);
    info!(
        "Fitting {} folds for each of {} candidates, totalling {} fits",
        splits.len(),
        grid.len(),
        splits.len() * grid.len()
    );

    let scores = if splits.is_empty() {
        warn!("Too few rows to cross-validate; scoring every candidate as 0");
        grid.iter().map(|&c| (c, 0.0)).collect::<Vec<_>>()
    } else {
        grid.par_iter()
            .map(|&c| {
                let mut total = 0.0;
                for split in &splits {
                    let train_x = features.select(Axis(0), &split.train);
                    let train_y: Vec<usize> = split.train.iter().map(|&i| targets[i]).collect();
                    let model = LinearSvmClassifier::fit(train_x.view(), &train_y, n_classes, c)?;

                    let eval_x = features.select(Axis(0), &split.eval);
                    let predicted = model.predict(eval_x.view());
                    let correct = predicted
                        .iter()
                        .zip(&split.eval)
                        .filter(|&(&p, &i)| p == targets[i])
                        .count();
                    total += correct as f64 / split.eval.len() as f64;
                }
                let mean = total / splits.len() as f64;
                debug!("C={}: mean CV accuracy {:.4}", c, mean);
                Ok((c, mean))
            })
            .collect::<Result<Vec<_>>>()?
    };

    let (best_c, best_score) = scores
        .iter()
        .copied()
        .fold(None, |best: Option<(f64, f64)>, (c, score)| match best {
            Some((_, s)) if s >= score => best,
            _ => Some((c, score)),
        })
        .unwrap_or((grid[0], 0.0));
    info!("Best C={} with mean CV accuracy {:.4}", best_c, best_score);

    let model = LinearSvmClassifier::fit(features, targets, n_classes, best_c)?;
    Ok((
        model,
        GridSearchResult {
            best_c,
            best_score,
            scores,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn clusters() -> (Array2<f32>, Vec<usize>) {
        let x = array![
            [1.0f32, 0.0, 0.0],
            [0.9, 0.1, 0.0],
            [0.8, 0.2, 0.0],
            [0.95, 0.0, 0.05],
            [0.0, 1.0, 0.0],
            [0.1, 0.9, 0.0],
            [0.2, 0.8, 0.0],
            [0.0, 0.95, 0.05],
            [0.0, 0.0, 1.0],
            [0.0, 0.1, 0.9],
            [0.0, 0.2, 0.8],
            [0.05, 0.0, 0.95],
        ];
        let y = vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2];
        (x, y)
    }

    #[test]
    fn test_linear_svm_separates_clusters() {
        let (x, y) = clusters();
        let model = LinearSvmClassifier::fit(x.view(), &y, 3, 10.0).unwrap();

        assert_eq!(model.n_classes(), 3);
        let queries = array![[0.97f32, 0.03, 0.0], [0.03, 0.97, 0.0], [0.0, 0.03, 0.97]];
        assert_eq!(model.predict(queries.view()), vec![0, 1, 2]);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y) = clusters();
        let model = LinearSvmClassifier::fit(x.view(), &y, 3, 1.0).unwrap();
        let proba = model.predict_proba(x.view());
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn test_missing_class_never_wins() {
        let (x, y) = clusters();
        let model = LinearSvmClassifier::fit(x.slice(ndarray::s![..8, ..]), &y[..8], 3, 1.0).unwrap();
        let proba = model.predict_proba(array![[0.0f32, 0.0, 1.0]].view());
        assert!(proba[[0, 2]] < 1e-6);
    }

    #[test]
    fn test_grid_search_picks_a_candidate_and_refits() {
        let (x, y) = clusters();
        let grid = [0.1, 1.0, 10.0];
        let (model, result) = grid_search(x.view(), &y, 3, &grid, 4, 42).unwrap();

        assert!(grid.contains(&result.best_c));
        assert_eq!(model.c(), result.best_c);
        assert_eq!(result.scores.len(), 3);
        assert!(result.best_score > 0.5);
    }

    #[test]
    fn test_serialization_keeps_probabilities() {
        let (x, y) = clusters();
        let model = LinearSvmClassifier::fit(x.view(), &y, 3, 1.0).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let loaded: LinearSvmClassifier = serde_json::from_str(&json).unwrap();
        let before = model.predict_proba(x.view());
        let after = loaded.predict_proba(x.view());
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
