//! Gradient-boosted oblivious decision trees for multi-class classification.
//!
//! Every tree is symmetric: all nodes on one level share the same
//! `(feature, border)` test, so a tree of depth `d` is just `d` splits and
//! `2^d` leaves, and a row's leaf index is the bit pattern of its test
//! outcomes. Features are quantized to quantile borders once up front; split
//! search runs over per-leaf gradient histograms in parallel across features.
//! Leaves hold Newton steps of the softmax log loss for every class.

use log::{debug, info};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::classifier::ProbabilisticClassifier;
use crate::error::{IntentError, Result};

/// Hyperparameters of the boosted-tree strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub iterations: usize,
    pub learning_rate: f64,
    pub depth: usize,
    pub early_stopping_rounds: usize,
    pub border_count: usize,
    pub l2_leaf_reg: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            iterations: 1000,
            learning_rate: 0.05,
            depth: 6,
            early_stopping_rounds: 50,
            border_count: 32,
            l2_leaf_reg: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ObliviousTree {
    /// `(feature, border)` per level; a row goes right when `x[feature] > border`
    splits: Vec<(usize, f32)>,
    /// `2^levels` leaves, `n_classes` values each, learning rate applied
    leaf_values: Vec<f64>,
}

impl ObliviousTree {
    fn leaf_index(&self, row: ArrayView1<'_, f32>) -> usize {
        self.splits
            .iter()
            .enumerate()
            .fold(0, |index, (level, &(feature, border))| {
                index | (usize::from(row[feature] > border) << level)
            })
    }

    fn leaf(&self, index: usize, n_classes: usize) -> &[f64] {
        &self.leaf_values[index * n_classes..(index + 1) * n_classes]
    }
}

/// Boosted oblivious-tree classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTreesClassifier {
    n_classes: usize,
    dimension: usize,
    trees: Vec<ObliviousTree>,
}

/// What happened while fitting: the iteration kept and its evaluation scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingSummary {
    pub best_iteration: usize,
    pub iterations_run: usize,
    pub eval_accuracy: Option<f64>,
    pub eval_loss: Option<f64>,
}

impl BoostedTreesClassifier {
    /// Fits up to `params.iterations` trees.
    ///
    /// With a non-empty evaluation set, training stops after
    /// `early_stopping_rounds` iterations without a higher evaluation accuracy,
    /// and the model is truncated to the best iteration (highest evaluation
    /// accuracy, lower log loss on ties).
    pub fn fit(
        train_x: ArrayView2<'_, f32>,
        train_y: &[usize],
        eval_x: ArrayView2<'_, f32>,
        eval_y: &[usize],
        n_classes: usize,
        params: &BoostingParams,
    ) -> Result<(Self, BoostingSummary)> {
        if train_x.nrows() != train_y.len() || eval_x.nrows() != eval_y.len() {
            return Err(IntentError::Training("Feature rows and targets differ in length".into()));
        }
        if train_x.nrows() == 0 || n_classes == 0 {
            return Err(IntentError::Training("Cannot boost on an empty training set".into()));
        }
        if params.border_count == 0 || params.border_count > 255 {
            return Err(IntentError::Config(format!(
                "border_count must be in 1..=255, got {}",
                params.border_count
            )));
        }

        let n = train_x.nrows();
        let quantized = Quantized::new(train_x, params.border_count);
        let mut model = Self {
            n_classes,
            dimension: train_x.ncols(),
            trees: Vec::new(),
        };

        let mut train_raw = Array2::<f64>::zeros((n, n_classes));
        let mut eval_raw = Array2::<f64>::zeros((eval_x.nrows(), n_classes));
        let mut grad = Array2::<f64>::zeros((n, n_classes));
        let mut hess = Array2::<f64>::zeros((n, n_classes));

        let mut best: Option<(f64, f64)> = None;
        let mut best_iteration = 0;
        let mut since_best = 0;
        let mut iterations_run = 0;

        for iteration in 0..params.iterations {
            for i in 0..n {
                let p = softmax(train_raw.row(i));
                for k in 0..n_classes {
                    let target = if train_y[i] == k { 1.0 } else { 0.0 };
                    grad[[i, k]] = p[k] - target;
                    hess[[i, k]] = (p[k] * (1.0 - p[k])).max(1e-6);
                }
            }

            let (tree, leaf_of) = grow_tree(&quantized, &grad, &hess, params);
            for (i, &leaf) in leaf_of.iter().enumerate() {
                for (k, v) in tree.leaf(leaf, n_classes).iter().enumerate() {
                    train_raw[[i, k]] += v;
                }
            }
            for (i, row) in eval_x.outer_iter().enumerate() {
                let leaf = tree.leaf_index(row);
                for (k, v) in tree.leaf(leaf, n_classes).iter().enumerate() {
                    eval_raw[[i, k]] += v;
                }
            }
            model.trees.push(tree);
            iterations_run = iteration + 1;

            if eval_y.is_empty() {
                continue;
            }
            let score = evaluate(&eval_raw, eval_y);
            // Patience only resets on a strictly better accuracy; equal accuracy
            // with a lower loss moves the best iteration without resetting it.
            let (better, tied_lower_loss) = match best {
                None => (true, false),
                Some((acc, loss)) => (score.0 > acc + 1e-12, (score.0 - acc).abs() <= 1e-12 && score.1 < loss),
            };
            if better || tied_lower_loss {
                best = Some(score);
                best_iteration = iteration;
            }
            if better {
                since_best = 0;
            } else {
                since_best += 1;
                if since_best >= params.early_stopping_rounds {
                    info!(
                        "Stopped by early stopping after {} iterations; best iteration {}",
                        iterations_run, best_iteration
                    );
                    break;
                }
            }
            if iteration % 100 == 0 {
                debug!("iteration {}: eval accuracy {:.4}, eval loss {:.4}", iteration, score.0, score.1);
            }
        }

        if eval_y.is_empty() {
            best_iteration = iterations_run.saturating_sub(1);
        } else {
            model.trees.truncate(best_iteration + 1);
            info!("Shrinking model to first {} iterations", best_iteration + 1);
        }

        Ok((
            model,
            BoostingSummary {
                best_iteration,
                iterations_run,
                eval_accuracy: best.map(|b| b.0),
                eval_loss: best.map(|b| b.1),
            },
        ))
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn raw_scores(&self, row: ArrayView1<'_, f32>) -> Vec<f64> {
        let mut raw = vec![0.0; self.n_classes];
        for tree in &self.trees {
            let leaf = tree.leaf(tree.leaf_index(row), self.n_classes);
            for (r, v) in raw.iter_mut().zip(leaf) {
                *r += v;
            }
        }
        raw
    }
}

impl ProbabilisticClassifier for BoostedTreesClassifier {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, features: ArrayView2<'_, f32>) -> Array2<f64> {
        let mut probabilities = Array2::<f64>::zeros((features.nrows(), self.n_classes));
        for (row, mut out) in features.outer_iter().zip(probabilities.outer_iter_mut()) {
            let raw = self.raw_scores(row);
            for (p, v) in out.iter_mut().zip(softmax(ArrayView1::from(&raw[..]))) {
                *p = v;
            }
        }
        probabilities
    }
}

fn softmax(raw: ArrayView1<'_, f64>) -> Vec<f64> {
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = raw.iter().map(|&v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Accuracy and mean log loss of raw scores against targets
fn evaluate(raw: &Array2<f64>, targets: &[usize]) -> (f64, f64) {
    let mut correct = 0usize;
    let mut loss = 0.0;
    for (row, &target) in raw.outer_iter().zip(targets) {
        let p = softmax(row);
        let predicted = argmax(&p);
        if predicted == target {
            correct += 1;
        }
        loss -= p[target].max(1e-15).ln();
    }
    let n = targets.len().max(1) as f64;
    (correct as f64 / n, loss / n)
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best_i, best_v), (i, &v)| {
            if v > best_v {
                (i, v)
            } else {
                (best_i, best_v)
            }
        })
        .0
}

/// Training features mapped to bin ids over per-feature quantile borders.
///
/// `bins[f][i]` is the number of borders of feature `f` strictly below row
/// `i`'s value, so `x > borders[f][j]` exactly when `bins[f][i] > j`.
struct Quantized {
    borders: Vec<Vec<f32>>,
    bins: Vec<Vec<u8>>,
}

impl Quantized {
    fn new(features: ArrayView2<'_, f32>, border_count: usize) -> Self {
        let (borders, bins) = features
            .columns()
            .into_iter()
            .map(|column| {
                let borders = quantile_borders(column, border_count);
                let bins: Vec<u8> = column
                    .iter()
                    .map(|&v| borders.partition_point(|&b| b < v) as u8)
                    .collect();
                (borders, bins)
            })
            .unzip();
        Self { borders, bins }
    }
}

fn quantile_borders(column: ArrayView1<'_, f32>, border_count: usize) -> Vec<f32> {
    let mut values: Vec<f32> = column.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup();
    if values.len() < 2 {
        return Vec::new();
    }

    let midpoints: Vec<f32> = values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    if midpoints.len() <= border_count {
        return midpoints;
    }
    let mut borders: Vec<f32> = (1..=border_count)
        .map(|q| midpoints[(q * midpoints.len() / (border_count + 1)).min(midpoints.len() - 1)])
        .collect();
    borders.dedup();
    borders
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f64,
    feature: usize,
    border: usize,
}

fn grow_tree(
    data: &Quantized,
    grad: &Array2<f64>,
    hess: &Array2<f64>,
    params: &BoostingParams,
) -> (ObliviousTree, Vec<usize>) {
    let n = grad.nrows();
    let k = grad.ncols();
    let lambda = params.l2_leaf_reg;
    let mut leaf_of = vec![0usize; n];
    let mut splits = Vec::with_capacity(params.depth);

    for level in 0..params.depth {
        let n_leaves = 1usize << level;
        let best = (0..data.borders.len())
            .into_par_iter()
            .filter_map(|feature| best_border(data, feature, &leaf_of, n_leaves, grad, hess, lambda))
            .reduce_with(|a, b| {
                if b.score > a.score || (b.score == a.score && b.feature < a.feature) {
                    b
                } else {
                    a
                }
            });
        let Some(best) = best else {
            break;
        };

        let bins = &data.bins[best.feature];
        for (leaf, &bin) in leaf_of.iter_mut().zip(bins) {
            *leaf |= usize::from(usize::from(bin) > best.border) << level;
        }
        splits.push((best.feature, data.borders[best.feature][best.border]));
    }

    let n_leaves = 1usize << splits.len();
    let mut g_sum = vec![0.0; n_leaves * k];
    let mut h_sum = vec![0.0; n_leaves * k];
    for (i, &leaf) in leaf_of.iter().enumerate() {
        for c in 0..k {
            g_sum[leaf * k + c] += grad[[i, c]];
            h_sum[leaf * k + c] += hess[[i, c]];
        }
    }
    let leaf_values = g_sum
        .iter()
        .zip(&h_sum)
        .map(|(g, h)| -params.learning_rate * g / (h + lambda))
        .collect();

    (ObliviousTree { splits, leaf_values }, leaf_of)
}

/// Best border of one feature given the current leaf assignment.
///
/// The score is `Σ_leaf Σ_class G²/(H+λ)` over both children, which ranks
/// splits the same way as the loss reduction.
fn best_border(
    data: &Quantized,
    feature: usize,
    leaf_of: &[usize],
    n_leaves: usize,
    grad: &Array2<f64>,
    hess: &Array2<f64>,
    lambda: f64,
) -> Option<Candidate> {
    let n_borders = data.borders[feature].len();
    if n_borders == 0 {
        return None;
    }
    let n_bins = n_borders + 1;
    let k = grad.ncols();

    let mut hist_g = vec![0.0; n_leaves * n_bins * k];
    let mut hist_h = vec![0.0; n_leaves * n_bins * k];
    for (i, (&bin, &leaf)) in data.bins[feature].iter().zip(leaf_of).enumerate() {
        let base = (leaf * n_bins + usize::from(bin)) * k;
        for c in 0..k {
            hist_g[base + c] += grad[[i, c]];
            hist_h[base + c] += hess[[i, c]];
        }
    }

    let mut totals_g = vec![0.0; n_leaves * k];
    let mut totals_h = vec![0.0; n_leaves * k];
    for leaf in 0..n_leaves {
        for bin in 0..n_bins {
            let base = (leaf * n_bins + bin) * k;
            for c in 0..k {
                totals_g[leaf * k + c] += hist_g[base + c];
                totals_h[leaf * k + c] += hist_h[base + c];
            }
        }
    }

    let mut left_g = vec![0.0; n_leaves * k];
    let mut left_h = vec![0.0; n_leaves * k];
    let mut best: Option<Candidate> = None;
    for border in 0..n_borders {
        let mut score = 0.0;
        for leaf in 0..n_leaves {
            let base = (leaf * n_bins + border) * k;
            for c in 0..k {
                let idx = leaf * k + c;
                left_g[idx] += hist_g[base + c];
                left_h[idx] += hist_h[base + c];
                let right_g = totals_g[idx] - left_g[idx];
                let right_h = totals_h[idx] - left_h[idx];
                score += left_g[idx] * left_g[idx] / (left_h[idx] + lambda)
                    + right_g * right_g / (right_h + lambda);
            }
        }
        if best.map_or(true, |b| score > b.score) {
            best = Some(Candidate { score, feature, border });
        }
    }
    best
}
