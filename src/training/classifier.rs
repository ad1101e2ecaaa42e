use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::boosting::{argmax, BoostedTreesClassifier};
use super::svm::{grid_search, LinearSvmClassifier};
use super::TrainerConfig;
use crate::error::{IntentError, Result};

/// A fitted multi-class classifier over embedding vectors.
pub trait ProbabilisticClassifier {
    fn n_classes(&self) -> usize;

    /// Per-class probabilities, one row per input row; each row sums to 1.
    fn predict_proba(&self, features: ArrayView2<'_, f32>) -> Array2<f64>;

    /// Most probable class id per row.
    fn predict(&self, features: ArrayView2<'_, f32>) -> Vec<usize> {
        self.predict_proba(features)
            .outer_iter()
            .map(|row| argmax(&row.to_vec()))
            .collect()
    }
}

/// Training strategy tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Svm,
    CatBoost,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Svm => "svm",
            Strategy::CatBoost => "catboost",
        }
    }

    /// Fits this strategy's classifier on already embedded, encoded data.
    pub fn fit(&self, data: &TrainingData<'_>, config: &TrainerConfig) -> Result<(IntentModel, Hyperparameters)> {
        match self {
            Strategy::Svm => {
                let (model, search) = grid_search(
                    data.train_x,
                    data.train_y,
                    data.n_classes,
                    &config.svm_c_grid,
                    config.cv_folds,
                    config.seed,
                )?;
                Ok((
                    IntentModel::Svm(model),
                    Hyperparameters::Svm {
                        c: search.best_c,
                        cv_accuracy: search.best_score,
                    },
                ))
            }
            Strategy::CatBoost => {
                let (model, summary) = BoostedTreesClassifier::fit(
                    data.train_x,
                    data.train_y,
                    data.eval_x,
                    data.eval_y,
                    data.n_classes,
                    &config.boosting,
                )?;
                let trees = model.tree_count();
                Ok((
                    IntentModel::Boosted(model),
                    Hyperparameters::CatBoost {
                        best_iteration: summary.best_iteration,
                        trees,
                    },
                ))
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = IntentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svm" => Ok(Strategy::Svm),
            "catboost" => Ok(Strategy::CatBoost),
            _ => Err(IntentError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Embedded and encoded partitions handed to a strategy
pub struct TrainingData<'a> {
    pub train_x: ArrayView2<'a, f32>,
    pub train_y: &'a [usize],
    pub eval_x: ArrayView2<'a, f32>,
    pub eval_y: &'a [usize],
    pub n_classes: usize,
}

/// Hyperparameters selected while fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum Hyperparameters {
    Svm { c: f64, cv_accuracy: f64 },
    CatBoost { best_iteration: usize, trees: usize },
}

/// The fitted classifier of either strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "lowercase")]
pub enum IntentModel {
    Svm(LinearSvmClassifier),
    Boosted(BoostedTreesClassifier),
}

impl IntentModel {
    pub fn strategy(&self) -> Strategy {
        match self {
            IntentModel::Svm(_) => Strategy::Svm,
            IntentModel::Boosted(_) => Strategy::CatBoost,
        }
    }

    /// Width of the feature vectors the model was fitted on
    pub fn dimension(&self) -> usize {
        match self {
            IntentModel::Svm(model) => model.dimension(),
            IntentModel::Boosted(model) => model.dimension(),
        }
    }
}

impl ProbabilisticClassifier for IntentModel {
    fn n_classes(&self) -> usize {
        match self {
            IntentModel::Svm(model) => model.n_classes(),
            IntentModel::Boosted(model) => model.n_classes(),
        }
    }

    fn predict_proba(&self, features: ArrayView2<'_, f32>) -> Array2<f64> {
        match self {
            IntentModel::Svm(model) => model.predict_proba(features),
            IntentModel::Boosted(model) => model.predict_proba(features),
        }
    }
}
