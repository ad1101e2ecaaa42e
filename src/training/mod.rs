//! Fitting intent classifiers on embedded questions.
//!
//! [`Trainer::train`] validates the dataset, encodes labels, splits
//! train/evaluation rows, embeds the questions, fits the selected
//! [`Strategy`], evaluates it and writes a new registry version.

use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use log::{info, warn};
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

mod boosting;
mod classifier;
mod encoder;
mod platt;
mod report;
mod split;
mod svm;

pub use boosting::{BoostedTreesClassifier, BoostingParams, BoostingSummary};
pub use classifier::{Hyperparameters, IntentModel, ProbabilisticClassifier, Strategy, TrainingData};
pub use encoder::LabelEncoder;
pub use platt::PlattSigmoid;
pub use report::{AverageMetrics, ClassMetrics, ClassificationReport};
pub use split::{stratified_k_fold, stratified_split, SplitIndices};
pub use svm::{grid_search, GridSearchResult, LinearSvmClassifier};

use crate::dataset::Dataset;
use crate::embedding::{utils::stack_rows, TextEmbedder};
use crate::error::{IntentError, Result};
use crate::registry::{BundleMetadata, ModelRegistry};

/// Settings shared by every training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Share of every label's rows held out for evaluation
    pub eval_fraction: f64,
    pub seed: u64,
    pub svm_c_grid: Vec<f64>,
    pub cv_folds: usize,
    pub boosting: BoostingParams,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            eval_fraction: 0.1,
            seed: 42,
            svm_c_grid: vec![0.1, 1.0, 10.0, 100.0, 1000.0],
            cv_folds: 5,
            boosting: BoostingParams::default(),
        }
    }
}

/// Result of a successful training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub version: String,
    pub report: ClassificationReport,
    pub metadata: BundleMetadata,
    pub dropped_rows: usize,
}

pub struct Trainer {
    embedder: Arc<dyn TextEmbedder>,
    registry: ModelRegistry,
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(embedder: Arc<dyn TextEmbedder>, registry: ModelRegistry) -> Self {
        Self::with_config(embedder, registry, TrainerConfig::default())
    }

    pub fn with_config(embedder: Arc<dyn TextEmbedder>, registry: ModelRegistry, config: TrainerConfig) -> Self {
        Self {
            embedder,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn train_from_csv(&self, path: impl AsRef<Path>, strategy: Strategy) -> Result<TrainingOutcome> {
        let dataset = Dataset::from_csv_path(path)?;
        self.train(&dataset, strategy)
    }

    /// Trains `strategy` on `dataset` and persists the result as a new version.
    ///
    /// Dataset and split problems are reported before any embedding work.
    pub fn train(&self, dataset: &Dataset, strategy: Strategy) -> Result<TrainingOutcome> {
        if !(self.config.eval_fraction > 0.0 && self.config.eval_fraction < 1.0) {
            return Err(IntentError::Config(format!(
                "eval_fraction must be in (0, 1), got {}",
                self.config.eval_fraction
            )));
        }
        dataset.validate()?;
        if dataset.dropped_rows() > 0 {
            warn!("Dropped {} rows with an empty question or label", dataset.dropped_rows());
        }

        let (questions, labels) = dataset.columns();
        let encoder = LabelEncoder::fit(&labels);
        let targets = encoder.transform(&labels)?;
        let split = stratified_split(&targets, encoder.classes(), self.config.eval_fraction, self.config.seed)?;
        info!(
            "Training {} on {} examples ({} labels): {} train / {} eval",
            strategy,
            dataset.len(),
            encoder.len(),
            split.train.len(),
            split.eval.len()
        );

        let vectors = self.embedder.embed(&questions)?;
        if vectors.len() != questions.len() {
            return Err(IntentError::EmbeddingBackend(format!(
                "Embedder returned {} vectors for {} texts",
                vectors.len(),
                questions.len()
            )));
        }
        let dimension = self.embedder.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IntentError::EmbeddingBackend(format!(
                "Embedder returned a {}-dimensional vector, expected {}",
                bad.len(),
                dimension
            )));
        }
        let features = stack_rows(&vectors, dimension);

        let train_x = features.select(Axis(0), &split.train);
        let eval_x = features.select(Axis(0), &split.eval);
        let train_y: Vec<usize> = split.train.iter().map(|&i| targets[i]).collect();
        let eval_y: Vec<usize> = split.eval.iter().map(|&i| targets[i]).collect();

        let data = TrainingData {
            train_x: train_x.view(),
            train_y: &train_y,
            eval_x: eval_x.view(),
            eval_y: &eval_y,
            n_classes: encoder.len(),
        };
        let (model, hyperparameters) = strategy.fit(&data, &self.config)?;

        let predicted = model.predict(eval_x.view());
        let y_true = encoder.inverse_transform(&eval_y)?;
        let y_pred = encoder.inverse_transform(&predicted)?;
        let report = ClassificationReport::new(&y_true, &y_pred);
        info!("Evaluation accuracy: {:.4}", report.accuracy);

        let metadata = BundleMetadata {
            strategy,
            created_at: Local::now().naive_local(),
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dimension: dimension,
            labels: encoder.classes().to_vec(),
            train_size: split.train.len(),
            eval_size: split.eval.len(),
            hyperparameters,
            eval_accuracy: report.accuracy,
        };
        let version = self.registry.create_version(&model, &encoder, &metadata)?;

        Ok(TrainingOutcome {
            version,
            report,
            metadata,
            dropped_rows: dataset.dropped_rows(),
        })
    }

    /// Runs [`Trainer::train`] on the blocking thread pool.
    ///
    /// The outer `Result` of the awaited handle fails only if the task panicked.
    pub fn spawn(self: &Arc<Self>, dataset: Dataset, strategy: Strategy) -> JoinHandle<Result<TrainingOutcome>> {
        let trainer = Arc::clone(self);
        tokio::task::spawn_blocking(move || trainer.train(&dataset, strategy))
    }
}

/// Starts a training run in the background without blocking the caller.
pub fn spawn_training(
    trainer: &Arc<Trainer>,
    dataset: Dataset,
    strategy: Strategy,
) -> JoinHandle<Result<TrainingOutcome>> {
    trainer.spawn(dataset, strategy)
}
