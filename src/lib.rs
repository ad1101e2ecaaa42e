//! Embedding-based FAQ intent classification.
//!
//! Questions are embedded with a sentence-embedding model and classified by a
//! retrainable classifier: a linear SVM or gradient-boosted oblivious trees.
//! Trained models are stored as versioned bundles in a [`ModelRegistry`] and
//! served by a [`PredictionService`] that maps intents to canned answers.

pub mod answers;
pub mod config;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod model_manager;
pub mod models;
pub mod prediction;
pub mod registry;
pub mod runtime;
pub mod training;

pub use answers::{AnswerTable, NO_ANSWER};
pub use config::Settings;
pub use dataset::{Dataset, LabeledExample};
pub use embedding::{HashingEmbedder, OnnxEmbedder, Pooling, TextEmbedder};
pub use error::{IntentError, Result};
pub use model_manager::{ModelError, ModelManager};
pub use models::{BuiltinModel, ModelCharacteristics, ModelInfo};
pub use prediction::{Prediction, PredictionService, DEFAULT_THRESHOLD, UNKNOWN_INTENT};
pub use registry::{BundleMetadata, ModelBundle, ModelRegistry};
pub use runtime::RuntimeConfig;
pub use training::{
    spawn_training, ClassificationReport, IntentModel, ProbabilisticClassifier, Strategy, Trainer, TrainerConfig,
    TrainingOutcome,
};

pub fn init_logger() {
    env_logger::init();
}
