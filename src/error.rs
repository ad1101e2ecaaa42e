use std::io;

/// Errors surfaced by training, the model registry and prediction.
///
/// Every variant is distinct so callers can tell a bad dataset from a missing
/// model or a broken embedding backend. A below-threshold prediction is not an
/// error; it comes back as a successful `unknown_intent` result.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    /// The training dataset is unreadable or lacks the required columns
    #[error("Dataset error: {0}")]
    Dataset(String),
    /// A label has too few examples for a stratified train/evaluation split
    #[error("Split error: {0}")]
    Split(String),
    /// The requested training strategy is not one of the known tags
    #[error("Unknown model type: '{0}' (expected one of: svm, catboost)")]
    UnknownStrategy(String),
    /// The registry holds no model versions
    #[error("No models available")]
    NoModelsAvailable,
    /// The requested model version does not exist in the registry
    #[error("Invalid model: '{requested}'. Choose from: {available:?}")]
    UnknownModel {
        requested: String,
        available: Vec<String>,
    },
    /// A model bundle is missing artifacts or could not be deserialized
    #[error("Failed to load model '{version}': {reason}")]
    ModelLoad { version: String, reason: String },
    /// The embedding model could not be initialized or failed during inference
    #[error("Embedding backend error: {0}")]
    EmbeddingBackend(String),
    /// A classifier could not be fitted
    #[error("Training error: {0}")]
    Training(String),
    /// Invalid caller input
    #[error("Validation error: {0}")]
    Validation(String),
    /// Invalid settings or answer table
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl IntentError {
    pub(crate) fn model_load(version: impl Into<String>, reason: impl ToString) -> Self {
        IntentError::ModelLoad {
            version: version.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ort::Error> for IntentError {
    fn from(err: ort::Error) -> Self {
        IntentError::EmbeddingBackend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IntentError>;
