//! Query-time intent prediction.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;

use crate::answers::AnswerTable;
use crate::embedding::TextEmbedder;
use crate::error::{IntentError, Result};
use crate::registry::{ModelBundle, ModelRegistry};
use crate::training::ProbabilisticClassifier;

/// Intent reported when no class clears the confidence threshold
pub const UNKNOWN_INTENT: &str = "unknown_intent";

pub const DEFAULT_THRESHOLD: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub intent: String,
    pub answer: String,
    /// Highest class probability, whether or not it cleared the threshold
    pub confidence: f64,
    /// Model version that produced the prediction
    pub version: String,
}

impl Prediction {
    pub fn is_unknown(&self) -> bool {
        self.intent == UNKNOWN_INTENT
    }
}

/// Embeds queries and classifies them with a registry model.
///
/// Loaded bundles are cached per version and shared read-only, so concurrent
/// predictions never block each other once a version is loaded.
pub struct PredictionService {
    embedder: Arc<dyn TextEmbedder>,
    registry: ModelRegistry,
    answers: AnswerTable,
    cache: RwLock<HashMap<String, Arc<ModelBundle>>>,
}

impl PredictionService {
    pub fn new(embedder: Arc<dyn TextEmbedder>, registry: ModelRegistry, answers: AnswerTable) -> Self {
        Self {
            embedder,
            registry,
            answers,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn list_models(&self) -> Result<Vec<String>> {
        self.registry.list_versions()
    }

    /// Returns the bundle for `version` (latest when `None`), loading it once.
    ///
    /// # Errors
    /// - `NoModelsAvailable` / `UnknownModel` when the version cannot be resolved
    /// - `ModelLoad` when the bundle is broken or was trained with an embedder
    ///   of a different dimension
    pub fn bundle(&self, version: Option<&str>) -> Result<Arc<ModelBundle>> {
        let version = self.registry.resolve(version)?;
        if let Some(bundle) = self.cache.read().get(&version) {
            return Ok(Arc::clone(bundle));
        }

        let bundle = self.registry.load(&version)?;
        if bundle.metadata.embedding_dimension != self.embedder.dimension() {
            return Err(IntentError::model_load(
                &version,
                format!(
                    "trained on {}-dimensional embeddings ({}), but the embedder '{}' produces {}",
                    bundle.metadata.embedding_dimension,
                    bundle.metadata.embedding_model,
                    self.embedder.model_name(),
                    self.embedder.dimension()
                ),
            ));
        }
        info!("Loaded model '{}'", version);

        let bundle = Arc::new(bundle);
        let mut cache = self.cache.write();
        Ok(Arc::clone(cache.entry(version).or_insert(bundle)))
    }

    /// Classifies `query` with `version` (latest when `None`).
    ///
    /// The most probable intent is returned when its probability is at least
    /// `threshold`; otherwise the intent is [`UNKNOWN_INTENT`]. `confidence` is
    /// the highest probability either way.
    pub fn predict(&self, query: &str, version: Option<&str>, threshold: f64) -> Result<Prediction> {
        if query.trim().is_empty() {
            return Err(IntentError::Validation("Query cannot be empty".into()));
        }
        if threshold.is_nan() {
            return Err(IntentError::Validation("Threshold must be a number".into()));
        }

        let bundle = self.bundle(version)?;
        let vector = self.embedder.embed_one(query)?;
        let features = vector.insert_axis(ndarray::Axis(0));
        let probabilities = bundle.model.predict_proba(features.view());

        let (class_id, confidence) = probabilities
            .row(0)
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        let intent = if confidence >= threshold {
            bundle
                .encoder
                .decode(class_id)
                .ok_or_else(|| IntentError::model_load(&bundle.version, format!("no label for class {}", class_id)))?
                .to_string()
        } else {
            UNKNOWN_INTENT.to_string()
        };
        debug!("'{}' -> {} ({:.4})", query, intent, confidence);

        Ok(Prediction {
            answer: self.answers.answer_for(&intent).to_string(),
            intent,
            confidence,
            version: bundle.version.clone(),
        })
    }

    pub fn predict_default(&self, query: &str) -> Result<Prediction> {
        self.predict(query, None, DEFAULT_THRESHOLD)
    }
}
