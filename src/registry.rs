//! Directory-per-version store of trained model bundles.
//!
//! Each version directory holds three JSON artifacts: the fitted classifier,
//! its label encoder and the bundle metadata. Versions are written once into a
//! hidden staging directory and renamed into place, so a listed version is
//! always complete.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{IntentError, Result};
use crate::training::{Hyperparameters, IntentModel, LabelEncoder, ProbabilisticClassifier, Strategy};

pub const CLASSIFIER_FILE: &str = "classifier.json";
pub const ENCODER_FILE: &str = "label_encoder.json";
pub const METADATA_FILE: &str = "metadata.json";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M";
const TIMESTAMP_LEN: usize = 13;
const MAX_PUBLISH_ATTEMPTS: u32 = 1000;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Descriptive data stored next to every bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub strategy: Strategy,
    pub created_at: NaiveDateTime,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub labels: Vec<String>,
    pub train_size: usize,
    pub eval_size: usize,
    pub hyperparameters: Hyperparameters,
    pub eval_accuracy: f64,
}

/// A loaded model version: classifier, label encoder and metadata
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub version: String,
    pub model: IntentModel,
    pub encoder: LabelEncoder,
    pub metadata: BundleMetadata,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

/// Sort key putting versions in creation order.
///
/// `svm_model_20240101_1230_2` → (2024-01-01 12:30, 2, name). Names that carry
/// no timestamp sort before all timestamped ones.
fn recency_key(name: &str) -> (Option<NaiveDateTime>, u32, &str) {
    let Some(pos) = name.find("_model_") else {
        return (None, 0, name);
    };
    let rest = &name[pos + "_model_".len()..];
    let Some(stamp) = rest.get(..TIMESTAMP_LEN) else {
        return (None, 0, name);
    };
    let Ok(created) = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT) else {
        return (None, 0, name);
    };
    let suffix = rest[TIMESTAMP_LEN..]
        .strip_prefix('_')
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);
    (Some(created), suffix, name)
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version names, oldest first. A missing root is an empty registry.
    pub fn list_versions(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    versions.push(name.to_string());
                }
            }
        }
        versions.sort_by(|a, b| recency_key(a).cmp(&recency_key(b)));
        Ok(versions)
    }

    /// Picks `version` if it exists, or the most recent version when `None`.
    pub fn resolve(&self, version: Option<&str>) -> Result<String> {
        let versions = self.list_versions()?;
        match version {
            Some(requested) if versions.iter().any(|v| v == requested) => Ok(requested.to_string()),
            Some(requested) => Err(IntentError::UnknownModel {
                requested: requested.to_string(),
                available: versions,
            }),
            None => versions.into_iter().next_back().ok_or(IntentError::NoModelsAvailable),
        }
    }

    pub fn latest(&self) -> Result<String> {
        self.resolve(None)
    }

    pub fn load(&self, version: &str) -> Result<ModelBundle> {
        let dir = self.root.join(version);
        if !dir.is_dir() {
            return Err(IntentError::model_load(version, "version directory not found"));
        }

        let model: IntentModel = read_artifact(&dir, CLASSIFIER_FILE, version)?;
        let encoder: LabelEncoder = read_artifact(&dir, ENCODER_FILE, version)?;
        let metadata: BundleMetadata = read_artifact(&dir, METADATA_FILE, version)?;

        if model.n_classes() != encoder.len() {
            return Err(IntentError::model_load(
                version,
                format!(
                    "classifier has {} classes but the label encoder has {}",
                    model.n_classes(),
                    encoder.len()
                ),
            ));
        }
        if model.dimension() != metadata.embedding_dimension {
            return Err(IntentError::model_load(
                version,
                format!(
                    "classifier expects {}-dimensional input but metadata records {}",
                    model.dimension(),
                    metadata.embedding_dimension
                ),
            ));
        }

        debug!("Loaded model bundle '{}' from {}", version, dir.display());
        Ok(ModelBundle {
            version: version.to_string(),
            model,
            encoder,
            metadata,
        })
    }

    /// Writes a new version named after the strategy and `metadata.created_at`.
    ///
    /// Artifacts go to a staging directory private to this call, which is
    /// renamed into place once complete. Existing versions and other writers'
    /// staging directories are never touched.
    pub fn create_version(
        &self,
        model: &IntentModel,
        encoder: &LabelEncoder,
        metadata: &BundleMetadata,
    ) -> Result<String> {
        if model.n_classes() != encoder.len() {
            return Err(IntentError::Training(format!(
                "classifier has {} classes but the label encoder has {}",
                model.n_classes(),
                encoder.len()
            )));
        }
        fs::create_dir_all(&self.root)?;

        let stamp = metadata.created_at.format(TIMESTAMP_FORMAT).to_string();
        let base = format!("{}_model_{}", metadata.strategy, stamp);

        // Unique per writer; create_dir fails rather than reuse another run's directory.
        let staging = self.root.join(format!(
            ".{}.{}-{}.partial",
            base,
            std::process::id(),
            STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir(&staging)?;

        let written = write_artifact(&staging, CLASSIFIER_FILE, model)
            .and_then(|_| write_artifact(&staging, ENCODER_FILE, encoder))
            .and_then(|_| write_artifact(&staging, METADATA_FILE, metadata))
            .and_then(|_| self.publish(&staging, &base, &stamp));
        match written {
            Ok(name) => {
                info!("Saved model version '{}' to {}", name, self.root.display());
                Ok(name)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                Err(e)
            }
        }
    }

    /// Renames a complete staging directory to the next free version name.
    ///
    /// Versions created within the same minute are numbered `_2`, `_3`, ...
    /// across strategies. A name taken by a concurrent writer is skipped.
    fn publish(&self, staging: &Path, base: &str, stamp: &str) -> Result<String> {
        let minute = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok();
        let last_suffix = self
            .list_versions()?
            .iter()
            .map(|v| recency_key(v))
            .filter(|(created, _, _)| created.is_some() && *created == minute)
            .map(|(_, suffix, _)| suffix)
            .max();

        let mut suffix = last_suffix.map_or(1, |s| s + 1);
        for _ in 0..MAX_PUBLISH_ATTEMPTS {
            let name = if suffix > 1 {
                format!("{}_{}", base, suffix)
            } else {
                base.to_string()
            };
            let target = self.root.join(&name);
            if !target.exists() {
                match fs::rename(staging, &target) {
                    Ok(()) => return Ok(name),
                    Err(e) if target.exists() => debug!("Version '{}' was taken concurrently: {}", name, e),
                    Err(e) => return Err(e.into()),
                }
            }
            suffix += 1;
        }
        Err(IntentError::Training(format!(
            "No free version name for '{}' after {} attempts",
            base, MAX_PUBLISH_ATTEMPTS
        )))
    }
}

fn read_artifact<T: DeserializeOwned>(dir: &Path, file: &str, version: &str) -> Result<T> {
    let path = dir.join(file);
    let bytes = fs::read(&path).map_err(|e| IntentError::model_load(version, format!("{}: {}", file, e)))?;
    serde_json::from_slice(&bytes).map_err(|e| IntentError::model_load(version, format!("{}: {}", file, e)))
}

fn write_artifact<T: Serialize>(dir: &Path, file: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| IntentError::Training(format!("Failed to serialize {}: {}", file, e)))?;
    fs::write(dir.join(file), bytes)?;
    Ok(())
}
