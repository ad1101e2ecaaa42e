use std::env;
use std::path::PathBuf;

use crate::error::{IntentError, Result};
use crate::prediction::DEFAULT_THRESHOLD;

pub const MODELS_DIR_VAR: &str = "FAQ_INTENT_MODELS_DIR";
pub const DATA_DIR_VAR: &str = "FAQ_INTENT_DATA_DIR";
pub const ANSWERS_VAR: &str = "FAQ_INTENT_ANSWERS";
pub const THRESHOLD_VAR: &str = "FAQ_INTENT_THRESHOLD";

/// Process settings resolved from the environment.
///
/// The embedding model cache is resolved separately by
/// [`ModelManager::get_default_models_dir`](crate::ModelManager::get_default_models_dir).
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Root of the model registry
    pub models_dir: PathBuf,
    /// Where datasets used for training are archived
    pub data_dir: PathBuf,
    pub answers_path: PathBuf,
    pub threshold: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            data_dir: PathBuf::from("data"),
            answers_path: PathBuf::from("answers.json"),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let threshold = match lookup(THRESHOLD_VAR) {
            Some(raw) => {
                check_threshold(&raw).map_err(|e| IntentError::Config(format!("{}: {}", THRESHOLD_VAR, e)))?
            }
            None => defaults.threshold,
        };
        Ok(Self {
            models_dir: lookup(MODELS_DIR_VAR).map(PathBuf::from).unwrap_or(defaults.models_dir),
            data_dir: lookup(DATA_DIR_VAR).map(PathBuf::from).unwrap_or(defaults.data_dir),
            answers_path: lookup(ANSWERS_VAR).map(PathBuf::from).unwrap_or(defaults.answers_path),
            threshold,
        })
    }
}

/// Parses a confidence threshold, which must lie in `[0, 1]`.
pub fn parse_threshold(raw: &str) -> Result<f64> {
    check_threshold(raw).map_err(IntentError::Config)
}

fn check_threshold(raw: &str) -> std::result::Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("threshold must be a number, got '{}'", raw))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("threshold must be between 0 and 1, got {}", value));
    }
    Ok(value)
}
