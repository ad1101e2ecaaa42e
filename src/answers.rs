use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::error::{IntentError, Result};

/// Answer returned for `unknown_intent` and for intents without an entry
pub const NO_ANSWER: &str = "No answer found for this intent.";

/// Static intent → answer lookup, loaded once.
#[derive(Debug, Clone, Default)]
pub struct AnswerTable {
    answers: HashMap<String, String>,
}

impl AnswerTable {
    pub fn from_map(answers: HashMap<String, String>) -> Self {
        Self { answers }
    }

    /// Reads a JSON object of `"intent": "answer"` pairs.
    ///
    /// A missing file gives an empty table, so every intent resolves to
    /// [`NO_ANSWER`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Answer file {:?} not found; every intent will get the default answer", path);
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let answers: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| IntentError::Config(format!("Invalid answer file {:?}: {}", path, e)))?;
        info!("Loaded {} answers from {:?}", answers.len(), path);
        Ok(Self { answers })
    }

    pub fn answer_for(&self, intent: &str) -> &str {
        self.answers.get(intent).map(String::as_str).unwrap_or(NO_ANSWER)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_falls_back_to_default() {
        let table = AnswerTable::from_map(HashMap::from([(
            "reset_password".to_string(),
            "Use the reset link.".to_string(),
        )]));
        assert_eq!(table.answer_for("reset_password"), "Use the reset link.");
        assert_eq!(table.answer_for("unknown_intent"), NO_ANSWER);
    }

    #[test]
    fn test_missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = AnswerTable::from_json_file(dir.path().join("answers.json")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answers.json");
        fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(AnswerTable::from_json_file(&path), Err(IntentError::Config(_))));
    }

    #[test]
    fn test_reads_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answers.json");
        fs::write(&path, r#"{"billing": "See the billing page.", "refund": "Refunds take 5 days."}"#).unwrap();
        let table = AnswerTable::from_json_file(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.answer_for("refund"), "Refunds take 5 days.");
    }
}
