use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{IntentError, Result};

/// Bijection between label strings and dense class ids `0..n`.
///
/// Classes are stored sorted, so the same label set always yields the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let classes: BTreeSet<&str> = labels.iter().map(AsRef::as_ref).collect();
        Self {
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(label)).ok()
    }

    /// Encodes every label, failing on the first one the encoder has not seen.
    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                self.encode(label)
                    .ok_or_else(|| IntentError::Validation(format!("Unseen label '{}'", label)))
            })
            .collect()
    }

    pub fn decode(&self, class_id: usize) -> Option<&str> {
        self.classes.get(class_id).map(String::as_str)
    }

    pub fn inverse_transform(&self, class_ids: &[usize]) -> Result<Vec<String>> {
        class_ids
            .iter()
            .map(|&id| {
                self.decode(id)
                    .map(str::to_string)
                    .ok_or_else(|| IntentError::Validation(format!("Unknown class id {}", id)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_sorts_and_dedups() {
        let encoder = LabelEncoder::fit(&["refund", "reset", "refund", "billing"]);
        assert_eq!(encoder.classes(), &["billing", "refund", "reset"]);
        assert_eq!(encoder.transform(&["reset", "billing"]).unwrap(), vec![2, 0]);
        assert_eq!(encoder.inverse_transform(&[1]).unwrap(), vec!["refund".to_string()]);
    }

    #[test]
    fn test_unknown_values_fail() {
        let encoder = LabelEncoder::fit(&["a", "b"]);
        assert!(encoder.transform(&["c"]).is_err());
        assert!(encoder.inverse_transform(&[2]).is_err());
        assert_eq!(encoder.decode(5), None);
    }
}
