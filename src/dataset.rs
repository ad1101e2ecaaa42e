//! Labeled training data.
//!
//! A dataset is a table with a `Question` column and a `Label` column. The
//! header is checked before any row is read so a malformed file fails fast,
//! long before the expensive embedding step.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{IntentError, Result};

pub const QUESTION_COLUMN: &str = "Question";
pub const LABEL_COLUMN: &str = "Label";

/// One `(question, label)` training row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub question: String,
    pub label: String,
}

impl LabeledExample {
    pub fn new(question: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            label: label.into(),
        }
    }
}

/// Validated training rows plus a count of the rows that were dropped.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    examples: Vec<LabeledExample>,
    dropped_rows: usize,
}

impl Dataset {
    /// Builds a dataset from in-memory examples.
    ///
    /// Examples whose question or label is blank are dropped and counted.
    pub fn from_examples(examples: impl IntoIterator<Item = LabeledExample>) -> Self {
        let mut dataset = Dataset::default();
        for example in examples {
            dataset.push(example.question, example.label);
        }
        dataset
    }

    /// Reads a CSV file with a header row.
    ///
    /// # Errors
    /// - `Dataset` if the file cannot be opened or parsed
    /// - `Dataset` if the `Question` or `Label` column is missing
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| IntentError::Dataset(format!("Error reading the dataset {:?}: {}", path, e)))?;
        let dataset = Self::from_csv_reader(file)?;
        info!(
            "Loaded {} examples ({} labels) from {:?}",
            dataset.len(),
            dataset.labels().len(),
            path
        );
        Ok(dataset)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| IntentError::Dataset(format!("Error reading the dataset header: {}", e)))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let (question_idx, label_idx) = match (column(QUESTION_COLUMN), column(LABEL_COLUMN)) {
            (Some(q), Some(l)) => (q, l),
            _ => {
                return Err(IntentError::Dataset(format!(
                    "Uploaded file must contain '{}' and '{}' columns (found: {:?})",
                    QUESTION_COLUMN,
                    LABEL_COLUMN,
                    headers.iter().collect::<Vec<_>>()
                )))
            }
        };

        let mut dataset = Dataset::default();
        for (line, record) in reader.records().enumerate() {
            let record = record
                .map_err(|e| IntentError::Dataset(format!("Error reading dataset row {}: {}", line + 1, e)))?;
            let question = record.get(question_idx).unwrap_or_default();
            let label = record.get(label_idx).unwrap_or_default();
            dataset.push(question.to_string(), label.to_string());
        }

        if dataset.dropped_rows > 0 {
            warn!("Dropped {} dataset rows with a blank question or label", dataset.dropped_rows);
        }
        Ok(dataset)
    }

    fn push(&mut self, question: String, label: String) {
        let question = question.trim();
        let label = label.trim();
        if question.is_empty() || label.is_empty() {
            self.dropped_rows += 1;
        } else {
            self.examples.push(LabeledExample::new(question, label));
        }
    }

    pub fn examples(&self) -> &[LabeledExample] {
        &self.examples
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Rows skipped because a value was blank
    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    /// Distinct labels in sorted order
    pub fn labels(&self) -> BTreeSet<&str> {
        self.examples.iter().map(|e| e.label.as_str()).collect()
    }

    /// Splits into parallel question and label sequences
    pub fn columns(&self) -> (Vec<&str>, Vec<&str>) {
        self.examples
            .iter()
            .map(|e| (e.question.as_str(), e.label.as_str()))
            .unzip()
    }

    /// Checks the dataset can train a classifier: at least two distinct labels.
    pub fn validate(&self) -> Result<()> {
        let labels = self.labels();
        if labels.len() < 2 {
            return Err(IntentError::Dataset(format!(
                "Dataset must contain at least two distinct labels, found {} across {} rows",
                labels.len(),
                self.len()
            )));
        }
        Ok(())
    }
}
