use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Precision, recall and F1 for one label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class evaluation of predicted labels against true labels.
///
/// Labels cover the union of true and predicted values, sorted. Undefined
/// ratios (no predictions, no support) count as 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ClassificationReport {
    pub fn new<S: AsRef<str>>(y_true: &[S], y_pred: &[S]) -> Self {
        let labels: BTreeSet<&str> = y_true.iter().chain(y_pred).map(AsRef::as_ref).collect();
        let pairs: Vec<(&str, &str)> = y_true
            .iter()
            .zip(y_pred)
            .map(|(t, p)| (t.as_ref(), p.as_ref()))
            .collect();

        let classes: Vec<ClassMetrics> = labels
            .into_iter()
            .map(|label| {
                let true_pos = pairs.iter().filter(|(t, p)| *t == label && *p == label).count();
                let predicted = pairs.iter().filter(|(_, p)| *p == label).count();
                let support = pairs.iter().filter(|(t, _)| *t == label).count();
                let precision = ratio(true_pos, predicted);
                let recall = ratio(true_pos, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: label.to_string(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let total = pairs.len();
        let correct = pairs.iter().filter(|(t, p)| t == p).count();
        let n = classes.len().max(1) as f64;
        let macro_avg = AverageMetrics {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
            support: total,
        };
        let weight = |value: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes.iter().map(|c| value(c) * c.support as f64).sum::<f64>() / total as f64
            }
        };
        let weighted_avg = AverageMetrics {
            precision: weight(|c| c.precision),
            recall: weight(|c| c.recall),
            f1: weight(|c| c.f1),
            support: total,
        };

        Self {
            accuracy: ratio(correct, total),
            classes,
            macro_avg,
            weighted_avg,
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.label.as_str()).collect()
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.label.len())
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(12);

        writeln!(f, "{:>width$} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.label, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, avg.support
            )?;
        }
        Ok(())
    }
}
