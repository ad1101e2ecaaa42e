use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{IntentError, Result};

/// Row indices of a train/evaluation partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub eval: Vec<usize>,
}

fn group_by_class(targets: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &class) in targets.iter().enumerate() {
        groups.entry(class).or_default().push(row);
    }
    groups
}

/// Splits rows so each class keeps its proportion in both partitions.
///
/// Every class contributes `round(n * eval_fraction)` rows to evaluation,
/// clamped so that both partitions receive at least one row of the class.
///
/// # Errors
/// - `Split` if any class has fewer than two rows
pub fn stratified_split(
    targets: &[usize],
    class_names: &[String],
    eval_fraction: f64,
    seed: u64,
) -> Result<SplitIndices> {
    let groups = group_by_class(targets);
    let too_small: Vec<String> = groups
        .iter()
        .filter(|(_, rows)| rows.len() < 2)
        .map(|(&class, rows)| {
            let name = class_names.get(class).map(String::as_str).unwrap_or("?");
            format!("'{}' ({} example)", name, rows.len())
        })
        .collect();
    if !too_small.is_empty() {
        return Err(IntentError::Split(format!(
            "The least populated labels need at least 2 examples for a stratified split: {}",
            too_small.join(", ")
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = SplitIndices {
        train: Vec::with_capacity(targets.len()),
        eval: Vec::new(),
    };
    for (_, mut rows) in groups {
        rows.shuffle(&mut rng);
        let n = rows.len();
        let n_eval = ((n as f64 * eval_fraction).round() as usize).clamp(1, n - 1);
        split.eval.extend_from_slice(&rows[..n_eval]);
        split.train.extend_from_slice(&rows[n_eval..]);
    }
    split.train.sort_unstable();
    split.eval.sort_unstable();
    Ok(split)
}

/// Assigns rows to `k` folds, dealing each class's shuffled rows round-robin.
///
/// Returns `(train, validation)` index pairs for each fold. A class with fewer
/// than `k` rows is simply missing from some validation folds.
pub fn stratified_k_fold(targets: &[usize], k: usize, seed: u64) -> Vec<SplitIndices> {
    let k = k.max(2);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fold_of = vec![0usize; targets.len()];
    let mut next_fold = 0usize;
    for (_, mut rows) in group_by_class(targets) {
        rows.shuffle(&mut rng);
        for row in rows {
            fold_of[row] = next_fold;
            next_fold = (next_fold + 1) % k;
        }
    }

    (0..k)
        .map(|fold| {
            let (eval, train): (Vec<usize>, Vec<usize>) = (0..targets.len()).partition(|&row| fold_of[row] == fold);
            SplitIndices { train, eval }
        })
        .filter(|split| !split.eval.is_empty() && !split.train.is_empty())
        .collect()
}
