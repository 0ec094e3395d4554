//! Train/test splitting and cross-validation folds.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};

/// Row indices of a train/test split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n` with `seed` and hold out `ceil(n * test_fraction)` rows
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Result<SplitIndices> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(TriageError::invalid(format!(
            "test fraction must be in (0, 1), got {}",
            test_fraction
        )));
    }

    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(TriageError::insufficient(format!(
            "{} rows cannot be split with test fraction {}",
            n, test_fraction
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test = indices[..n_test].to_vec();
    let train = indices[n_test..].to_vec();
    Ok(SplitIndices { train, test })
}

/// One cross-validation fold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Stratified k-fold assignment.
///
/// Each class's rows are dealt round-robin to the folds in their original
/// order, so every fold keeps the class proportions of the whole set.
pub fn stratified_folds(labels: &[usize], k: usize) -> Result<Vec<Fold>> {
    if k < 2 {
        return Err(TriageError::invalid(format!("need at least 2 folds, got {}", k)));
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }
    for (class, rows) in &by_class {
        if rows.len() < k {
            return Err(TriageError::insufficient(format!(
                "class {} has {} rows, fewer than {} folds",
                class,
                rows.len(),
                k
            )));
        }
    }

    let mut assignment = vec![0usize; labels.len()];
    for rows in by_class.values() {
        for (rank, &row) in rows.iter().enumerate() {
            assignment[row] = rank % k;
        }
    }

    Ok((0..k)
        .map(|fold| {
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&i| assignment[i] == fold);
            Fold { train, validation }
        })
        .collect())
}
