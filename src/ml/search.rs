//! Hyperparameter grid search with stratified cross-validation
//!
//! Every candidate is scored on the same stratified folds; the candidate
//! with the highest mean validation score wins (earliest on ties) and is
//! refitted on all rows. Candidates are evaluated in parallel, but scores
//! are reported in candidate order.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::tree::{ClassWeight, Criterion, TreeParams};
use super::{Classifier, Learner};
use crate::dataset::stratified_folds;
use crate::error::{Result, TriageError};
use crate::features::Matrix;
use crate::testing::metrics::BinaryConfusion;

/// Objective maximised by the search (attack is the positive class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    Recall,
    Precision,
    Accuracy,
    F1,
}

impl Scoring {
    /// Score of a validation fold; an undefined metric scores zero
    pub fn score(&self, confusion: &BinaryConfusion) -> f64 {
        let value = match self {
            Scoring::Recall => confusion.recall(),
            Scoring::Precision => confusion.precision(),
            Scoring::Accuracy => confusion.accuracy(),
            Scoring::F1 => confusion.f1(),
        };
        value.unwrap_or_else(|e| {
            debug!(scoring = %self, error = %e, "fold score undefined, counting as 0");
            0.0
        })
    }
}

impl fmt::Display for Scoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scoring::Recall => write!(f, "recall"),
            Scoring::Precision => write!(f, "precision"),
            Scoring::Accuracy => write!(f, "accuracy"),
            Scoring::F1 => write!(f, "f1"),
        }
    }
}

/// Decision-tree hyperparameter grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamGrid {
    pub criterion: Vec<Criterion>,
    pub max_depth: Vec<Option<usize>>,
    pub min_samples_split: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
    pub class_weight: Vec<ClassWeight>,
    pub seed: u64,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            criterion: vec![Criterion::Gini, Criterion::Entropy],
            max_depth: vec![Some(2), Some(4)],
            min_samples_split: vec![2, 4],
            min_samples_leaf: vec![1, 2],
            class_weight: vec![ClassWeight::Uniform],
            seed: 11,
        }
    }
}

impl ParamGrid {
    /// Cartesian product of the grid; the last parameter varies fastest
    pub fn candidates(&self) -> Vec<TreeParams> {
        let mut out = Vec::new();
        for &class_weight in &self.class_weight {
            for &criterion in &self.criterion {
                for &max_depth in &self.max_depth {
                    for &min_samples_leaf in &self.min_samples_leaf {
                        for &min_samples_split in &self.min_samples_split {
                            out.push(TreeParams {
                                criterion,
                                max_depth,
                                min_samples_split,
                                min_samples_leaf,
                                class_weight,
                                seed: self.seed,
                                ..Default::default()
                            });
                        }
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.class_weight.len()
            * self.criterion.len()
            * self.max_depth.len()
            * self.min_samples_leaf.len()
            * self.min_samples_split.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cross-validated score of one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    /// Candidate parameters as displayed
    pub params: String,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
}

impl CandidateScore {
    fn new(params: String, fold_scores: Vec<f64>) -> Self {
        let n = fold_scores.len().max(1) as f64;
        let mean = fold_scores.iter().sum::<f64>() / n;
        let var = fold_scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            params,
            fold_scores,
            mean_score: mean,
            std_score: var.sqrt(),
        }
    }
}

/// Result of a grid search
pub struct SearchOutcome<L: Learner> {
    pub scoring: Scoring,
    pub folds: usize,
    /// Index of the winner in the candidate list
    pub best_index: usize,
    pub best_params: L,
    pub best_score: f64,
    /// Every candidate, in candidate order
    pub scores: Vec<CandidateScore>,
    /// Winner refitted on all rows
    pub model: L::Model,
}

/// Grid search over binary (benign = 0, attack = 1) targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSearch {
    pub folds: usize,
    pub scoring: Scoring,
}

impl GridSearch {
    pub fn new(folds: usize, scoring: Scoring) -> Self {
        Self { folds, scoring }
    }

    pub fn run<L>(&self, candidates: &[L], x: &Matrix, y: &[usize]) -> Result<SearchOutcome<L>>
    where
        L: Learner + Clone + fmt::Display,
    {
        if candidates.is_empty() {
            return Err(TriageError::invalid("grid search needs at least one candidate"));
        }
        if x.n_rows() != y.len() {
            return Err(TriageError::invalid(format!(
                "{} rows but {} targets",
                x.n_rows(),
                y.len()
            )));
        }
        if y.iter().any(|&c| c > 1) {
            return Err(TriageError::invalid("grid search expects binary targets"));
        }

        let folds = stratified_folds(y, self.folds)?;
        let fold_data: Vec<(Matrix, Vec<usize>, Matrix, Vec<usize>)> = folds
            .iter()
            .map(|fold| {
                (
                    x.select_rows(&fold.train),
                    fold.train.iter().map(|&i| y[i]).collect(),
                    x.select_rows(&fold.validation),
                    fold.validation.iter().map(|&i| y[i]).collect(),
                )
            })
            .collect();

        let scores = candidates
            .par_iter()
            .map(|candidate| {
                let fold_scores = fold_data
                    .iter()
                    .map(|(x_train, y_train, x_val, y_val)| {
                        let model = candidate.fit(x_train, y_train, 2)?;
                        let predicted = model.predict(x_val)?;
                        Ok(self
                            .scoring
                            .score(&BinaryConfusion::from_indices(y_val, &predicted)))
                    })
                    .collect::<Result<Vec<f64>>>()?;
                Ok(CandidateScore::new(candidate.to_string(), fold_scores))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut best_index = 0;
        for (i, s) in scores.iter().enumerate() {
            if s.mean_score > scores[best_index].mean_score {
                best_index = i;
            }
        }
        let best_params = candidates[best_index].clone();
        let best_score = scores[best_index].mean_score;

        info!(
            candidates = candidates.len(),
            folds = self.folds,
            scoring = %self.scoring,
            best = %best_params,
            best_score,
            "grid search finished"
        );

        let model = best_params.fit(x, y, 2)?;
        Ok(SearchOutcome {
            scoring: self.scoring,
            folds: self.folds,
            best_index,
            best_params,
            best_score,
            scores,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One feature; value 1 holds both benign rows and attacks
    fn overlapping() -> (Matrix, Vec<usize>) {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for _ in 0..10 {
            for (value, class, count) in [(0.0, 0, 4), (1.0, 0, 3), (1.0, 1, 2), (2.0, 1, 2)] {
                for _ in 0..count {
                    rows.push(vec![value]);
                    y.push(class);
                }
            }
        }
        (Matrix::from_rows(&rows).unwrap(), y)
    }

    fn weighting_candidates() -> Vec<TreeParams> {
        [ClassWeight::Uniform, ClassWeight::Balanced]
            .into_iter()
            .map(|class_weight| TreeParams {
                max_depth: Some(1),
                class_weight,
                ..Default::default()
            })
            .collect()
    }

    fn recall_on(model: &impl Classifier, x: &Matrix, y: &[usize]) -> f64 {
        let predicted = model.predict(x).unwrap();
        BinaryConfusion::from_indices(y, &predicted).recall().unwrap()
    }

    #[test]
    fn test_recall_tuned_beats_accuracy_tuned_recall() {
        let (x, y) = overlapping();
        let candidates = weighting_candidates();

        let by_recall = GridSearch::new(5, Scoring::Recall).run(&candidates, &x, &y).unwrap();
        let by_accuracy = GridSearch::new(5, Scoring::Accuracy).run(&candidates, &x, &y).unwrap();

        assert_eq!(by_recall.best_params.class_weight, ClassWeight::Balanced);
        assert_eq!(by_accuracy.best_params.class_weight, ClassWeight::Uniform);

        let recall_tuned = recall_on(&by_recall.model, &x, &y);
        let accuracy_tuned = recall_on(&by_accuracy.model, &x, &y);
        assert!(recall_tuned >= accuracy_tuned);
        assert!((recall_tuned - 1.0).abs() < 1e-12);
        assert!((accuracy_tuned - 0.5).abs() < 1e-12);

        // Every fold mirrors the full set, so CV recall equals held-out recall
        assert!((by_recall.best_score - recall_tuned).abs() < 1e-12);
    }

    #[test]
    fn test_every_candidate_scored_in_order() {
        let (x, y) = overlapping();
        let candidates = weighting_candidates();
        let outcome = GridSearch::new(5, Scoring::Accuracy).run(&candidates, &x, &y).unwrap();

        assert_eq!(outcome.scores.len(), 2);
        assert_eq!(outcome.scores[0].params, candidates[0].to_string());
        assert!(outcome.scores.iter().all(|s| s.fold_scores.len() == 5));
        assert!((outcome.scores[0].mean_score - 18.0 / 22.0).abs() < 1e-12);
        assert!(outcome.scores[0].std_score < 1e-12);
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let (x, y) = overlapping();
        let candidates = vec![
            TreeParams { max_depth: Some(1), min_samples_leaf: 1, ..Default::default() },
            TreeParams { max_depth: Some(1), min_samples_leaf: 2, ..Default::default() },
        ];
        let outcome = GridSearch::new(5, Scoring::Recall).run(&candidates, &x, &y).unwrap();
        assert_eq!(outcome.best_index, 0);
    }

    #[test]
    fn test_default_grid_matches_sixteen_candidates() {
        let grid = ParamGrid::default();
        let candidates = grid.candidates();
        assert_eq!(candidates.len(), 16);
        assert_eq!(grid.len(), 16);
        assert_eq!(candidates[0].criterion, Criterion::Gini);
        assert_eq!(candidates[0].max_depth, Some(2));
        assert_eq!(candidates[1].min_samples_split, 4);
        assert_eq!(candidates[15].criterion, Criterion::Entropy);
    }

    #[test]
    fn test_rejects_bad_input() {
        let (x, y) = overlapping();
        let empty: Vec<TreeParams> = Vec::new();
        assert!(GridSearch::new(5, Scoring::Recall).run(&empty, &x, &y).is_err());

        let multi: Vec<usize> = (0..y.len()).map(|i| i % 3).collect();
        assert!(GridSearch::new(5, Scoring::Recall)
            .run(&weighting_candidates(), &x, &multi)
            .is_err());
    }
}
