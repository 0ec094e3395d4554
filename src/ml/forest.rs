//! Random forest classifier
//!
//! Bagged CART trees, each grown on a bootstrap sample with a random
//! feature subset per split. Predictions average the trees' class
//! probabilities. Tree `i` is seeded with `seed + i`, so the fitted forest
//! does not depend on how rayon schedules the work.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{DecisionTree, MaxFeatures, TreeParams};
use super::{check_training_input, Classifier, Learner};
use crate::error::{Result, TriageError};
use crate::features::Matrix;

/// Random forest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    /// Number of trees
    pub n_estimators: usize,
    /// Draw a bootstrap sample per tree
    pub bootstrap: bool,
    /// Per-tree settings; `seed` is replaced per tree
    pub tree: TreeParams,
    /// Random seed
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            bootstrap: true,
            tree: TreeParams {
                max_features: MaxFeatures::Sqrt,
                ..Default::default()
            },
            seed: 11,
        }
    }
}

/// Fitted random forest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

impl Learner for ForestParams {
    type Model = RandomForest;

    fn fit(&self, x: &Matrix, y: &[usize], n_classes: usize) -> Result<RandomForest> {
        check_training_input(x, y, n_classes)?;
        if self.n_estimators == 0 {
            return Err(TriageError::invalid("a forest needs at least one tree"));
        }

        let n = x.n_rows();
        let trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|i| {
                let seed = self.seed.wrapping_add(i as u64);
                let rows = if self.bootstrap {
                    let mut rng = StdRng::seed_from_u64(seed);
                    (0..n).map(|_| rng.random_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                let params = TreeParams {
                    seed: seed.wrapping_mul(0x9E37_79B9_7F4A_7C15),
                    ..self.tree.clone()
                };
                params.fit_rows(x, y, n_classes, rows)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut importances = vec![0.0; x.n_cols()];
        for tree in &trees {
            if let Some(imp) = tree.feature_importances() {
                for (acc, v) in importances.iter_mut().zip(imp) {
                    *acc += v;
                }
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in importances.iter_mut() {
                *v /= total;
            }
        }

        debug!(
            trees = trees.len(),
            mean_depth = trees.iter().map(|t| t.depth()).sum::<usize>() as f64 / trees.len() as f64,
            "random forest fitted"
        );

        Ok(RandomForest {
            trees,
            n_features: x.n_cols(),
            n_classes,
            importances,
        })
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &str {
        "random_forest"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba_row(&self, row: &[f64]) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (acc, p) in proba.iter_mut().zip(tree.predict_proba_row(row)) {
                *acc += p;
            }
        }
        let n = self.trees.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> (Matrix, Vec<usize>) {
        let rows: Vec<Vec<f64>> = (0..200)
            .map(|i| {
                let noise = ((i * 37) % 11) as f64;
                let sttl = if i % 3 == 0 { 254.0 } else { 31.0 };
                vec![noise, sttl, (i % 7) as f64]
            })
            .collect();
        let y = (0..200).map(|i| usize::from(i % 3 == 0)).collect();
        (Matrix::from_rows(&rows).unwrap(), y)
    }

    #[test]
    fn test_forest_learns_separable_data() {
        let (x, y) = dataset();
        let forest = ForestParams { n_estimators: 25, ..Default::default() }
            .fit(&x, &y, 2)
            .unwrap();

        assert_eq!(forest.trees().len(), 25);
        let preds = forest.predict(&x).unwrap();
        let correct = preds.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct as f64 / y.len() as f64 >= 0.95);

        let importances = forest.feature_importances().unwrap();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[1] > importances[0]);
        assert!(importances[1] > importances[2]);
    }

    #[test]
    fn test_forest_is_deterministic() {
        let (x, y) = dataset();
        let params = ForestParams { n_estimators: 8, seed: 3, ..Default::default() };
        let a = params.fit(&x, &y, 2).unwrap();
        let b = params.fit(&x, &y, 2).unwrap();
        assert_eq!(a.trees(), b.trees());
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y) = dataset();
        let forest = ForestParams { n_estimators: 5, ..Default::default() }
            .fit(&x, &y, 2)
            .unwrap();
        let p = forest.predict_proba_row(x.row(0));
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_trees_rejected() {
        let (x, y) = dataset();
        let err = ForestParams { n_estimators: 0, ..Default::default() }.fit(&x, &y, 2);
        assert!(matches!(err, Err(TriageError::InvalidInput(_))));
    }
}
