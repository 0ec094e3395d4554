//! Tree-based classifiers
//!
//! Native implementations of the model families the triage pipeline
//! consumes as black boxes.
//!
//! # Models
//! - `tree` - CART decision tree (rule extraction, forest members)
//! - `forest` - bagged random forest
//! - `boost` - histogram gradient boosting with depth-wise or leaf-wise growth
//! - `search` - grid search with stratified cross-validation
//!
//! # Example
//! ```ignore
//! use flowtriage::ml::{Classifier, Learner, TreeParams};
//!
//! let tree = TreeParams { max_depth: Some(4), ..Default::default() }.fit(&x, &y, 2)?;
//! let predicted = tree.predict(&x_test)?;
//! ```

pub mod tree;
pub mod forest;
pub mod boost;
pub mod search;

use rayon::prelude::*;

use crate::error::{Result, SchemaError, TriageError};
use crate::features::Matrix;

pub use tree::{ClassWeight, Criterion, DecisionTree, MaxFeatures, NodeSplit, TreeNode, TreeParams};
pub use forest::{ForestParams, RandomForest};
pub use boost::{BoostParams, GradientBoosting, Growth};
pub use search::{CandidateScore, GridSearch, ParamGrid, Scoring, SearchOutcome};

/// A fitted model that maps feature rows to class indices
pub trait Classifier: Send + Sync {
    /// Model name
    fn name(&self) -> &str;

    /// Width of the rows the model was trained on
    fn n_features(&self) -> usize;

    fn n_classes(&self) -> usize;

    /// Class probabilities for one row
    fn predict_proba_row(&self, row: &[f64]) -> Vec<f64>;

    /// Most likely class for one row
    fn predict_row(&self, row: &[f64]) -> usize {
        argmax(&self.predict_proba_row(row))
    }

    /// Predict every row of a matrix
    fn predict(&self, rows: &Matrix) -> Result<Vec<usize>> {
        if rows.n_cols() != self.n_features() {
            return Err(SchemaError::DimensionMismatch {
                expected: self.n_features(),
                got: rows.n_cols(),
            }
            .into());
        }
        Ok((0..rows.n_rows())
            .into_par_iter()
            .map(|i| self.predict_row(rows.row(i)))
            .collect())
    }

    /// Normalised per-feature importance, if the model tracks it
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }
}

/// Hyperparameters that can be trained into a `Classifier`
pub trait Learner: Send + Sync {
    type Model: Classifier;

    /// Train on every row of `x`; `y` holds class indices below `n_classes`
    fn fit(&self, x: &Matrix, y: &[usize], n_classes: usize) -> Result<Self::Model>;
}

/// Index of the largest value (first one on ties)
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

pub(crate) fn check_training_input(x: &Matrix, y: &[usize], n_classes: usize) -> Result<()> {
    if x.is_empty() {
        return Err(TriageError::insufficient("training matrix has no rows"));
    }
    if x.n_rows() != y.len() {
        return Err(TriageError::invalid(format!(
            "{} training rows but {} targets",
            x.n_rows(),
            y.len()
        )));
    }
    if n_classes < 2 {
        return Err(TriageError::invalid("need at least two classes"));
    }
    if let Some(bad) = y.iter().find(|&&c| c >= n_classes) {
        return Err(TriageError::invalid(format!(
            "target {} out of range for {} classes",
            bad, n_classes
        )));
    }
    Ok(())
}
