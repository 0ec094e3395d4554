//! Dense numeric storage for encoded flows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dataset::{AttackCategory, Label};
use crate::error::{Result, SchemaError, TriageError};

/// Numeric encoding of a single record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Row-major matrix of feature values
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Matrix {
    data: Vec<f64>,
    n_rows: usize,
    n_cols: usize,
}

impl Matrix {
    /// Empty matrix with a fixed width
    pub fn with_cols(n_cols: usize) -> Self {
        Self {
            data: Vec::new(),
            n_rows: 0,
            n_cols,
        }
    }

    /// Build from equal-length rows
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut matrix = Self::with_cols(n_cols);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    pub fn push_row(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.n_cols {
            return Err(SchemaError::DimensionMismatch {
                expected: self.n_cols,
                got: row.len(),
            }
            .into());
        }
        self.data.extend_from_slice(row);
        self.n_rows += 1;
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols + col]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.n_rows).map(move |i| self.row(i))
    }

    /// Copy of one column
    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.n_rows).map(|r| self.get(r, col)).collect()
    }

    /// New matrix holding the given rows in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.n_cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            data,
            n_rows: indices.len(),
            n_cols: self.n_cols,
        }
    }

    /// New matrix holding the given columns in the given order
    pub fn select_cols(&self, cols: &[usize]) -> Self {
        let mut data = Vec::with_capacity(self.n_rows * cols.len());
        for r in 0..self.n_rows {
            let row = self.row(r);
            data.extend(cols.iter().map(|&c| row[c]));
        }
        Self {
            data,
            n_rows: self.n_rows,
            n_cols: cols.len(),
        }
    }
}

/// Encoded rows together with their targets
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledBatch {
    pub feature_names: Arc<[String]>,
    pub features: Matrix,
    pub labels: Vec<Label>,
    pub categories: Vec<AttackCategory>,
}

impl LabeledBatch {
    pub fn new(
        feature_names: Arc<[String]>,
        features: Matrix,
        labels: Vec<Label>,
        categories: Vec<AttackCategory>,
    ) -> Result<Self> {
        if features.n_cols() != feature_names.len() {
            return Err(SchemaError::DimensionMismatch {
                expected: feature_names.len(),
                got: features.n_cols(),
            }
            .into());
        }
        if labels.len() != features.n_rows() || categories.len() != features.n_rows() {
            return Err(TriageError::invalid(format!(
                "{} rows but {} labels and {} categories",
                features.n_rows(),
                labels.len(),
                categories.len()
            )));
        }
        Ok(Self {
            feature_names,
            features,
            labels,
            categories,
        })
    }

    pub fn len(&self) -> usize {
        self.features.n_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.features.n_cols()
    }

    /// Binary targets as class indices
    pub fn label_indices(&self) -> Vec<usize> {
        self.labels.iter().map(|l| l.index()).collect()
    }

    /// Attack families as class indices
    pub fn category_indices(&self) -> Vec<usize> {
        self.categories.iter().map(|c| c.index()).collect()
    }

    pub fn attack_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_attack()).count()
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    /// Subset of rows, same columns
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            feature_names: Arc::clone(&self.feature_names),
            features: self.features.select_rows(indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            categories: indices.iter().map(|&i| self.categories[i]).collect(),
        }
    }

    /// Same rows restricted to the named features, in the given order
    pub fn select_features(&self, names: &[String]) -> Result<Self> {
        let cols = names
            .iter()
            .map(|n| {
                self.feature_index(n)
                    .ok_or_else(|| SchemaError::UnknownFeature(n.clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            feature_names: names.to_vec().into(),
            features: self.features.select_cols(&cols),
            labels: self.labels.clone(),
            categories: self.categories.clone(),
        })
    }
}
