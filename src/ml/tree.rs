//! CART decision tree classifier
//!
//! Greedy binary splits on a single feature at a time. Candidate
//! thresholds are midpoints between consecutive distinct values and a row
//! goes left when `value <= threshold`. The fitted node table is public so
//! the triage rule extractor can walk decision paths.

use std::fmt::{self, Write};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::{argmax, check_training_input, Classifier, Learner};
use crate::error::{Result, TriageError};
use crate::features::Matrix;

/// Split quality measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Gini,
    Entropy,
}

impl Criterion {
    /// Impurity of weighted class totals
    fn impurity(&self, counts: &[f64], total: f64) -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        match self {
            Criterion::Gini => {
                1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>()
            }
            Criterion::Entropy => counts
                .iter()
                .filter(|&&c| c > 0.0)
                .map(|c| {
                    let p = c / total;
                    -p * p.log2()
                })
                .sum(),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Gini => write!(f, "gini"),
            Criterion::Entropy => write!(f, "entropy"),
        }
    }
}

/// Number of features examined at each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    Sqrt,
    Count(usize),
}

impl MaxFeatures {
    fn resolve(&self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Count(k) => *k,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Per-class sample weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    /// Every row counts once
    Uniform,
    /// Rows weighted by `n / (n_classes * class_count)`
    Balanced,
}

/// Hyperparameters of a single tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    pub criterion: Criterion,
    /// `None` grows until leaves are pure or too small to split
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub class_weight: ClassWeight,
    pub seed: u64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            class_weight: ClassWeight::Uniform,
            seed: 0,
        }
    }
}

impl fmt::Display for TreeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "criterion={}", self.criterion)?;
        match self.max_depth {
            Some(d) => write!(f, " max_depth={}", d)?,
            None => write!(f, " max_depth=none")?,
        }
        write!(
            f,
            " min_samples_split={} min_samples_leaf={}",
            self.min_samples_split, self.min_samples_leaf
        )?;
        if self.class_weight == ClassWeight::Balanced {
            write!(f, " class_weight=balanced")?;
        }
        Ok(())
    }
}

impl TreeParams {
    fn validate(&self) -> Result<()> {
        if self.min_samples_split < 2 {
            return Err(TriageError::invalid("min_samples_split must be at least 2"));
        }
        if self.min_samples_leaf < 1 {
            return Err(TriageError::invalid("min_samples_leaf must be at least 1"));
        }
        if self.max_depth == Some(0) {
            return Err(TriageError::invalid("max_depth must be at least 1"));
        }
        Ok(())
    }

    /// Fit on a multiset of row indices (duplicates allowed, as in bootstrap samples)
    pub fn fit_rows(
        &self,
        x: &Matrix,
        y: &[usize],
        n_classes: usize,
        rows: Vec<usize>,
    ) -> Result<DecisionTree> {
        check_training_input(x, y, n_classes)?;
        self.validate()?;
        if rows.is_empty() {
            return Err(TriageError::insufficient("cannot fit a tree on zero rows"));
        }

        let class_weights = match self.class_weight {
            ClassWeight::Uniform => vec![1.0; n_classes],
            ClassWeight::Balanced => {
                let mut counts = vec![0usize; n_classes];
                for &r in &rows {
                    counts[y[r]] += 1;
                }
                counts
                    .iter()
                    .map(|&c| {
                        if c == 0 {
                            0.0
                        } else {
                            rows.len() as f64 / (n_classes as f64 * c as f64)
                        }
                    })
                    .collect()
            }
        };

        let mut builder = TreeBuilder {
            params: self,
            x,
            y,
            n_classes,
            class_weights,
            max_features: self.max_features.resolve(x.n_cols()),
            rng: StdRng::seed_from_u64(self.seed),
            nodes: Vec::new(),
            importances: vec![0.0; x.n_cols()],
        };
        builder.build(rows, 0);

        let total: f64 = builder.importances.iter().sum();
        let importances = if total > 0.0 {
            builder.importances.iter().map(|v| v / total).collect()
        } else {
            builder.importances
        };

        Ok(DecisionTree {
            params: self.clone(),
            nodes: builder.nodes,
            n_features: x.n_cols(),
            n_classes,
            importances,
        })
    }
}

impl Learner for TreeParams {
    type Model = DecisionTree;

    fn fit(&self, x: &Matrix, y: &[usize], n_classes: usize) -> Result<DecisionTree> {
        self.fit_rows(x, y, n_classes, (0..x.n_rows()).collect())
    }
}

/// Split of an internal node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSplit {
    pub feature: usize,
    pub threshold: f64,
    /// Node index for `value <= threshold`
    pub left: usize,
    /// Node index for `value > threshold`
    pub right: usize,
}

/// A node of the fitted tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Training rows that reached the node
    pub samples: usize,
    /// Weighted class totals of those rows
    pub class_weights: Vec<f64>,
    pub impurity: f64,
    pub split: Option<NodeSplit>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }

    /// Majority class (lowest index wins ties)
    pub fn predicted_class(&self) -> usize {
        argmax(&self.class_weights)
    }

    /// Weighted share of one class at this node
    pub fn class_fraction(&self, class: usize) -> f64 {
        let total: f64 = self.class_weights.iter().sum();
        if total <= 0.0 {
            0.0
        } else {
            self.class_weights.get(class).copied().unwrap_or(0.0) / total
        }
    }
}

/// Fitted CART tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    params: TreeParams,
    nodes: Vec<TreeNode>,
    n_features: usize,
    n_classes: usize,
    importances: Vec<f64>,
}

impl DecisionTree {
    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    /// Node table; index 0 is the root
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Longest root-to-leaf path, in splits
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match &nodes[idx].split {
                Some(s) => 1 + walk(nodes, s.left).max(walk(nodes, s.right)),
                None => 0,
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Index of the leaf a row lands in
    pub fn leaf_for(&self, row: &[f64]) -> usize {
        let mut idx = 0;
        while let Some(split) = &self.nodes[idx].split {
            idx = if row[split.feature] <= split.threshold {
                split.left
            } else {
                split.right
            };
        }
        idx
    }

    /// Text rendering of the splits, one line per node
    pub fn export_text(&self, feature_names: &[String]) -> String {
        let mut out = String::new();
        if !self.nodes.is_empty() {
            self.export_node(0, 0, feature_names, &mut out);
        }
        out
    }

    fn export_node(&self, idx: usize, depth: usize, names: &[String], out: &mut String) {
        let indent = "|   ".repeat(depth);
        let node = &self.nodes[idx];
        match &node.split {
            Some(split) => {
                let name = names
                    .get(split.feature)
                    .cloned()
                    .unwrap_or_else(|| format!("feature_{}", split.feature));
                let _ = writeln!(out, "{}|--- {} <= {:.2}", indent, name, split.threshold);
                self.export_node(split.left, depth + 1, names, out);
                let _ = writeln!(out, "{}|--- {} >  {:.2}", indent, name, split.threshold);
                self.export_node(split.right, depth + 1, names, out);
            }
            None => {
                let _ = writeln!(out, "{}|--- class: {}", indent, node.predicted_class());
            }
        }
    }
}

impl Classifier for DecisionTree {
    fn name(&self) -> &str {
        "decision_tree"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba_row(&self, row: &[f64]) -> Vec<f64> {
        let leaf = &self.nodes[self.leaf_for(row)];
        let total: f64 = leaf.class_weights.iter().sum();
        if total <= 0.0 {
            return vec![1.0 / self.n_classes as f64; self.n_classes];
        }
        leaf.class_weights.iter().map(|w| w / total).collect()
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}

/// Best split found for a node
struct Candidate {
    feature: usize,
    threshold: f64,
    children_impurity: f64,
    left_impurity: f64,
    right_impurity: f64,
    left_weight: f64,
    right_weight: f64,
}

struct TreeBuilder<'a> {
    params: &'a TreeParams,
    x: &'a Matrix,
    y: &'a [usize],
    n_classes: usize,
    class_weights: Vec<f64>,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<TreeNode>,
    importances: Vec<f64>,
}

impl TreeBuilder<'_> {
    fn build(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let mut counts = vec![0.0; self.n_classes];
        for &r in &rows {
            counts[self.y[r]] += self.class_weights[self.y[r]];
        }
        let total: f64 = counts.iter().sum();
        let impurity = self.params.criterion.impurity(&counts, total);

        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            samples: rows.len(),
            class_weights: counts,
            impurity,
            split: None,
        });

        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        if depth_reached
            || rows.len() < self.params.min_samples_split
            || rows.len() < 2 * self.params.min_samples_leaf
            || impurity <= 1e-12
        {
            return idx;
        }

        let Some(best) = self.best_split(&rows) else {
            return idx;
        };
        let decrease = total * impurity - best.children_impurity;
        if decrease <= 1e-12 {
            return idx;
        }

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x.get(r, best.feature) <= best.threshold);
        if left_rows.is_empty() || right_rows.is_empty() {
            return idx;
        }

        self.importances[best.feature] += total * impurity
            - best.left_weight * best.left_impurity
            - best.right_weight * best.right_impurity;

        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[idx].split = Some(NodeSplit {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        });
        idx
    }

    /// Feature visiting order; shuffled when only a subset is examined
    fn feature_order(&mut self) -> Vec<usize> {
        let mut features: Vec<usize> = (0..self.x.n_cols()).collect();
        if self.max_features < features.len() {
            features.shuffle(&mut self.rng);
        }
        features
    }

    fn best_split(&mut self, rows: &[usize]) -> Option<Candidate> {
        let min_leaf = self.params.min_samples_leaf;
        let criterion = self.params.criterion;
        let mut best: Option<Candidate> = None;

        // Keep looking past `max_features` until at least one valid split exists
        for (visited, feature) in self.feature_order().into_iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            let mut sorted: Vec<(f64, usize)> = rows
                .iter()
                .map(|&r| (self.x.get(r, feature), self.y[r]))
                .collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut total_counts = vec![0.0; self.n_classes];
            for &(_, class) in &sorted {
                total_counts[class] += self.class_weights[class];
            }
            let total_weight: f64 = total_counts.iter().sum();

            let mut left_counts = vec![0.0; self.n_classes];
            let mut right_counts = total_counts;
            let mut left_weight = 0.0;

            for i in 0..sorted.len() - 1 {
                let (value, class) = sorted[i];
                let w = self.class_weights[class];
                left_counts[class] += w;
                right_counts[class] -= w;
                left_weight += w;

                let next = sorted[i + 1].0;
                if value >= next || !value.is_finite() || !next.is_finite() {
                    continue;
                }
                let n_left = i + 1;
                if n_left < min_leaf || sorted.len() - n_left < min_leaf {
                    continue;
                }

                let right_weight = total_weight - left_weight;
                let left_impurity = criterion.impurity(&left_counts, left_weight);
                let right_impurity = criterion.impurity(&right_counts, right_weight);
                let children = left_weight * left_impurity + right_weight * right_impurity;

                if best.as_ref().map_or(true, |b| children < b.children_impurity - 1e-12) {
                    let mut threshold = (value + next) / 2.0;
                    if threshold >= next {
                        threshold = value;
                    }
                    best = Some(Candidate {
                        feature,
                        threshold,
                        children_impurity: children,
                        left_impurity,
                        right_impurity,
                        left_weight,
                        right_weight,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xor_like() -> (Matrix, Vec<usize>) {
        // class 1 iff sttl > 61
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![if i % 2 == 0 { 31.0 } else { 254.0 }, (i % 5) as f64])
            .collect();
        let y = (0..40).map(|i| i % 2).collect();
        (Matrix::from_rows(&rows).unwrap(), y)
    }

    #[test]
    fn test_single_split_separates_classes() {
        let (x, y) = xor_like();
        let tree = TreeParams::default().fit(&x, &y, 2).unwrap();

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.n_leaves(), 2);
        let root = tree.nodes()[0].split.as_ref().unwrap();
        assert_eq!(root.feature, 0);
        assert!((root.threshold - 142.5).abs() < 1e-9);

        assert_eq!(tree.predict_row(&[31.0, 0.0]), 0);
        assert_eq!(tree.predict_row(&[254.0, 0.0]), 1);

        let importances = tree.feature_importances().unwrap();
        assert!((importances[0] - 1.0).abs() < 1e-9);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn test_non_finite_values_never_become_thresholds() {
        let x = Matrix::from_rows(&[vec![1.0], vec![2.0], vec![f64::NAN], vec![f64::NAN]]).unwrap();
        let y = vec![0, 0, 1, 1];
        let tree = TreeParams::default().fit(&x, &y, 2).unwrap();

        assert_eq!(tree.n_leaves(), 2);
        for node in tree.nodes() {
            if let Some(split) = &node.split {
                assert!(split.threshold.is_finite());
            }
        }
        assert_eq!(tree.predict_row(&[1.0]), 0);

        let x = Matrix::from_rows(&[vec![0.0], vec![f64::INFINITY], vec![f64::INFINITY]]).unwrap();
        let tree = TreeParams::default().fit(&x, &[0, 1, 1], 2).unwrap();
        assert_eq!(tree.n_leaves(), 1);
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let rows: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let y: Vec<usize> = (0..64).map(|i| (i / 4) % 2).collect();
        let x = Matrix::from_rows(&rows).unwrap();

        let shallow = TreeParams { max_depth: Some(2), ..Default::default() }
            .fit(&x, &y, 2)
            .unwrap();
        assert!(shallow.depth() <= 2);

        let full = TreeParams::default().fit(&x, &y, 2).unwrap();
        let preds = full.predict(&x).unwrap();
        assert_eq!(preds, y);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let mut y = vec![0usize; 20];
        y[19] = 1;
        let x = Matrix::from_rows(&rows).unwrap();

        let tree = TreeParams { min_samples_leaf: 2, ..Default::default() }
            .fit(&x, &y, 2)
            .unwrap();
        assert!(tree.nodes().iter().all(|n| n.samples >= 2));
    }

    #[test]
    fn test_balanced_weights_flip_minority_leaf() {
        // value 1 holds 3 benign and 2 attacks
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for _ in 0..4 {
            rows.push(vec![0.0]);
            y.push(0);
        }
        for _ in 0..3 {
            rows.push(vec![1.0]);
            y.push(0);
        }
        for _ in 0..2 {
            rows.push(vec![1.0]);
            y.push(1);
        }
        for _ in 0..2 {
            rows.push(vec![2.0]);
            y.push(1);
        }
        let x = Matrix::from_rows(&rows).unwrap();

        let uniform = TreeParams { max_depth: Some(1), ..Default::default() }
            .fit(&x, &y, 2)
            .unwrap();
        assert_eq!(uniform.predict_row(&[1.0]), 0);

        let balanced = TreeParams {
            max_depth: Some(1),
            class_weight: ClassWeight::Balanced,
            ..Default::default()
        }
        .fit(&x, &y, 2)
        .unwrap();
        assert_eq!(balanced.predict_row(&[1.0]), 1);
        assert_eq!(balanced.predict_row(&[0.0]), 0);
    }

    #[test]
    fn test_entropy_criterion() {
        let (x, y) = xor_like();
        let tree = TreeParams { criterion: Criterion::Entropy, ..Default::default() }
            .fit(&x, &y, 2)
            .unwrap();
        assert_eq!(tree.predict(&x).unwrap(), y);
        assert!((tree.nodes()[0].impurity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_export_text() {
        let (x, y) = xor_like();
        let tree = TreeParams::default().fit(&x, &y, 2).unwrap();
        let text = tree.export_text(&["sttl".to_string(), "sinpkt".to_string()]);
        assert!(text.contains("|--- sttl <= 142.50"));
        assert!(text.contains("|   |--- class: 1"));
    }

    #[test]
    fn test_rejects_bad_params() {
        let (x, y) = xor_like();
        let err = TreeParams { min_samples_split: 1, ..Default::default() }.fit(&x, &y, 2);
        assert!(matches!(err, Err(TriageError::InvalidInput(_))));
    }
}
