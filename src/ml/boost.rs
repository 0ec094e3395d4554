//! Gradient boosting classifier
//!
//! Binary logistic boosting over histogram-binned features. Each round fits
//! a regression tree to the loss gradients with second-order leaf values
//! `-G / (H + lambda)`, and split gain
//! `0.5 * (GL²/(HL+λ) + GR²/(HR+λ) - G²/(H+λ)) - gamma`.
//!
//! # Growth
//! - `DepthWise` expands every splittable leaf down to `max_depth`
//!   (the XGBoost default)
//! - `LeafWise` repeatedly splits the leaf with the largest gain until the
//!   tree has `num_leaves` leaves (the LightGBM default)
//!
//! # Usage
//! ```ignore
//! use flowtriage::ml::{BoostParams, Learner};
//!
//! let model = BoostParams::lightgbm_like().fit(&x, &y, 2)?;
//! let p_attack = model.predict_proba_row(x.row(0))[1];
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_training_input, Classifier, Learner};
use crate::error::{Result, TriageError};
use crate::features::Matrix;

/// Tree growth strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Growth {
    /// Level by level down to a fixed depth
    DepthWise { max_depth: usize },
    /// Best-first until the leaf budget is spent
    LeafWise {
        num_leaves: usize,
        max_depth: Option<usize>,
    },
}

impl Growth {
    fn max_depth(&self) -> Option<usize> {
        match *self {
            Growth::DepthWise { max_depth } => Some(max_depth),
            Growth::LeafWise { max_depth, .. } => max_depth,
        }
    }

    fn max_leaves(&self) -> Option<usize> {
        match *self {
            Growth::DepthWise { .. } => None,
            Growth::LeafWise { num_leaves, .. } => Some(num_leaves),
        }
    }
}

/// Gradient boosting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostParams {
    /// Number of boosting rounds (trees)
    pub n_rounds: usize,
    /// Shrinkage applied to every leaf value
    pub learning_rate: f64,
    pub growth: Growth,
    /// L2 regularisation on leaf values
    pub lambda: f64,
    /// Minimum gain to make a split
    pub gamma: f64,
    /// Minimum hessian sum per child
    pub min_child_weight: f64,
    /// Minimum rows per child
    pub min_samples_leaf: usize,
    /// Histogram bins per feature (at most 255)
    pub max_bins: usize,
    /// Row fraction sampled per round
    pub subsample: f64,
    pub seed: u64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self::xgboost_like()
    }
}

impl BoostParams {
    /// Depth-wise preset matching XGBoost's defaults
    pub fn xgboost_like() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.3,
            growth: Growth::DepthWise { max_depth: 6 },
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            min_samples_leaf: 1,
            max_bins: 255,
            subsample: 1.0,
            seed: 11,
        }
    }

    /// Leaf-wise preset matching LightGBM's defaults
    pub fn lightgbm_like() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.1,
            growth: Growth::LeafWise {
                num_leaves: 31,
                max_depth: None,
            },
            lambda: 0.0,
            gamma: 0.0,
            min_child_weight: 1e-3,
            min_samples_leaf: 20,
            max_bins: 255,
            subsample: 1.0,
            seed: 11,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.n_rounds == 0 {
            return Err(TriageError::invalid("n_rounds must be at least 1"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(TriageError::invalid("learning_rate must be positive"));
        }
        if self.lambda < 0.0 || self.gamma < 0.0 || self.min_child_weight < 0.0 {
            return Err(TriageError::invalid("lambda, gamma and min_child_weight must be non-negative"));
        }
        if !(2..=255).contains(&self.max_bins) {
            return Err(TriageError::invalid("max_bins must be within 2..=255"));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(TriageError::invalid("subsample must be within (0, 1]"));
        }
        if self.min_samples_leaf == 0 {
            return Err(TriageError::invalid("min_samples_leaf must be at least 1"));
        }
        if self.growth.max_depth() == Some(0) {
            return Err(TriageError::invalid("max_depth must be at least 1"));
        }
        if self.growth.max_leaves().is_some_and(|n| n < 2) {
            return Err(TriageError::invalid("num_leaves must be at least 2"));
        }
        Ok(())
    }
}

/// Per-feature quantile bin edges
///
/// A value `v` falls in bin `b` when `edges[b-1] < v <= edges[b]`, so a
/// split after bin `b` is the raw test `v <= edges[b]`.
#[derive(Debug, Clone, PartialEq)]
struct BinMapper {
    edges: Vec<Vec<f64>>,
}

impl BinMapper {
    fn fit(x: &Matrix, max_bins: usize) -> Self {
        let edges = (0..x.n_cols())
            .into_par_iter()
            .map(|col| {
                let mut values = x.column(col);
                values.sort_by(|a, b| a.total_cmp(b));
                feature_edges(&values, max_bins)
            })
            .collect();
        Self { edges }
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }

    fn bin(&self, feature: usize, value: f64) -> u8 {
        self.edges[feature].partition_point(|e| *e < value) as u8
    }

    /// Column-major bin indices of every row
    fn transform(&self, x: &Matrix) -> Vec<Vec<u8>> {
        (0..x.n_cols())
            .into_par_iter()
            .map(|col| (0..x.n_rows()).map(|r| self.bin(col, x.get(r, col))).collect())
            .collect()
    }
}

/// Edges from sorted values: midpoints between distinct values, thinned to
/// quantiles when there are more distinct values than bins
fn feature_edges(sorted: &[f64], max_bins: usize) -> Vec<f64> {
    let mut distinct = sorted.to_vec();
    distinct.dedup();

    let mut edges = Vec::new();
    if distinct.len() <= max_bins {
        for pair in distinct.windows(2) {
            edges.push((pair[0] + pair[1]) / 2.0);
        }
        return edges;
    }

    let n = sorted.len();
    for q in 1..max_bins {
        let pos = q * n / max_bins;
        if pos == 0 || pos >= n {
            continue;
        }
        let (lo, hi) = (sorted[pos - 1], sorted[pos]);
        if lo < hi {
            let edge = (lo + hi) / 2.0;
            if edges.last().map_or(true, |last| edge > *last) {
                edges.push(edge);
            }
        }
    }
    edges
}

#[derive(Debug, Clone, Copy, Default)]
struct BinStats {
    grad: f64,
    hess: f64,
    count: usize,
}

impl BinStats {
    fn add(&mut self, other: &BinStats) {
        self.grad += other.grad;
        self.hess += other.hess;
        self.count += other.count;
    }

    fn sub(&self, other: &BinStats) -> BinStats {
        BinStats {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count - other.count,
        }
    }
}

/// Gradient statistics of one node, per feature and bin
type Histogram = Vec<Vec<BinStats>>;

/// Tree node used by the booster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum BoostNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One boosting round's regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<BoostNode>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                BoostNode::Leaf { value } => return *value,
                BoostNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    #[cfg(test)]
    fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, BoostNode::Leaf { .. }))
            .count()
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        fn walk(nodes: &[BoostNode], idx: usize) -> usize {
            match &nodes[idx] {
                BoostNode::Leaf { .. } => 0,
                BoostNode::Split { left, right, .. } => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Fitted gradient boosting model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    params: BoostParams,
    base_score: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
    importances: Vec<f64>,
}

impl GradientBoosting {
    pub fn params(&self) -> &BoostParams {
        &self.params
    }

    /// Number of fitted rounds
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Log-odds of the attack class
    pub fn raw_score(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

impl Learner for BoostParams {
    type Model = GradientBoosting;

    fn fit(&self, x: &Matrix, y: &[usize], n_classes: usize) -> Result<GradientBoosting> {
        check_training_input(x, y, n_classes)?;
        if n_classes != 2 {
            return Err(TriageError::invalid(format!(
                "gradient boosting supports binary targets only, got {} classes",
                n_classes
            )));
        }
        self.validate()?;

        let n = x.n_rows();
        let mapper = BinMapper::fit(x, self.max_bins);
        let bins = mapper.transform(x);

        let positives = y.iter().filter(|&&c| c == 1).count() as f64;
        let prior = (positives / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (prior / (1.0 - prior)).ln();

        let mut raw = vec![base_score; n];
        let mut trees = Vec::with_capacity(self.n_rounds);
        let mut importances = vec![0.0; x.n_cols()];

        for round in 0..self.n_rounds {
            let mut grad = Vec::with_capacity(n);
            let mut hess = Vec::with_capacity(n);
            for (score, &target) in raw.iter().zip(y) {
                let p = sigmoid(*score);
                grad.push(p - target as f64);
                hess.push((p * (1.0 - p)).max(1e-16));
            }

            let rows = self.sample_rows(n, round);
            let grower = TreeGrower {
                params: self,
                mapper: &mapper,
                bins: &bins,
                grad: &grad,
                hess: &hess,
            };
            let tree = grower.grow(rows, &mut importances);

            for (i, score) in raw.iter_mut().enumerate() {
                *score += tree.predict(x.row(i));
            }
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in importances.iter_mut() {
                *v /= total;
            }
        }

        debug!(
            rounds = trees.len(),
            growth = ?self.growth,
            base_score,
            "gradient boosting fitted"
        );

        Ok(GradientBoosting {
            params: self.clone(),
            base_score,
            trees,
            n_features: x.n_cols(),
            importances,
        })
    }
}

impl BoostParams {
    fn sample_rows(&self, n: usize, round: usize) -> Vec<usize> {
        if self.subsample >= 1.0 {
            return (0..n).collect();
        }
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(round as u64));
        let rows: Vec<usize> = (0..n).filter(|_| rng.random::<f64>() < self.subsample).collect();
        if rows.is_empty() {
            (0..n).collect()
        } else {
            rows
        }
    }
}

impl Classifier for GradientBoosting {
    fn name(&self) -> &str {
        "gradient_boosting"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        2
    }

    fn predict_proba_row(&self, row: &[f64]) -> Vec<f64> {
        let p = sigmoid(self.raw_score(row));
        vec![1.0 - p, p]
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

#[derive(Debug, Clone, Copy)]
struct SplitInfo {
    feature: usize,
    bin: usize,
    gain: f64,
}

/// A leaf still open for splitting
struct OpenLeaf {
    node: usize,
    depth: usize,
    rows: Vec<usize>,
    totals: BinStats,
    hist: Histogram,
    best: Option<SplitInfo>,
}

struct TreeGrower<'a> {
    params: &'a BoostParams,
    mapper: &'a BinMapper,
    bins: &'a [Vec<u8>],
    grad: &'a [f64],
    hess: &'a [f64],
}

impl TreeGrower<'_> {
    fn grow(&self, rows: Vec<usize>, importances: &mut [f64]) -> RegressionTree {
        let max_depth = self.params.growth.max_depth();
        let max_leaves = self.params.growth.max_leaves();

        let mut nodes = vec![BoostNode::Leaf { value: 0.0 }];
        let hist = self.histogram(&rows);
        let root = self.open_leaf(0, 0, rows, hist, max_depth);
        let mut open = vec![root];

        loop {
            if max_leaves.is_some_and(|limit| open.len() >= limit) {
                break;
            }
            // Best-first: the open leaf with the largest gain (earliest wins ties)
            let mut pick: Option<(usize, f64)> = None;
            for (i, leaf) in open.iter().enumerate() {
                if let Some(best) = &leaf.best {
                    if pick.map_or(true, |(_, gain)| best.gain > gain) {
                        pick = Some((i, best.gain));
                    }
                }
            }
            let Some((i, _)) = pick else { break };

            let leaf = open.swap_remove(i);
            let Some(split) = leaf.best else { break };
            importances[split.feature] += split.gain;

            let threshold = self.mapper.edges[split.feature][split.bin];
            let column = &self.bins[split.feature];
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = leaf
                .rows
                .iter()
                .copied()
                .partition(|&r| (column[r] as usize) <= split.bin);

            // Build the smaller child's histogram, derive the sibling by subtraction
            let (left_hist, right_hist) = if left_rows.len() <= right_rows.len() {
                let small = self.histogram(&left_rows);
                let other = subtract(&leaf.hist, &small);
                (small, other)
            } else {
                let small = self.histogram(&right_rows);
                let other = subtract(&leaf.hist, &small);
                (other, small)
            };

            let left_idx = nodes.len();
            let right_idx = left_idx + 1;
            nodes.push(BoostNode::Leaf { value: 0.0 });
            nodes.push(BoostNode::Leaf { value: 0.0 });
            nodes[leaf.node] = BoostNode::Split {
                feature: split.feature,
                threshold,
                left: left_idx,
                right: right_idx,
            };

            open.push(self.open_leaf(left_idx, leaf.depth + 1, left_rows, left_hist, max_depth));
            open.push(self.open_leaf(right_idx, leaf.depth + 1, right_rows, right_hist, max_depth));
        }

        for leaf in &open {
            nodes[leaf.node] = BoostNode::Leaf {
                value: self.leaf_value(&leaf.totals),
            };
        }
        RegressionTree { nodes }
    }

    fn open_leaf(
        &self,
        node: usize,
        depth: usize,
        rows: Vec<usize>,
        hist: Histogram,
        max_depth: Option<usize>,
    ) -> OpenLeaf {
        let mut totals = BinStats::default();
        if let Some(first) = hist.first() {
            for stats in first {
                totals.add(stats);
            }
        }
        let best = if max_depth.is_some_and(|d| depth >= d) {
            None
        } else {
            self.best_split(&hist, &totals)
        };
        OpenLeaf {
            node,
            depth,
            rows,
            totals,
            hist,
            best,
        }
    }

    fn histogram(&self, rows: &[usize]) -> Histogram {
        self.bins
            .par_iter()
            .enumerate()
            .map(|(feature, column)| {
                let mut hist = vec![BinStats::default(); self.mapper.n_bins(feature)];
                for &r in rows {
                    let stats = &mut hist[column[r] as usize];
                    stats.grad += self.grad[r];
                    stats.hess += self.hess[r];
                    stats.count += 1;
                }
                hist
            })
            .collect()
    }

    fn best_split(&self, hist: &Histogram, totals: &BinStats) -> Option<SplitInfo> {
        let p = self.params;
        let parent = score(totals.grad, totals.hess, p.lambda);
        let mut best: Option<SplitInfo> = None;

        for (feature, bins) in hist.iter().enumerate() {
            let mut left = BinStats::default();
            for (bin, stats) in bins.iter().enumerate().take(bins.len().saturating_sub(1)) {
                left.add(stats);
                let right = totals.sub(&left);
                if left.count < p.min_samples_leaf || right.count < p.min_samples_leaf {
                    continue;
                }
                if left.hess < p.min_child_weight || right.hess < p.min_child_weight {
                    continue;
                }
                let gain = 0.5
                    * (score(left.grad, left.hess, p.lambda)
                        + score(right.grad, right.hess, p.lambda)
                        - parent)
                    - p.gamma;
                if gain > 1e-12 && best.map_or(true, |b| gain > b.gain) {
                    best = Some(SplitInfo {
                        feature,
                        bin,
                        gain,
                    });
                }
            }
        }
        best
    }

    fn leaf_value(&self, totals: &BinStats) -> f64 {
        let denom = totals.hess + self.params.lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -totals.grad / denom * self.params.learning_rate
    }
}

fn score(grad: f64, hess: f64, lambda: f64) -> f64 {
    let denom = hess + lambda;
    if denom <= 0.0 {
        0.0
    } else {
        grad * grad / denom
    }
}

fn subtract(parent: &Histogram, child: &Histogram) -> Histogram {
    parent
        .iter()
        .zip(child)
        .map(|(p, c)| p.iter().zip(c).map(|(a, b)| a.sub(b)).collect())
        .collect()
}
