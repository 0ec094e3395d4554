//! Corpus analysis around the triage pipeline
//!
//! - attack-family distribution of the attack rows
//! - feature-importance ranking from a random forest
//! - Pearson correlation of every feature with the binary label
//! - an attack-family classifier on the top-ranked features

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::dataset::AttackCategory;
use crate::error::{Result, TriageError};
use crate::features::LabeledBatch;
use crate::ml::{Classifier, ForestParams, Learner};
use crate::pipeline::PipelineContext;
use crate::testing::metrics::{BinaryConfusion, ClassificationReport, MultiClassConfusion};

/// Count and share of one attack family among attack rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: AttackCategory,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Correlation with the label; `None` for a constant feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCorrelation {
    pub feature: String,
    pub correlation: Option<f64>,
}

/// Held-out results of the attack-family classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryModelReport {
    /// Features the model was trained on, by rank
    pub features: Vec<String>,
    /// Over the families seen in the test split or predicted
    pub confusion: MultiClassConfusion,
    pub report: ClassificationReport,
    /// One 2×2 matrix per family in `confusion.labels` order
    pub one_vs_rest: Vec<BinaryConfusion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub distribution: Vec<CategoryShare>,
    pub importances: Vec<FeatureImportance>,
    pub correlations: Vec<LabelCorrelation>,
    pub category_model: Option<CategoryModelReport>,
}

/// Attack families among the attack rows of the given batches, most
/// frequent first
pub fn category_distribution(batches: &[&LabeledBatch]) -> Vec<CategoryShare> {
    let mut counts = vec![0usize; AttackCategory::ALL.len()];
    for batch in batches {
        for (label, category) in batch.labels.iter().zip(&batch.categories) {
            if label.is_attack() {
                counts[category.index()] += 1;
            }
        }
    }

    let attacks: usize = counts.iter().sum();
    let mut shares: Vec<CategoryShare> = counts
        .into_iter()
        .enumerate()
        .filter(|(_, count)| *count > 0)
        .map(|(idx, count)| CategoryShare {
            category: AttackCategory::from_index(idx),
            count,
            share: count as f64 / attacks as f64,
        })
        .collect();
    shares.sort_by(|a, b| b.count.cmp(&a.count));
    shares
}

/// Pair importances with feature names, highest first
pub fn rank_features(importances: &[f64], names: &[String]) -> Result<Vec<FeatureImportance>> {
    if importances.len() != names.len() {
        return Err(TriageError::invalid(format!(
            "{} importances for {} features",
            importances.len(),
            names.len()
        )));
    }
    let mut ranked: Vec<FeatureImportance> = names
        .iter()
        .zip(importances)
        .map(|(feature, &importance)| FeatureImportance {
            feature: feature.clone(),
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    Ok(ranked)
}

/// Sample Pearson correlation, `None` when either side is constant
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    // Welford-style co-moments
    let (mut mean_x, mut mean_y) = (0.0, 0.0);
    let (mut m2_x, mut m2_y, mut co) = (0.0, 0.0, 0.0);
    for (i, (&a, &b)) in x.iter().zip(y).enumerate() {
        let n = (i + 1) as f64;
        let dx = a - mean_x;
        mean_x += dx / n;
        let dy = b - mean_y;
        mean_y += dy / n;
        m2_x += dx * (a - mean_x);
        m2_y += dy * (b - mean_y);
        co += dx * (b - mean_y);
    }

    if m2_x <= 0.0 || m2_y <= 0.0 {
        return None;
    }
    Some((co / (m2_x.sqrt() * m2_y.sqrt())).clamp(-1.0, 1.0))
}

/// Correlation of every feature with the label, strongest positive first;
/// constant features last
pub fn label_correlations(batch: &LabeledBatch) -> Vec<LabelCorrelation> {
    let y: Vec<f64> = batch.labels.iter().map(|l| l.index() as f64).collect();
    let mut out: Vec<LabelCorrelation> = batch
        .feature_names
        .iter()
        .enumerate()
        .map(|(col, feature)| LabelCorrelation {
            feature: feature.clone(),
            correlation: pearson(&batch.features.column(col), &y),
        })
        .collect();
    out.sort_by(|a, b| match (a.correlation, b.correlation) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    out
}

/// The first `n` feature names of a ranking
pub fn top_features(ranking: &[FeatureImportance], n: usize) -> Vec<String> {
    ranking.iter().take(n).map(|f| f.feature.clone()).collect()
}

/// Train a forest on `features` to predict the attack family and score it
/// on the test split
pub fn classify_categories(
    train: &LabeledBatch,
    test: &LabeledBatch,
    features: &[String],
    params: &ForestParams,
) -> Result<CategoryModelReport> {
    if features.is_empty() {
        return Err(TriageError::invalid("attack-family model needs at least one feature"));
    }
    let train = train.select_features(features)?;
    let test = test.select_features(features)?;

    let n_classes = AttackCategory::ALL.len();
    let model = params.fit(&train.features, &train.category_indices(), n_classes)?;
    let predicted = model.predict(&test.features)?;
    let actual = test.category_indices();

    // Restrict the matrix to families that occur, in category order
    let mut present = vec![false; n_classes];
    for &c in actual.iter().chain(&predicted) {
        present[c] = true;
    }
    let mut position = vec![usize::MAX; n_classes];
    let mut labels = Vec::new();
    for (idx, _) in present.iter().enumerate().filter(|(_, p)| **p) {
        position[idx] = labels.len();
        labels.push(AttackCategory::from_index(idx).to_string());
    }
    let remap = |v: &[usize]| v.iter().map(|&c| position[c]).collect::<Vec<_>>();
    let confusion = MultiClassConfusion::from_indices(labels, &remap(&actual), &remap(&predicted))?;

    let report = confusion.report();
    let one_vs_rest = (0..confusion.n_classes())
        .map(|i| confusion.one_vs_rest(i))
        .collect();

    info!(
        features = features.len(),
        families = confusion.n_classes(),
        accuracy = ?report.accuracy,
        "attack-family classifier evaluated"
    );

    Ok(CategoryModelReport {
        features: features.to_vec(),
        confusion,
        report,
        one_vs_rest,
    })
}

/// Run every analysis over a context. `importances` come from an already
/// trained forest; without them a default forest is trained on the
/// binary label.
pub fn analyze(
    ctx: &PipelineContext,
    importances: Option<Vec<f64>>,
    config: &AnalysisConfig,
) -> Result<AnalysisReport> {
    let importances = match importances {
        Some(imp) => imp,
        None => {
            debug!("training a forest for feature ranking");
            let params = ForestParams {
                seed: config.category_forest.seed,
                ..Default::default()
            };
            let forest = params.fit(&ctx.train.features, &ctx.train.label_indices(), 2)?;
            forest
                .feature_importances()
                .unwrap_or_else(|| vec![0.0; ctx.train.dim()])
        }
    };
    let ranking = rank_features(&importances, &ctx.train.feature_names)?;

    let category_model = if config.top_features > 0 {
        let features = top_features(&ranking, config.top_features);
        Some(classify_categories(
            &ctx.train,
            &ctx.test,
            &features,
            &config.category_forest,
        )?)
    } else {
        None
    };

    Ok(AnalysisReport {
        distribution: category_distribution(&[&ctx.train, &ctx.test]),
        importances: ranking,
        correlations: label_correlations(&ctx.train),
        category_model,
    })
}
