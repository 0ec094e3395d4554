//! End-to-end evaluation of triage plus confirmation
//!
//! Auto-cleared rows are scored as predicted benign; the confirmation
//! classifier only sees the needs-review rows. Comparisons reuse one fixed
//! partition, so metric differences come from the confirmation model alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::confirm::ConfirmationClassifier;
use crate::dataset::{AttackCategory, Label};
use crate::error::{Result, TriageError};
use crate::features::LabeledBatch;
use crate::testing::metrics::{BinaryConfusion, MetricSummary};
use crate::triage::Partition;

/// Efficiency of the triage stage on one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageStats {
    pub total: usize,
    pub auto_cleared: usize,
    pub needs_review: usize,
    /// `auto_cleared / total`; `None` for an empty batch
    pub filtered_fraction: Option<f64>,
    /// Attacks the rule auto-cleared
    pub leaked_attacks: usize,
    /// Attacks routed to review
    pub review_attacks: usize,
}

/// How one attack family fared through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDetection {
    pub category: AttackCategory,
    pub total: usize,
    pub auto_cleared: usize,
    /// Rows the pipeline predicted as attack
    pub flagged: usize,
    /// `flagged / total`
    pub flagged_fraction: Option<f64>,
}

/// Metrics of one confirmation classifier behind the fixed partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvaluation {
    pub model: String,
    /// Whole batch, auto-cleared rows counted as benign predictions
    pub overall: MetricSummary,
    /// Needs-review rows only
    pub review: MetricSummary,
    pub triage: TriageStats,
    pub categories: Vec<CategoryDetection>,
    /// Rows handed to the confirmation classifier
    pub confirmation_rows: usize,
}

/// Side-by-side results of several confirmation classifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub triage: TriageStats,
    /// Overall metrics by model name
    pub models: BTreeMap<String, MetricSummary>,
    /// Full evaluations in candidate order
    pub evaluations: Vec<PipelineEvaluation>,
    /// Model with the highest overall recall (earliest on ties)
    pub best_recall: Option<String>,
}

/// Scores pipeline predictions against one labeled batch
pub struct Evaluator<'a> {
    partition: &'a Partition,
    batch: &'a LabeledBatch,
}

impl<'a> Evaluator<'a> {
    pub fn new(partition: &'a Partition, batch: &'a LabeledBatch) -> Result<Self> {
        if partition.total != batch.len() {
            return Err(TriageError::invalid(format!(
                "partition covers {} rows but the batch has {}",
                partition.total,
                batch.len()
            )));
        }
        if !partition.is_consistent() {
            return Err(TriageError::invalid(
                "partition does not cover the batch exactly once",
            ));
        }
        Ok(Self { partition, batch })
    }

    pub fn triage_stats(&self) -> TriageStats {
        let attacks_in = |rows: &[usize]| rows.iter().filter(|&&i| self.batch.labels[i].is_attack()).count();
        TriageStats {
            total: self.partition.total,
            auto_cleared: self.partition.auto_cleared.len(),
            needs_review: self.partition.needs_review.len(),
            filtered_fraction: self.partition.cleared_fraction().ok(),
            leaked_attacks: attacks_in(&self.partition.auto_cleared),
            review_attacks: attacks_in(&self.partition.needs_review),
        }
    }

    /// Combined predictions: benign for auto-cleared rows, the classifier's
    /// label for needs-review rows
    pub fn predictions(&self, classifier: &ConfirmationClassifier) -> Result<Vec<Label>> {
        let mut predicted = vec![Label::Benign; self.batch.len()];
        if self.partition.needs_review.is_empty() {
            return Ok(predicted);
        }

        let review = self.batch.features.select_rows(&self.partition.needs_review);
        let scored = classifier.score(&review)?;
        if scored.len() != review.n_rows() {
            return Err(TriageError::invalid(format!(
                "{} returned {} labels for {} rows",
                classifier.name(),
                scored.len(),
                review.n_rows()
            )));
        }
        for (&row, label) in self.partition.needs_review.iter().zip(scored) {
            predicted[row] = label;
        }
        Ok(predicted)
    }

    pub fn evaluate(&self, classifier: &ConfirmationClassifier) -> Result<PipelineEvaluation> {
        let predicted = self.predictions(classifier)?;

        let mut review = BinaryConfusion::new();
        for &i in &self.partition.needs_review {
            review.record(self.batch.labels[i], predicted[i]);
        }
        let mut overall = BinaryConfusion::new();
        for &i in &self.partition.auto_cleared {
            overall.record(self.batch.labels[i], Label::Benign);
        }
        overall.merge(&review);

        let evaluation = PipelineEvaluation {
            model: classifier.name().to_string(),
            overall: MetricSummary::from_confusion(overall),
            review: MetricSummary::from_confusion(review),
            triage: self.triage_stats(),
            categories: self.category_breakdown(&predicted),
            confirmation_rows: self.partition.needs_review.len(),
        };

        info!(
            model = %evaluation.model,
            recall = ?evaluation.overall.recall,
            precision = ?evaluation.overall.precision,
            accuracy = ?evaluation.overall.accuracy,
            review_rows = evaluation.confirmation_rows,
            "pipeline evaluated"
        );
        Ok(evaluation)
    }

    /// Run every classifier behind the same partition
    pub fn compare(&self, classifiers: &[ConfirmationClassifier]) -> Result<ModelComparison> {
        let mut models = BTreeMap::new();
        let mut evaluations = Vec::with_capacity(classifiers.len());
        let mut best: Option<(String, f64)> = None;

        for classifier in classifiers {
            if models.contains_key(classifier.name()) {
                return Err(TriageError::invalid(format!(
                    "duplicate confirmation model name '{}'",
                    classifier.name()
                )));
            }
            let evaluation = self.evaluate(classifier)?;
            if let Some(recall) = evaluation.overall.recall {
                if best.as_ref().map_or(true, |(_, r)| recall > *r) {
                    best = Some((evaluation.model.clone(), recall));
                }
            }
            models.insert(evaluation.model.clone(), evaluation.overall.clone());
            evaluations.push(evaluation);
        }

        Ok(ModelComparison {
            triage: self.triage_stats(),
            models,
            evaluations,
            best_recall: best.map(|(name, _)| name),
        })
    }

    fn category_breakdown(&self, predicted: &[Label]) -> Vec<CategoryDetection> {
        let mut cleared = vec![false; self.batch.len()];
        for &i in &self.partition.auto_cleared {
            cleared[i] = true;
        }

        let mut rows: BTreeMap<AttackCategory, (usize, usize, usize)> = BTreeMap::new();
        for (i, category) in self.batch.categories.iter().enumerate() {
            let entry = rows.entry(*category).or_default();
            entry.0 += 1;
            if cleared[i] {
                entry.1 += 1;
            }
            if predicted[i].is_attack() {
                entry.2 += 1;
            }
        }

        rows.into_iter()
            .map(|(category, (total, auto_cleared, flagged))| CategoryDetection {
                category,
                total,
                auto_cleared,
                flagged,
                flagged_fraction: Some(flagged as f64 / total as f64),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Matrix;
    use crate::ml::Classifier;
    use crate::triage::{Rule, TriageFilter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Predicts attack when the first feature is above a cut; counts calls
    struct CutClassifier {
        cut: f64,
        calls: Arc<AtomicUsize>,
    }

    impl Classifier for CutClassifier {
        fn name(&self) -> &str {
            "cut"
        }
        fn n_features(&self) -> usize {
            2
        }
        fn n_classes(&self) -> usize {
            2
        }
        fn predict_proba_row(&self, row: &[f64]) -> Vec<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if row[0] > self.cut {
                vec![0.0, 1.0]
            } else {
                vec![1.0, 0.0]
            }
        }
    }

    fn classifier(name: &str, cut: f64) -> (ConfirmationClassifier, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = CutClassifier { cut, calls: Arc::clone(&calls) };
        (ConfirmationClassifier::new(name, Box::new(model)), calls)
    }

    fn batch(rows: Vec<(f64, f64, Label, AttackCategory)>) -> LabeledBatch {
        LabeledBatch::new(
            vec!["sttl".to_string(), "sinpkt".to_string()].into(),
            Matrix::from_rows(&rows.iter().map(|r| vec![r.0, r.1]).collect::<Vec<_>>()).unwrap(),
            rows.iter().map(|r| r.2).collect(),
            rows.iter().map(|r| r.3).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_all_cleared_rows_are_true_negatives_without_confirmation() {
        let data = batch(
            (0..1000)
                .map(|i| (62.0 + (i % 190) as f64, 0.0, Label::Benign, AttackCategory::Normal))
                .collect(),
        );
        let rule = Rule::gt("sttl", 61.0).compile(&data.feature_names).unwrap();
        let partition = TriageFilter::partition(&rule, &data.features).unwrap();
        assert_eq!(partition.auto_cleared.len(), 1000);

        let (confirm, calls) = classifier("cut", 100.0);
        let evaluation = Evaluator::new(&partition, &data).unwrap().evaluate(&confirm).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(evaluation.confirmation_rows, 0);
        assert_eq!(evaluation.overall.confusion.true_negatives, 1000);
        assert_eq!(evaluation.overall.confusion.total(), 1000);
        assert_eq!(evaluation.overall.recall, None);
        assert_eq!(evaluation.triage.filtered_fraction, Some(1.0));
    }

    #[test]
    fn test_combined_predictions() {
        // rule clears sttl <= 61; classifier flags sttl > 200
        let data = batch(vec![
            (31.0, 0.0, Label::Benign, AttackCategory::Normal),
            (31.0, 0.0, Label::Attack, AttackCategory::Exploits),
            (254.0, 0.0, Label::Attack, AttackCategory::Generic),
            (254.0, 0.0, Label::Attack, AttackCategory::Exploits),
            (100.0, 0.0, Label::Attack, AttackCategory::DoS),
            (100.0, 0.0, Label::Benign, AttackCategory::Normal),
            (254.0, 0.0, Label::Benign, AttackCategory::Normal),
        ]);
        let rule = Rule::le("sttl", 61.0).compile(&data.feature_names).unwrap();
        let partition = TriageFilter::partition(&rule, &data.features).unwrap();
        let evaluator = Evaluator::new(&partition, &data).unwrap();

        let (confirm, calls) = classifier("cut", 200.0);
        let evaluation = evaluator.evaluate(&confirm).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let c = evaluation.overall.confusion;
        assert_eq!((c.true_positives, c.false_positives, c.false_negatives, c.true_negatives), (2, 1, 2, 2));
        assert!((evaluation.overall.recall.unwrap() - 0.5).abs() < 1e-12);
        assert!((evaluation.overall.false_positive_rate.unwrap() - 1.0 / 3.0).abs() < 1e-12);

        let r = evaluation.review.confusion;
        assert_eq!(r.total(), 5);
        assert_eq!(r.false_negatives, 1);

        assert_eq!(evaluation.triage.leaked_attacks, 1);
        assert_eq!(evaluation.triage.review_attacks, 3);
        assert!((evaluation.triage.filtered_fraction.unwrap() - 2.0 / 7.0).abs() < 1e-12);

        let exploits = evaluation
            .categories
            .iter()
            .find(|d| d.category == AttackCategory::Exploits)
            .unwrap();
        assert_eq!((exploits.total, exploits.auto_cleared, exploits.flagged), (2, 1, 1));
    }

    #[test]
    fn test_compare_uses_same_partition() {
        let data = batch(vec![
            (31.0, 0.0, Label::Benign, AttackCategory::Normal),
            (150.0, 0.0, Label::Attack, AttackCategory::DoS),
            (254.0, 0.0, Label::Attack, AttackCategory::Generic),
            (90.0, 0.0, Label::Benign, AttackCategory::Normal),
        ]);
        let rule = Rule::le("sttl", 61.0).compile(&data.feature_names).unwrap();
        let partition = TriageFilter::partition(&rule, &data.features).unwrap();
        let evaluator = Evaluator::new(&partition, &data).unwrap();

        let (strict, _) = classifier("strict", 200.0);
        let (loose, _) = classifier("loose", 100.0);
        let comparison = evaluator.compare(&[strict, loose]).unwrap();

        assert_eq!(comparison.models.len(), 2);
        assert_eq!(comparison.models["strict"].recall, Some(0.5));
        assert_eq!(comparison.models["loose"].recall, Some(1.0));
        assert_eq!(comparison.best_recall.as_deref(), Some("loose"));
        assert!(comparison.evaluations.iter().all(|e| e.triage == comparison.triage));
    }

    #[test]
    fn test_rejects_mismatched_partition() {
        let data = batch(vec![(31.0, 0.0, Label::Benign, AttackCategory::Normal)]);
        let partition = Partition { auto_cleared: vec![0], needs_review: vec![], total: 2 };
        assert!(Evaluator::new(&partition, &data).is_err());

        let (a, _) = classifier("same", 1.0);
        let (b, _) = classifier("same", 2.0);
        let ok = Partition { auto_cleared: vec![], needs_review: vec![0], total: 1 };
        let evaluator = Evaluator::new(&ok, &data).unwrap();
        assert!(evaluator.compare(&[a, b]).is_err());
    }
}
