//! Confusion matrices and the metrics derived from them
//!
//! Binary metrics treat `Attack` as the positive class. A metric whose
//! denominator is zero is undefined and reported as `InsufficientData`
//! instead of NaN or a silent zero.

use serde::{Deserialize, Serialize};

use crate::dataset::Label;
use crate::error::{Result, TriageError};

fn ratio(num: usize, den: usize, what: &str) -> Result<f64> {
    if den == 0 {
        return Err(TriageError::insufficient(format!(
            "{} is undefined: zero denominator",
            what
        )));
    }
    Ok(num as f64 / den as f64)
}

/// 2×2 confusion matrix for the attack/benign label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryConfusion {
    /// Attacks predicted as attacks
    pub true_positives: usize,
    /// Benign rows predicted as attacks
    pub false_positives: usize,
    /// Attacks predicted as benign
    pub false_negatives: usize,
    /// Benign rows predicted as benign
    pub true_negatives: usize,
}

impl BinaryConfusion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one (actual, predicted) pair
    pub fn record(&mut self, actual: Label, predicted: Label) {
        match (actual, predicted) {
            (Label::Attack, Label::Attack) => self.true_positives += 1,
            (Label::Benign, Label::Attack) => self.false_positives += 1,
            (Label::Attack, Label::Benign) => self.false_negatives += 1,
            (Label::Benign, Label::Benign) => self.true_negatives += 1,
        }
    }

    pub fn from_labels(actual: &[Label], predicted: &[Label]) -> Self {
        let mut confusion = Self::new();
        for (a, p) in actual.iter().zip(predicted) {
            confusion.record(*a, *p);
        }
        confusion
    }

    /// Same as `from_labels` for class indices (1 = attack)
    pub fn from_indices(actual: &[usize], predicted: &[usize]) -> Self {
        let to_labels = |idx: &[usize]| idx.iter().map(|&i| Label::from_index(i)).collect::<Vec<_>>();
        Self::from_labels(&to_labels(actual), &to_labels(predicted))
    }

    /// Add another matrix's counts
    pub fn merge(&mut self, other: &BinaryConfusion) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.true_negatives += other.true_negatives;
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.false_negatives + self.true_negatives
    }

    /// Rows whose true label is attack
    pub fn actual_attacks(&self) -> usize {
        self.true_positives + self.false_negatives
    }

    /// TP / (TP + FN)
    pub fn recall(&self) -> Result<f64> {
        ratio(self.true_positives, self.actual_attacks(), "recall")
    }

    /// TP / (TP + FP)
    pub fn precision(&self) -> Result<f64> {
        ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
            "precision",
        )
    }

    /// (TP + TN) / total
    pub fn accuracy(&self) -> Result<f64> {
        ratio(
            self.true_positives + self.true_negatives,
            self.total(),
            "accuracy",
        )
    }

    /// 2TP / (2TP + FP + FN)
    pub fn f1(&self) -> Result<f64> {
        ratio(
            2 * self.true_positives,
            2 * self.true_positives + self.false_positives + self.false_negatives,
            "f1",
        )
    }

    /// FP / (FP + TN)
    pub fn false_positive_rate(&self) -> Result<f64> {
        ratio(
            self.false_positives,
            self.false_positives + self.true_negatives,
            "false positive rate",
        )
    }
}

/// Headline metrics of one model; `None` where undefined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub recall: Option<f64>,
    pub precision: Option<f64>,
    pub accuracy: Option<f64>,
    pub f1: Option<f64>,
    /// Benign rows flagged as attacks
    pub false_positive_rate: Option<f64>,
    pub confusion: BinaryConfusion,
}

impl MetricSummary {
    pub fn from_confusion(confusion: BinaryConfusion) -> Self {
        Self {
            recall: confusion.recall().ok(),
            precision: confusion.precision().ok(),
            accuracy: confusion.accuracy().ok(),
            f1: confusion.f1().ok(),
            false_positive_rate: confusion.false_positive_rate().ok(),
            confusion,
        }
    }
}

/// Per-class line of a classification report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    /// True rows of the class
    pub support: usize,
}

/// Averages across classes; undefined per-class values count as zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Precision / recall / f1 per class plus overall averages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: Option<f64>,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
    pub support: usize,
}

/// Square confusion matrix over named classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiClassConfusion {
    pub labels: Vec<String>,
    /// `counts[actual][predicted]`
    pub counts: Vec<Vec<usize>>,
}

impl MultiClassConfusion {
    pub fn new(labels: Vec<String>) -> Self {
        let n = labels.len();
        Self {
            labels,
            counts: vec![vec![0; n]; n],
        }
    }

    pub fn from_indices(labels: Vec<String>, actual: &[usize], predicted: &[usize]) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(TriageError::invalid(format!(
                "{} true labels but {} predictions",
                actual.len(),
                predicted.len()
            )));
        }
        let mut confusion = Self::new(labels);
        for (a, p) in actual.iter().zip(predicted) {
            confusion.record(*a, *p)?;
        }
        Ok(confusion)
    }

    pub fn record(&mut self, actual: usize, predicted: usize) -> Result<()> {
        let n = self.labels.len();
        if actual >= n || predicted >= n {
            return Err(TriageError::invalid(format!(
                "class index out of range for {} classes",
                n
            )));
        }
        self.counts[actual][predicted] += 1;
        Ok(())
    }

    pub fn n_classes(&self) -> usize {
        self.labels.len()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> Result<f64> {
        let correct = (0..self.n_classes()).map(|i| self.counts[i][i]).sum();
        ratio(correct, self.total(), "accuracy")
    }

    /// The class against all others, as a 2×2 matrix
    pub fn one_vs_rest(&self, class: usize) -> BinaryConfusion {
        let mut out = BinaryConfusion::new();
        for (actual, row) in self.counts.iter().enumerate() {
            for (predicted, &count) in row.iter().enumerate() {
                match (actual == class, predicted == class) {
                    (true, true) => out.true_positives += count,
                    (false, true) => out.false_positives += count,
                    (true, false) => out.false_negatives += count,
                    (false, false) => out.true_negatives += count,
                }
            }
        }
        out
    }

    pub fn report(&self) -> ClassificationReport {
        let classes: Vec<ClassMetrics> = (0..self.n_classes())
            .map(|i| {
                let c = self.one_vs_rest(i);
                ClassMetrics {
                    label: self.labels[i].clone(),
                    precision: c.precision().ok(),
                    recall: c.recall().ok(),
                    f1: c.f1().ok(),
                    support: c.actual_attacks(),
                }
            })
            .collect();

        let support: usize = classes.iter().map(|c| c.support).sum();
        let n = classes.len().max(1) as f64;
        let mut macro_avg = AverageMetrics::default();
        let mut weighted_avg = AverageMetrics::default();
        for c in &classes {
            let (p, r, f) = (
                c.precision.unwrap_or(0.0),
                c.recall.unwrap_or(0.0),
                c.f1.unwrap_or(0.0),
            );
            macro_avg.precision += p / n;
            macro_avg.recall += r / n;
            macro_avg.f1 += f / n;
            if support > 0 {
                let w = c.support as f64 / support as f64;
                weighted_avg.precision += p * w;
                weighted_avg.recall += r * w;
                weighted_avg.f1 += f * w;
            }
        }

        ClassificationReport {
            classes,
            accuracy: self.accuracy().ok(),
            macro_avg,
            weighted_avg,
            support,
        }
    }
}
