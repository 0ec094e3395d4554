//! Rule-based routing of a batch into auto-cleared and needs-review rows

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rule::CompiledRule;
use crate::error::{Result, SchemaError, TriageError};
use crate::features::Matrix;

/// Row indices of a batch split by the triage rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Rows the rule marks benign
    pub auto_cleared: Vec<usize>,
    /// Rows left for the confirmation classifier
    pub needs_review: Vec<usize>,
    /// Batch size
    pub total: usize,
}

impl Partition {
    /// Share of the batch that was auto-cleared (the filtered-traffic ratio)
    pub fn cleared_fraction(&self) -> Result<f64> {
        if self.total == 0 {
            return Err(TriageError::insufficient("cleared fraction of an empty batch"));
        }
        Ok(self.auto_cleared.len() as f64 / self.total as f64)
    }

    /// Every index below `total` appears in exactly one list
    pub fn is_consistent(&self) -> bool {
        let mut seen = vec![false; self.total];
        for &i in self.auto_cleared.iter().chain(&self.needs_review) {
            match seen.get_mut(i) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        seen.into_iter().all(|s| s)
    }
}

/// Stateless triage stage
pub struct TriageFilter;

impl TriageFilter {
    /// Route every row: rule holds ⇒ auto-cleared, otherwise needs review
    pub fn partition(rule: &CompiledRule, batch: &Matrix) -> Result<Partition> {
        if !batch.is_empty() && batch.n_cols() != rule.width() {
            return Err(SchemaError::DimensionMismatch {
                expected: rule.width(),
                got: batch.n_cols(),
            }
            .into());
        }

        let mut partition = Partition {
            total: batch.n_rows(),
            ..Default::default()
        };
        for (i, row) in batch.rows().enumerate() {
            if rule.matches(row)? {
                partition.auto_cleared.push(i);
            } else {
                partition.needs_review.push(i);
            }
        }

        debug!(
            rule = %rule.rule(),
            auto_cleared = partition.auto_cleared.len(),
            needs_review = partition.needs_review.len(),
            "batch partitioned"
        );
        Ok(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::Rule;

    fn names() -> Vec<String> {
        vec!["sttl".into(), "sinpkt".into()]
    }

    fn batch() -> Matrix {
        Matrix::from_rows(&[
            vec![254.0, 0.0],
            vec![31.0, 0.0],
            vec![31.0, 2.5],
            vec![62.0, 1.0],
            vec![61.0, 0.1],
        ])
        .unwrap()
    }

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        let rule = Rule::any(vec![
            Rule::all(vec![Rule::le("sttl", 61.0), Rule::le("sinpkt", 0.0)]),
            Rule::gt("sttl", 61.0),
        ])
        .compile(&names())
        .unwrap();
        let partition = TriageFilter::partition(&rule, &batch()).unwrap();

        assert_eq!(partition.auto_cleared, vec![0, 1, 3]);
        assert_eq!(partition.needs_review, vec![2, 4]);
        assert!(partition.is_consistent());
        assert!((partition.cleared_fraction().unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_batch() {
        let rule = Rule::gt("sttl", 61.0).compile(&names()).unwrap();
        let partition = TriageFilter::partition(&rule, &Matrix::with_cols(2)).unwrap();
        assert!(partition.auto_cleared.is_empty());
        assert!(partition.needs_review.is_empty());
        assert!(partition.is_consistent());
        assert!(matches!(
            partition.cleared_fraction(),
            Err(TriageError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_tighter_rule_clears_no_more() {
        let rows: Vec<Vec<f64>> = (0..300).map(|i| vec![(i % 255) as f64, (i % 7) as f64]).collect();
        let m = Matrix::from_rows(&rows).unwrap();

        let mut previous = usize::MAX;
        for threshold in [10.0, 30.0, 61.0, 100.0, 200.0, 254.0] {
            let rule = Rule::gt("sttl", threshold).compile(&names()).unwrap();
            let cleared = TriageFilter::partition(&rule, &m).unwrap().auto_cleared.len();
            assert!(cleared <= previous);
            previous = cleared;
        }
    }

    #[test]
    fn test_width_mismatch() {
        let rule = Rule::gt("sttl", 61.0).compile(&names()).unwrap();
        let m = Matrix::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert!(matches!(
            TriageFilter::partition(&rule, &m),
            Err(TriageError::Schema(_))
        ));
    }

    #[test]
    fn test_inconsistent_partition_detected() {
        let bad = Partition {
            auto_cleared: vec![0, 1],
            needs_review: vec![1],
            total: 3,
        };
        assert!(!bad.is_consistent());
    }
}
