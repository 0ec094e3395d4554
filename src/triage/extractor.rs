//! Rule extraction from a recall-tuned decision tree

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::rule::{Op, Rule};
use crate::error::{Result, TriageError};
use crate::features::LabeledBatch;
use crate::ml::{DecisionTree, GridSearch, ParamGrid, Scoring, SearchOutcome, TreeParams};

/// Rule extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleExtractor {
    /// Candidate trees
    pub grid: ParamGrid,
    /// Cross-validation folds
    pub folds: usize,
    /// Cross-validated recall below which no rule is emitted
    pub min_recall: f64,
    /// Minimum benign share of a leaf for its path to become a clause
    pub min_leaf_purity: f64,
    /// Rules over more features than this are logged as hard to audit
    pub max_rule_features: usize,
}

impl Default for RuleExtractor {
    fn default() -> Self {
        Self {
            grid: ParamGrid::default(),
            folds: 5,
            min_recall: 0.9,
            min_leaf_purity: 0.5,
            max_rule_features: 4,
        }
    }
}

/// An accepted rule together with the tree it came from
pub struct ExtractedRule {
    pub rule: Rule,
    /// Winning tree, kept for inspection
    pub tree: DecisionTree,
    pub search: SearchOutcome<TreeParams>,
    /// Training rows the rule would auto-clear
    pub cleared_training_rows: usize,
    /// Training attacks among them
    pub cleared_training_attacks: usize,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    feature: usize,
    op: Op,
    threshold: f64,
}

impl RuleExtractor {
    /// Search the grid on the training split and turn the winner's benign
    /// leaves into a rule
    pub fn extract(&self, train: &LabeledBatch) -> Result<ExtractedRule> {
        if !(0.0..=1.0).contains(&self.min_recall) {
            return Err(TriageError::invalid("min_recall must be within [0, 1]"));
        }
        let candidates = self.grid.candidates();
        let y = train.label_indices();
        let search = GridSearch::new(self.folds, Scoring::Recall).run(&candidates, &train.features, &y)?;

        if search.best_score < self.min_recall {
            return Err(TriageError::NoAcceptableRule(format!(
                "best cross-validated recall {:.4} ({}) is below the floor {:.4}",
                search.best_score, search.best_params, self.min_recall
            )));
        }

        let tree = search.model.clone();
        let mut clauses = self.benign_paths(&tree, &train.feature_names);
        let rule = match clauses.len() {
            0 => {
                return Err(TriageError::NoAcceptableRule(format!(
                    "tree ({}) has no split leading to a leaf with benign share >= {:.2}",
                    search.best_params, self.min_leaf_purity
                )))
            }
            1 => clauses.remove(0),
            _ => Rule::any(clauses),
        };

        let n_features = rule.features().len();
        if n_features > self.max_rule_features {
            warn!(
                features = n_features,
                limit = self.max_rule_features,
                rule = %rule,
                "extracted rule spans more features than configured"
            );
        }

        let compiled = rule.compile(&train.feature_names)?;
        let mut cleared_training_rows = 0;
        let mut cleared_training_attacks = 0;
        for (i, row) in train.features.rows().enumerate() {
            if compiled.matches(row)? {
                cleared_training_rows += 1;
                if train.labels[i].is_attack() {
                    cleared_training_attacks += 1;
                }
            }
        }

        info!(
            rule = %rule,
            cv_recall = search.best_score,
            cleared = cleared_training_rows,
            leaked = cleared_training_attacks,
            "triage rule extracted"
        );

        Ok(ExtractedRule {
            rule,
            tree,
            search,
            cleared_training_rows,
            cleared_training_attacks,
        })
    }

    /// One conjunction per benign-dominant leaf, left to right. A tree
    /// without splits yields nothing.
    fn benign_paths(&self, tree: &DecisionTree, names: &[String]) -> Vec<Rule> {
        let mut out = Vec::new();
        if !tree.nodes().is_empty() {
            let mut path = Vec::new();
            self.walk(tree, 0, &mut path, names, &mut out);
        }
        out
    }

    fn walk(
        &self,
        tree: &DecisionTree,
        idx: usize,
        path: &mut Vec<Step>,
        names: &[String],
        out: &mut Vec<Rule>,
    ) {
        let node = &tree.nodes()[idx];
        match &node.split {
            Some(split) => {
                path.push(Step {
                    feature: split.feature,
                    op: Op::LessOrEqual,
                    threshold: split.threshold,
                });
                self.walk(tree, split.left, path, names, out);
                path.pop();

                path.push(Step {
                    feature: split.feature,
                    op: Op::GreaterThan,
                    threshold: split.threshold,
                });
                self.walk(tree, split.right, path, names, out);
                path.pop();
            }
            None => {
                if node.predicted_class() == 0 && node.class_fraction(0) >= self.min_leaf_purity {
                    out.extend(clause(path, names));
                }
            }
        }
    }
}

/// Conjunction of a path, keeping the tightest bound per feature and side
fn clause(path: &[Step], names: &[String]) -> Option<Rule> {
    let mut tight: Vec<Step> = Vec::new();
    for step in path {
        match tight
            .iter_mut()
            .find(|s| s.feature == step.feature && s.op == step.op)
        {
            Some(existing) => {
                existing.threshold = match step.op {
                    Op::LessOrEqual => existing.threshold.min(step.threshold),
                    Op::GreaterThan => existing.threshold.max(step.threshold),
                };
            }
            None => tight.push(*step),
        }
    }

    let mut conditions: Vec<Rule> = tight
        .into_iter()
        .map(|s| Rule::Condition {
            feature: names[s.feature].clone(),
            op: s.op,
            threshold: s.threshold,
        })
        .collect();

    match conditions.len() {
        0 => None,
        1 => Some(conditions.remove(0)),
        _ => Some(Rule::all(conditions)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{AttackCategory, Label};
    use crate::features::Matrix;

    fn names() -> Vec<String> {
        vec!["dur".into(), "sttl".into(), "sinpkt".into()]
    }

    fn batch(rows: Vec<(Vec<f64>, Label)>) -> LabeledBatch {
        let features = Matrix::from_rows(&rows.iter().map(|r| r.0.clone()).collect::<Vec<_>>()).unwrap();
        let labels: Vec<Label> = rows.iter().map(|r| r.1).collect();
        let categories = labels
            .iter()
            .map(|l| if l.is_attack() { AttackCategory::Exploits } else { AttackCategory::Normal })
            .collect();
        LabeledBatch::new(names().into(), features, labels, categories).unwrap()
    }

    fn separable() -> LabeledBatch {
        batch(
            (0..120)
                .map(|i| {
                    if i % 4 == 0 {
                        (vec![(i % 7) as f64, 254.0, 0.5], Label::Attack)
                    } else {
                        (vec![(i % 5) as f64, 31.0, (i % 3) as f64], Label::Benign)
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn test_extracts_low_ttl_rule() {
        let extracted = RuleExtractor::default().extract(&separable()).unwrap();

        assert_eq!(extracted.rule, Rule::le("sttl", 142.5));
        assert_eq!(extracted.cleared_training_attacks, 0);
        assert_eq!(extracted.cleared_training_rows, 90);
        assert!((extracted.search.best_score - 1.0).abs() < 1e-12);
        assert_eq!(extracted.search.scores.len(), 16);
        assert_eq!(extracted.tree.depth(), 1);
    }

    #[test]
    fn test_recall_floor_enforced() {
        // identical features: the tree cannot separate, majority is benign
        let data = batch(
            (0..60)
                .map(|i| {
                    let label = if i % 6 == 0 { Label::Attack } else { Label::Benign };
                    (vec![1.0, 31.0, 0.0], label)
                })
                .collect(),
        );
        let err = RuleExtractor::default().extract(&data);
        assert!(matches!(err, Err(TriageError::NoAcceptableRule(_))));
    }

    #[test]
    fn test_no_benign_leaf() {
        let data = batch(
            (0..60)
                .map(|i| {
                    let label = if i % 6 == 0 { Label::Benign } else { Label::Attack };
                    (vec![1.0, 31.0, 0.0], label)
                })
                .collect(),
        );
        let err = RuleExtractor::default().extract(&data);
        assert!(matches!(err, Err(TriageError::NoAcceptableRule(ref m)) if m.contains("benign share")));
    }

    #[test]
    fn test_clause_keeps_tightest_bounds() {
        let path = [
            Step { feature: 1, op: Op::LessOrEqual, threshold: 100.0 },
            Step { feature: 2, op: Op::GreaterThan, threshold: 0.0 },
            Step { feature: 1, op: Op::LessOrEqual, threshold: 61.0 },
            Step { feature: 2, op: Op::GreaterThan, threshold: 3.0 },
        ];
        let rule = clause(&path, &names());
        assert_eq!(
            rule,
            Some(Rule::all(vec![Rule::le("sttl", 61.0), Rule::gt("sinpkt", 3.0)]))
        );
        assert_eq!(clause(&[], &names()), None);
    }
}
