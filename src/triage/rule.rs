//! Typed triage rules
//!
//! A rule is a boolean expression over threshold conditions. A row for
//! which the rule holds is considered benign and is auto-cleared.
//!
//! ```ignore
//! let rule = Rule::any(vec![
//!     Rule::all(vec![Rule::le("sttl", 61.0), Rule::le("sinpkt", 0.0)]),
//!     Rule::gt("sttl", 61.0),
//! ]);
//! assert_eq!(rule.to_string(), "(sttl <= 61.00 & sinpkt <= 0.00) | (sttl > 61.00)");
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError, TriageError};

/// Comparison of a feature against a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    LessOrEqual,
    GreaterThan,
}

impl Op {
    fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Op::LessOrEqual => value <= threshold,
            Op::GreaterThan => value > threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Op::LessOrEqual => "<=",
            Op::GreaterThan => ">",
        }
    }
}

/// Boolean rule over named features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    Condition {
        feature: String,
        op: Op,
        threshold: f64,
    },
    All { rules: Vec<Rule> },
    Any { rules: Vec<Rule> },
}

impl Rule {
    pub fn le(feature: impl Into<String>, threshold: f64) -> Self {
        Rule::Condition {
            feature: feature.into(),
            op: Op::LessOrEqual,
            threshold,
        }
    }

    pub fn gt(feature: impl Into<String>, threshold: f64) -> Self {
        Rule::Condition {
            feature: feature.into(),
            op: Op::GreaterThan,
            threshold,
        }
    }

    pub fn all(rules: Vec<Rule>) -> Self {
        Rule::All { rules }
    }

    pub fn any(rules: Vec<Rule>) -> Self {
        Rule::Any { rules }
    }

    /// Distinct feature names, sorted
    pub fn features(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_features(&mut out);
        out
    }

    fn collect_features<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Rule::Condition { feature, .. } => {
                out.insert(feature.as_str());
            }
            Rule::All { rules } | Rule::Any { rules } => {
                for r in rules {
                    r.collect_features(out);
                }
            }
        }
    }

    /// Number of threshold conditions
    pub fn condition_count(&self) -> usize {
        match self {
            Rule::Condition { .. } => 1,
            Rule::All { rules } | Rule::Any { rules } => {
                rules.iter().map(|r| r.condition_count()).sum()
            }
        }
    }

    /// Reject empty groups and non-finite thresholds
    pub fn validate(&self) -> Result<()> {
        match self {
            Rule::Condition { feature, threshold, .. } => {
                if feature.is_empty() {
                    return Err(TriageError::invalid("rule condition has no feature"));
                }
                if !threshold.is_finite() {
                    return Err(TriageError::invalid(format!(
                        "rule threshold for '{}' is not finite",
                        feature
                    )));
                }
                Ok(())
            }
            Rule::All { rules } | Rule::Any { rules } => {
                if rules.is_empty() {
                    return Err(TriageError::invalid("rule group is empty"));
                }
                rules.iter().try_for_each(|r| r.validate())
            }
        }
    }

    /// Resolve feature names to column indices
    pub fn compile(&self, feature_names: &[String]) -> Result<CompiledRule> {
        self.validate()?;
        let expr = compile_expr(self, feature_names)?;
        Ok(CompiledRule {
            rule: self.clone(),
            expr,
            width: feature_names.len(),
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Condition {
                feature,
                op,
                threshold,
            } => write!(f, "{} {} {:.2}", feature, op.symbol(), threshold),
            Rule::All { rules } => join(f, rules, " & "),
            Rule::Any { rules } => join(f, rules, " | "),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, rules: &[Rule], sep: &str) -> fmt::Result {
    for (i, r) in rules.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match r {
            Rule::Condition { .. } if sep == " & " => write!(f, "{}", r)?,
            _ => write!(f, "({})", r)?,
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Condition {
        column: usize,
        op: Op,
        threshold: f64,
    },
    All(Vec<Expr>),
    Any(Vec<Expr>),
}

fn compile_expr(rule: &Rule, names: &[String]) -> Result<Expr> {
    Ok(match rule {
        Rule::Condition {
            feature,
            op,
            threshold,
        } => Expr::Condition {
            column: names
                .iter()
                .position(|n| n == feature)
                .ok_or_else(|| SchemaError::UnknownFeature(feature.clone()))?,
            op: *op,
            threshold: *threshold,
        },
        Rule::All { rules } => Expr::All(
            rules
                .iter()
                .map(|r| compile_expr(r, names))
                .collect::<Result<_>>()?,
        ),
        Rule::Any { rules } => Expr::Any(
            rules
                .iter()
                .map(|r| compile_expr(r, names))
                .collect::<Result<_>>()?,
        ),
    })
}

impl Expr {
    fn eval(&self, row: &[f64]) -> bool {
        match self {
            Expr::Condition {
                column,
                op,
                threshold,
            } => op.holds(row[*column], *threshold),
            Expr::All(parts) => parts.iter().all(|p| p.eval(row)),
            Expr::Any(parts) => parts.iter().any(|p| p.eval(row)),
        }
    }
}

/// A rule bound to the column layout of one encoder
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    rule: Rule,
    expr: Expr,
    width: usize,
}

impl CompiledRule {
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Row width the rule was compiled for
    pub fn width(&self) -> usize {
        self.width
    }

    /// Whether the row is benign under this rule
    pub fn matches(&self, row: &[f64]) -> std::result::Result<bool, SchemaError> {
        if row.len() != self.width {
            return Err(SchemaError::DimensionMismatch {
                expected: self.width,
                got: row.len(),
            });
        }
        Ok(self.expr.eval(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["dur".into(), "sttl".into(), "sinpkt".into()]
    }

    fn notebook_rule() -> Rule {
        Rule::any(vec![
            Rule::all(vec![Rule::le("sttl", 61.0), Rule::le("sinpkt", 0.0)]),
            Rule::gt("sttl", 61.0),
        ])
    }

    #[test]
    fn test_display() {
        assert_eq!(
            notebook_rule().to_string(),
            "(sttl <= 61.00 & sinpkt <= 0.00) | (sttl > 61.00)"
        );
        assert_eq!(Rule::gt("sttl", 61.0).to_string(), "sttl > 61.00");
    }

    #[test]
    fn test_matches() {
        let compiled = notebook_rule().compile(&names()).unwrap();
        assert!(compiled.matches(&[0.0, 254.0, 5.0]).unwrap());
        assert!(compiled.matches(&[0.0, 31.0, 0.0]).unwrap());
        assert!(!compiled.matches(&[0.0, 31.0, 0.5]).unwrap());
        // boundary goes to the <= side
        assert!(!compiled.matches(&[0.0, 61.0, 1.0]).unwrap());
    }

    #[test]
    fn test_features_and_conditions() {
        let rule = notebook_rule();
        let features: Vec<&str> = rule.features().into_iter().collect();
        assert_eq!(features, vec!["sinpkt", "sttl"]);
        assert_eq!(rule.condition_count(), 3);
    }

    #[test]
    fn test_compile_errors() {
        let err = Rule::le("nope", 1.0).compile(&names()).unwrap_err();
        assert!(matches!(err, TriageError::Schema(SchemaError::UnknownFeature(ref f)) if f == "nope"));

        let err = Rule::any(vec![]).compile(&names()).unwrap_err();
        assert!(matches!(err, TriageError::InvalidInput(_)));

        assert!(Rule::le("sttl", f64::NAN).validate().is_err());
    }

    #[test]
    fn test_width_checked() {
        let compiled = Rule::gt("sttl", 61.0).compile(&names()).unwrap();
        assert_eq!(
            compiled.matches(&[1.0, 2.0]),
            Err(SchemaError::DimensionMismatch { expected: 3, got: 2 })
        );
    }

    #[test]
    fn test_serde_round_trip_from_toml() {
        let text = r#"
type = "any"

[[rules]]
type = "condition"
feature = "sttl"
op = "greater_than"
threshold = 61.0
"#;
        let rule: Rule = toml::from_str(text).unwrap();
        assert_eq!(rule, Rule::any(vec![Rule::gt("sttl", 61.0)]));
    }
}
