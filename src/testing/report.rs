//! Pipeline report generation
//!
//! Supports multiple output formats: JSON, Markdown and text.

use std::fmt::{self, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisReport;
use crate::ml::CandidateScore;
use crate::pipeline::ModelComparison;

/// Report output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

/// Where the triage rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Extracted,
    Configured,
}

/// The triage rule and the search that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub rule: String,
    pub source: RuleSource,
    pub features: Vec<String>,
    /// Cross-validated recall of the winning tree
    pub cv_recall: Option<f64>,
    pub best_params: Option<String>,
    /// Every grid candidate, in grid order
    pub candidates: Vec<CandidateScore>,
    pub cleared_training_rows: Option<usize>,
    pub cleared_training_attacks: Option<usize>,
    /// Winning tree as text
    pub tree: Option<String>,
}

/// Recommendation for improving the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Priority level
    pub priority: String,
    /// Category (triage, accuracy, efficiency)
    pub category: String,
    /// Description of the issue
    pub description: String,
    /// Suggested action
    pub action: String,
}

/// Complete pipeline report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Report generation timestamp
    pub timestamp: DateTime<Utc>,
    pub seed: u64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub rule: RuleSummary,
    /// Confirmation candidates on the held-out split
    pub comparison: ModelComparison,
    pub analysis: Option<AnalysisReport>,
    pub recommendations: Vec<Recommendation>,
}

impl PipelineReport {
    /// Assemble a report; `min_recall` is the floor the pipeline is
    /// expected to meet
    pub fn new(
        seed: u64,
        train_rows: usize,
        test_rows: usize,
        rule: RuleSummary,
        comparison: ModelComparison,
        analysis: Option<AnalysisReport>,
        min_recall: f64,
    ) -> Self {
        let mut recommendations = Vec::new();
        let triage = &comparison.triage;

        if triage.leaked_attacks > 0 {
            recommendations.push(Recommendation {
                priority: "High".to_string(),
                category: "Triage".to_string(),
                description: format!(
                    "{} attacks on the held-out split were auto-cleared by the rule",
                    triage.leaked_attacks
                ),
                action: "Tighten the rule or raise min_leaf_purity".to_string(),
            });
        }

        if rule.source == RuleSource::Configured && rule.cv_recall.is_none() {
            recommendations.push(Recommendation {
                priority: "Low".to_string(),
                category: "Triage".to_string(),
                description: "Configured rule was not checked against a recall floor".to_string(),
                action: "Compare it with an extracted rule before deployment".to_string(),
            });
        }

        let best = comparison
            .best_recall
            .as_ref()
            .and_then(|name| comparison.models.get(name))
            .and_then(|m| m.recall);
        if let Some(recall) = best {
            if recall < min_recall {
                recommendations.push(Recommendation {
                    priority: "High".to_string(),
                    category: "Accuracy".to_string(),
                    description: format!(
                        "Best pipeline recall {:.1}% is below the {:.1}% floor",
                        recall * 100.0,
                        min_recall * 100.0
                    ),
                    action: "Review missed attack families and retune the confirmation models"
                        .to_string(),
                });
            }
        }

        if let Some(fraction) = triage.filtered_fraction {
            if fraction < 0.1 {
                recommendations.push(Recommendation {
                    priority: "Low".to_string(),
                    category: "Efficiency".to_string(),
                    description: format!("Rule auto-clears only {:.1}% of traffic", fraction * 100.0),
                    action: "Allow deeper trees in the rule search".to_string(),
                });
            }
        }

        Self {
            timestamp: Utc::now(),
            seed,
            train_rows,
            test_rows,
            rule,
            comparison,
            analysis,
            recommendations,
        }
    }

    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Json => self.to_json(),
            ReportFormat::Markdown => self.to_markdown(),
            ReportFormat::Text => self.to_text(),
        }
    }

    /// Format as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Format as Markdown
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        self.write_markdown(&mut md).map(|()| md).unwrap_or_default()
    }

    /// Format as plain text
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        self.write_text(&mut text).map(|()| text).unwrap_or_default()
    }

    fn write_markdown(&self, md: &mut String) -> fmt::Result {
        writeln!(md, "# Traffic Triage Report")?;
        writeln!(md, "Generated: {}\n", self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(md, "Seed {}, {} training rows, {} test rows\n", self.seed, self.train_rows, self.test_rows)?;

        writeln!(md, "## Triage Rule\n")?;
        writeln!(md, "`{}`\n", self.rule.rule)?;
        writeln!(md, "| Metric | Value |")?;
        writeln!(md, "|--------|-------|")?;
        writeln!(md, "| Source | {:?} |", self.rule.source)?;
        writeln!(md, "| Features | {} |", self.rule.features.join(", "))?;
        if let Some(params) = &self.rule.best_params {
            writeln!(md, "| Winning tree | {} |", params)?;
        }
        writeln!(md, "| CV recall | {} |", pct(self.rule.cv_recall))?;
        if let (Some(rows), Some(attacks)) = (self.rule.cleared_training_rows, self.rule.cleared_training_attacks) {
            writeln!(md, "| Cleared training rows | {} ({} attacks) |", rows, attacks)?;
        }
        writeln!(md)?;

        if !self.rule.candidates.is_empty() {
            writeln!(md, "### Grid Search\n")?;
            writeln!(md, "| Candidate | Mean recall | Std |")?;
            writeln!(md, "|-----------|-------------|-----|")?;
            for c in &self.rule.candidates {
                writeln!(md, "| {} | {:.4} | {:.4} |", c.params, c.mean_score, c.std_score)?;
            }
            writeln!(md)?;
        }

        let triage = &self.comparison.triage;
        writeln!(md, "## Triage Efficiency\n")?;
        writeln!(md, "| Metric | Value |")?;
        writeln!(md, "|--------|-------|")?;
        writeln!(md, "| Total | {} |", triage.total)?;
        writeln!(md, "| Auto-cleared | {} |", triage.auto_cleared)?;
        writeln!(md, "| Needs review | {} |", triage.needs_review)?;
        writeln!(md, "| Filtered traffic | {} |", pct(triage.filtered_fraction))?;
        writeln!(md, "| Attacks leaked | {} |", triage.leaked_attacks)?;
        writeln!(md)?;

        writeln!(md, "## Confirmation Models\n")?;
        writeln!(md, "| Model | Recall | Precision | Accuracy | FPR | F1 | Review recall |")?;
        writeln!(md, "|-------|--------|-----------|----------|-----|----|---------------|")?;
        for e in &self.comparison.evaluations {
            writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} | {} |",
                e.model,
                pct(e.overall.recall),
                pct(e.overall.precision),
                pct(e.overall.accuracy),
                pct(e.overall.false_positive_rate),
                ratio(e.overall.f1),
                pct(e.review.recall)
            )?;
        }
        if let Some(best) = &self.comparison.best_recall {
            writeln!(md, "\nBest recall: **{}**", best)?;
        }
        writeln!(md)?;

        if let Some(best) = self.best_evaluation() {
            writeln!(md, "### Detection by Attack Family ({})\n", best.model)?;
            writeln!(md, "| Family | Rows | Auto-cleared | Flagged |")?;
            writeln!(md, "|--------|------|--------------|---------|")?;
            for c in &best.categories {
                writeln!(md, "| {} | {} | {} | {} |", c.category, c.total, c.auto_cleared, c.flagged)?;
            }
            writeln!(md)?;
        }

        if let Some(analysis) = &self.analysis {
            writeln!(md, "## Analysis\n")?;
            writeln!(md, "### Attack Families\n")?;
            writeln!(md, "| Family | Count | Share |")?;
            writeln!(md, "|--------|-------|-------|")?;
            for s in &analysis.distribution {
                writeln!(md, "| {} | {} | {:.1}% |", s.category, s.count, s.share * 100.0)?;
            }
            writeln!(md)?;

            writeln!(md, "### Feature Importance\n")?;
            writeln!(md, "| Feature | Importance |")?;
            writeln!(md, "|---------|------------|")?;
            for f in analysis.importances.iter().take(10) {
                writeln!(md, "| {} | {:.4} |", f.feature, f.importance)?;
            }
            writeln!(md)?;

            if let Some(model) = &analysis.category_model {
                writeln!(md, "### Attack Family Classifier\n")?;
                writeln!(md, "Features: {}\n", model.features.join(", "))?;
                writeln!(md, "| Family | Precision | Recall | F1 | Support |")?;
                writeln!(md, "|--------|-----------|--------|----|---------|")?;
                for c in &model.report.classes {
                    writeln!(
                        md,
                        "| {} | {} | {} | {} | {} |",
                        c.label,
                        ratio(c.precision),
                        ratio(c.recall),
                        ratio(c.f1),
                        c.support
                    )?;
                }
                writeln!(md, "\nAccuracy: {}\n", pct(model.report.accuracy))?;
            }
        }

        if !self.recommendations.is_empty() {
            writeln!(md, "## Recommendations\n")?;
            for rec in &self.recommendations {
                writeln!(md, "### [{}] {}\n", rec.priority, rec.category)?;
                writeln!(md, "**Issue:** {}\n", rec.description)?;
                writeln!(md, "**Action:** {}\n", rec.action)?;
            }
        }

        Ok(())
    }

    fn write_text(&self, text: &mut String) -> fmt::Result {
        writeln!(text, "═══════════════════════════════════════════════════════════════")?;
        writeln!(text, "                    TRAFFIC TRIAGE REPORT")?;
        writeln!(text, "═══════════════════════════════════════════════════════════════")?;
        writeln!(text, "Generated: {}", self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(text, "Seed: {}  Train: {}  Test: {}\n", self.seed, self.train_rows, self.test_rows)?;

        writeln!(text, "TRIAGE RULE")?;
        writeln!(text, "───────────────────────────────────────────────────────────────")?;
        writeln!(text, "  Rule:        {}", self.rule.rule)?;
        writeln!(text, "  Source:      {:?}", self.rule.source)?;
        if let Some(params) = &self.rule.best_params {
            writeln!(text, "  Tree:        {}", params)?;
        }
        writeln!(text, "  CV recall:   {}", pct(self.rule.cv_recall))?;
        if let (Some(rows), Some(attacks)) = (self.rule.cleared_training_rows, self.rule.cleared_training_attacks) {
            writeln!(text, "  Train clear: {} rows, {} attacks", rows, attacks)?;
        }
        writeln!(text)?;

        let triage = &self.comparison.triage;
        writeln!(text, "TRIAGE EFFICIENCY")?;
        writeln!(text, "───────────────────────────────────────────────────────────────")?;
        writeln!(text, "  Auto-cleared:  {} / {}", triage.auto_cleared, triage.total)?;
        writeln!(text, "  Needs review:  {}", triage.needs_review)?;
        writeln!(text, "  Filtered:      {}", pct(triage.filtered_fraction))?;
        writeln!(text, "  Leaked:        {} attacks", triage.leaked_attacks)?;
        writeln!(text)?;

        writeln!(text, "CONFIRMATION MODELS")?;
        writeln!(text, "───────────────────────────────────────────────────────────────")?;
        for e in &self.comparison.evaluations {
            let marker = if self.comparison.best_recall.as_deref() == Some(e.model.as_str()) {
                "*"
            } else {
                " "
            };
            writeln!(
                text,
                " {}{:<24} recall={} precision={} accuracy={} fpr={}",
                marker,
                e.model,
                pct(e.overall.recall),
                pct(e.overall.precision),
                pct(e.overall.accuracy),
                pct(e.overall.false_positive_rate)
            )?;
        }
        writeln!(text)?;

        if let Some(analysis) = &self.analysis {
            writeln!(text, "TOP FEATURES")?;
            writeln!(text, "───────────────────────────────────────────────────────────────")?;
            for f in analysis.importances.iter().take(10) {
                writeln!(text, "  {:<20} {:.4}", f.feature, f.importance)?;
            }
            if let Some(model) = &analysis.category_model {
                writeln!(text, "\n  Attack family accuracy: {}", pct(model.report.accuracy))?;
            }
            writeln!(text)?;
        }

        for rec in &self.recommendations {
            writeln!(text, "[{}] {}: {}", rec.priority, rec.category, rec.description)?;
        }

        Ok(())
    }

    fn best_evaluation(&self) -> Option<&crate::pipeline::PipelineEvaluation> {
        let best = self.comparison.best_recall.as_ref()?;
        self.comparison.evaluations.iter().find(|e| &e.model == best)
    }
}

/// Percentage with one decimal, `n/a` when undefined
pub fn pct(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.1}%", v * 100.0))
}

fn ratio(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.3}", v))
}
