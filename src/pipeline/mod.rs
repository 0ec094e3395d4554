//! Two-stage triage pipeline
//!
//! - `context` - encoded corpus, shared encoder and train/test split
//! - `confirm` - confirmation classifiers trained on the full training split
//! - `evaluate` - combined metrics over a fixed partition
//!
//! `TriagePipeline::run` chains them: the rule comes from configuration or
//! is extracted from the training split, partitions the test split once,
//! and every confirmation candidate is scored behind that same partition.

pub mod context;
pub mod confirm;
pub mod evaluate;

use tracing::info;

pub use context::PipelineContext;
pub use confirm::{ConfirmationClassifier, ConfirmationModel, ConfirmationSpec};
pub use evaluate::{
    CategoryDetection, Evaluator, ModelComparison, PipelineEvaluation, TriageStats,
};

use crate::analysis;
use crate::config::Config;
use crate::error::{Result, TriageError};
use crate::testing::report::{PipelineReport, RuleSource, RuleSummary};
use crate::triage::{Rule, TriageFilter};

/// Orchestrates rule resolution, partitioning, confirmation and analysis
pub struct TriagePipeline;

impl TriagePipeline {
    /// The configured rule if any, otherwise one extracted from the
    /// training split
    pub fn resolve_rule(ctx: &PipelineContext, config: &Config) -> Result<(Rule, RuleSummary)> {
        if let Some(rule) = &config.triage.rule {
            rule.validate()?;
            info!(rule = %rule, "using configured triage rule");
            let summary = RuleSummary {
                rule: rule.to_string(),
                source: RuleSource::Configured,
                features: rule.features().into_iter().map(String::from).collect(),
                cv_recall: None,
                best_params: None,
                candidates: Vec::new(),
                cleared_training_rows: None,
                cleared_training_attacks: None,
                tree: None,
            };
            return Ok((rule.clone(), summary));
        }

        let extracted = config.triage.extractor.extract(&ctx.train)?;
        let summary = RuleSummary {
            rule: extracted.rule.to_string(),
            source: RuleSource::Extracted,
            features: extracted.rule.features().into_iter().map(String::from).collect(),
            cv_recall: Some(extracted.search.best_score),
            best_params: Some(extracted.search.best_params.to_string()),
            candidates: extracted.search.scores.clone(),
            cleared_training_rows: Some(extracted.cleared_training_rows),
            cleared_training_attacks: Some(extracted.cleared_training_attacks),
            tree: Some(extracted.tree.export_text(&ctx.train.feature_names)),
        };
        Ok((extracted.rule, summary))
    }

    /// Train every configured confirmation candidate
    pub fn train_candidates(
        ctx: &PipelineContext,
        config: &Config,
    ) -> Result<Vec<ConfirmationClassifier>> {
        if config.confirmation.candidates.is_empty() {
            return Err(TriageError::invalid("no confirmation candidates configured"));
        }
        config
            .confirmation
            .candidates
            .iter()
            .map(|spec| spec.train(&ctx.train))
            .collect()
    }

    pub fn run(ctx: &PipelineContext, config: &Config) -> Result<PipelineReport> {
        let (rule, rule_summary) = Self::resolve_rule(ctx, config)?;
        let compiled = rule.compile(&ctx.test.feature_names)?;
        let partition = TriageFilter::partition(&compiled, &ctx.test.features)?;

        let classifiers = Self::train_candidates(ctx, config)?;
        let evaluator = Evaluator::new(&partition, &ctx.test)?;
        let comparison = evaluator.compare(&classifiers)?;

        let analysis = if config.analysis.enabled {
            // rank features with the first forest candidate when there is one
            let importances = config
                .confirmation
                .candidates
                .iter()
                .zip(&classifiers)
                .find(|(spec, _)| matches!(spec.model, ConfirmationModel::RandomForest(_)))
                .and_then(|(_, classifier)| classifier.model().feature_importances());
            Some(analysis::analyze(ctx, importances, &config.analysis)?)
        } else {
            None
        };

        info!(
            rule = %rule,
            filtered = ?comparison.triage.filtered_fraction,
            leaked = comparison.triage.leaked_attacks,
            best = ?comparison.best_recall,
            "pipeline run complete"
        );

        Ok(PipelineReport::new(
            ctx.seed,
            ctx.train.len(),
            ctx.test.len(),
            rule_summary,
            comparison,
            analysis,
            config.triage.extractor.min_recall,
        ))
    }
}
