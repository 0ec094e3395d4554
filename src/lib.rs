//! Two-stage network traffic triage
//!
//! A shallow, recall-tuned decision tree yields an interpretable rule that
//! auto-clears obviously benign flows; a higher-capacity ensemble scores
//! only the remainder. The crate covers the whole path on UNSW-NB15 style
//! corpora: loading, encoding, rule extraction, partitioning, confirmation
//! and evaluation.
//!
//! ```ignore
//! use std::sync::Arc;
//! use flowtriage::{Config, PipelineContext, Schema, TriagePipeline};
//!
//! let config = Config::default();
//! let ctx = PipelineContext::load(Arc::new(Schema::unsw_nb15()), &["train.csv"], 0.3, 11)?;
//! let report = TriagePipeline::run(&ctx, &config)?;
//! println!("{}", report.to_text());
//! ```

pub mod analysis;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod ml;
pub mod pipeline;
pub mod testing;
pub mod triage;

pub use config::Config;
pub use dataset::{AttackCategory, CorpusLoader, Label, Record, Schema};
pub use error::{Result, SchemaError, TriageError};
pub use features::{FeatureEncoder, LabeledBatch, Matrix};
pub use pipeline::{
    ConfirmationClassifier, ConfirmationSpec, Evaluator, ModelComparison, PipelineContext,
    PipelineEvaluation, TriagePipeline,
};
pub use testing::report::{PipelineReport, ReportFormat};
pub use triage::{CompiledRule, Partition, Rule, RuleExtractor, TriageFilter};
