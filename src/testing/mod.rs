//! Evaluation and test support
//!
//! # Modules
//!
//! - `metrics` - binary and multi-class confusion matrices with derived metrics
//! - `report` - report generation (JSON, Markdown, text)
//! - `synthetic` - seeded UNSW-NB15-like corpus generation

pub mod metrics;
pub mod report;
pub mod synthetic;

// Re-export main types
pub use metrics::{
    AverageMetrics, BinaryConfusion, ClassMetrics, ClassificationReport, MetricSummary,
    MultiClassConfusion,
};
pub use report::{PipelineReport, Recommendation, ReportFormat, RuleSource, RuleSummary};
pub use synthetic::{write_csv, CorpusGenerator, SyntheticConfig};
