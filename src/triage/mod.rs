//! First-stage triage
//!
//! - `rule` - typed boolean rules and their compiled form
//! - `extractor` - derive a rule from a recall-tuned decision tree
//! - `filter` - split a batch into auto-cleared and needs-review rows

pub mod rule;
pub mod extractor;
pub mod filter;

pub use rule::{CompiledRule, Op, Rule};
pub use extractor::{ExtractedRule, RuleExtractor};
pub use filter::{Partition, TriageFilter};
