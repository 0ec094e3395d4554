//! Labeled flow corpus
//!
//! - `schema` - column layout, label and attack-category vocabularies
//! - `record` - a single observation
//! - `loader` - CSV loading
//! - `split` - train/test split and stratified folds

pub mod schema;
pub mod record;
pub mod loader;
pub mod split;

pub use schema::{AttackCategory, FieldKind, FieldSpec, Label, Schema};
pub use record::{RawValue, Record};
pub use loader::CorpusLoader;
pub use split::{stratified_folds, train_test_split, Fold, SplitIndices};
