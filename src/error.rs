use thiserror::Error;

use crate::dataset::{AttackCategory, Label};

/// Problems with the shape or content of the input records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("column '{0}' is missing from the corpus header")]
    MissingColumn(String),

    #[error("row {row}: field '{field}' has no value")]
    MissingValue { row: usize, field: String },

    #[error("row {row}: field '{field}' is not a number: '{value}'")]
    InvalidNumber {
        row: usize,
        field: String,
        value: String,
    },

    #[error("field '{field}': category '{value}' was not seen when the encoder was fitted")]
    UnseenCategory { field: String, value: String },

    #[error("unknown attack category '{0}'")]
    UnknownAttackCategory(String),

    #[error("invalid label '{0}' (expected 0 or 1)")]
    InvalidLabel(String),

    #[error("row {row}: label {label} disagrees with attack category {category}")]
    LabelMismatch {
        row: usize,
        label: Label,
        category: AttackCategory,
    },

    #[error("invalid vector dimension: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
}

/// Errors raised by the triage pipeline.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("no acceptable rule: {0}")]
    NoAcceptableRule(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TriageError {
    pub(crate) fn insufficient(msg: impl Into<String>) -> Self {
        TriageError::InsufficientData(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        TriageError::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;
