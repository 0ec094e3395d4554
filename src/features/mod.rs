//! Feature encoding
//!
//! Turns loaded records into fixed-width numeric rows. The encoder's
//! category tables are the only state shared between the training and the
//! evaluation paths.

pub mod matrix;
pub mod encoder;

pub use matrix::{FeatureVector, LabeledBatch, Matrix};
pub use encoder::{CategoryCodes, FeatureEncoder};
