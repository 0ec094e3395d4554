//! A single labeled flow observation.

use serde::{Deserialize, Serialize};

use super::schema::{AttackCategory, Label, Schema};
use crate::error::SchemaError;

/// Raw value of one field before encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Numeric(f64),
    Category(String),
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Numeric(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Category(v.to_string())
    }
}

/// One observation: a value per schema field plus both targets.
///
/// Values are stored positionally in schema order; `None` marks a field
/// that was absent from the source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub values: Vec<Option<RawValue>>,
    pub label: Label,
    pub attack_cat: AttackCategory,
}

impl Record {
    /// Build a record from a field-name mapping.
    ///
    /// Fields the schema does not know are rejected; schema fields that are
    /// not supplied stay missing and fail later at encoding time.
    pub fn from_pairs<I, K, V>(
        schema: &Schema,
        pairs: I,
        label: Label,
        attack_cat: AttackCategory,
    ) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<RawValue>,
    {
        let mut values = vec![None; schema.len()];
        for (name, value) in pairs {
            let idx = schema
                .index_of(name.as_ref())
                .ok_or_else(|| SchemaError::UnknownFeature(name.as_ref().to_string()))?;
            values[idx] = Some(value.into());
        }
        Ok(Self {
            values,
            label,
            attack_cat,
        })
    }

    /// Value of a named field
    pub fn get<'a>(&'a self, schema: &Schema, name: &str) -> Option<&'a RawValue> {
        schema
            .index_of(name)
            .and_then(|i| self.values.get(i))
            .and_then(|v| v.as_ref())
    }
}
