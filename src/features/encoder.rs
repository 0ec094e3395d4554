//! Record to feature-vector encoding
//!
//! Categorical fields are replaced by integer codes. The code tables are
//! built once over the whole corpus, in first-observed order, and then
//! frozen: the same `FeatureEncoder` (shared through an `Arc`) encodes the
//! training and the evaluation rows so codes never drift between splits.
//! Categories that were not in the fitting corpus are rejected rather than
//! mapped to a fallback code.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::matrix::{FeatureVector, LabeledBatch, Matrix};
use crate::dataset::{FieldKind, RawValue, Record, Schema};
use crate::error::{Result, SchemaError};

/// Frozen category → code table for one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCodes {
    field: String,
    codes: HashMap<String, u32>,
    order: Vec<String>,
}

impl CategoryCodes {
    fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            codes: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn observe(&mut self, value: &str) {
        if !self.codes.contains_key(value) {
            self.codes.insert(value.to_string(), self.order.len() as u32);
            self.order.push(value.to_string());
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Code of a category, if it was seen while fitting
    pub fn code(&self, value: &str) -> Option<u32> {
        self.codes.get(value).copied()
    }

    /// Category behind a code
    pub fn category(&self, code: u32) -> Option<&str> {
        self.order.get(code as usize).map(|s| s.as_str())
    }

    /// Number of distinct categories
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Encodes records of one schema into fixed-width vectors
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEncoder {
    schema: Arc<Schema>,
    /// Indexed like `schema.fields`; `Some` for categorical fields
    tables: Vec<Option<CategoryCodes>>,
    feature_names: Arc<[String]>,
}

impl FeatureEncoder {
    /// Build the code tables from the full corpus
    pub fn fit(schema: Arc<Schema>, corpus: &[Record]) -> Result<Self> {
        let mut tables: Vec<Option<CategoryCodes>> = schema
            .fields
            .iter()
            .map(|f| match f.kind {
                FieldKind::Categorical => Some(CategoryCodes::new(&f.name)),
                FieldKind::Numeric => None,
            })
            .collect();

        for (row, record) in corpus.iter().enumerate() {
            for (idx, table) in tables.iter_mut().enumerate() {
                let Some(table) = table else { continue };
                match record.values.get(idx).and_then(|v| v.as_ref()) {
                    Some(RawValue::Category(value)) => table.observe(value),
                    // Numbers in a categorical column are treated as their text
                    Some(RawValue::Numeric(v)) => table.observe(&v.to_string()),
                    None => {
                        return Err(SchemaError::MissingValue {
                            row,
                            field: schema.fields[idx].name.clone(),
                        }
                        .into())
                    }
                }
            }
        }

        for table in tables.iter().flatten() {
            debug!(field = table.field(), categories = table.len(), "category codes frozen");
        }

        let feature_names: Arc<[String]> = schema.feature_names().into();
        Ok(Self {
            schema,
            tables,
            feature_names,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Width of every encoded vector
    pub fn dim(&self) -> usize {
        self.schema.len()
    }

    pub fn feature_names(&self) -> &Arc<[String]> {
        &self.feature_names
    }

    /// Code table of a categorical field
    pub fn codes(&self, field: &str) -> Option<&CategoryCodes> {
        self.schema
            .index_of(field)
            .and_then(|i| self.tables.get(i))
            .and_then(|t| t.as_ref())
    }

    /// Encode one record
    pub fn encode(&self, record: &Record) -> std::result::Result<FeatureVector, SchemaError> {
        self.encode_row(0, record).map(FeatureVector::new)
    }

    fn encode_row(&self, row: usize, record: &Record) -> std::result::Result<Vec<f64>, SchemaError> {
        if record.values.len() != self.dim() {
            return Err(SchemaError::DimensionMismatch {
                expected: self.dim(),
                got: record.values.len(),
            });
        }

        let mut out = Vec::with_capacity(self.dim());
        for (idx, value) in record.values.iter().enumerate() {
            let field = &self.schema.fields[idx].name;
            let value = value.as_ref().ok_or_else(|| SchemaError::MissingValue {
                row,
                field: field.clone(),
            })?;

            let encoded = match (&self.tables[idx], value) {
                (Some(table), RawValue::Category(s)) => lookup(table, s)?,
                (Some(table), RawValue::Numeric(v)) => lookup(table, &v.to_string())?,
                (None, RawValue::Numeric(v)) => finite(row, field, *v, || v.to_string())?,
                (None, RawValue::Category(s)) => {
                    let v = s.parse::<f64>().unwrap_or(f64::NAN);
                    finite(row, field, v, || s.clone())?
                }
            };
            out.push(encoded);
        }
        Ok(out)
    }

    /// Encode a batch of records with their targets
    pub fn encode_batch(&self, records: &[Record]) -> Result<LabeledBatch> {
        let mut features = Matrix::with_cols(self.dim());
        let mut labels = Vec::with_capacity(records.len());
        let mut categories = Vec::with_capacity(records.len());

        for (row, record) in records.iter().enumerate() {
            let encoded = self.encode_row(row, record)?;
            features.push_row(&encoded)?;
            labels.push(record.label);
            categories.push(record.attack_cat);
        }

        LabeledBatch::new(Arc::clone(&self.feature_names), features, labels, categories)
    }
}

fn finite(
    row: usize,
    field: &str,
    v: f64,
    shown: impl FnOnce() -> String,
) -> std::result::Result<f64, SchemaError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(SchemaError::InvalidNumber {
            row,
            field: field.to_string(),
            value: shown(),
        })
    }
}

fn lookup(table: &CategoryCodes, value: &str) -> std::result::Result<f64, SchemaError> {
    table
        .code(value)
        .map(|c| c as f64)
        .ok_or_else(|| SchemaError::UnseenCategory {
            field: table.field().to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{AttackCategory, FieldSpec, Label};
    use crate::error::TriageError;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            FieldSpec { name: "proto".into(), kind: FieldKind::Categorical },
            FieldSpec { name: "sttl".into(), kind: FieldKind::Numeric },
            FieldSpec { name: "state".into(), kind: FieldKind::Categorical },
        ]))
    }

    fn record(schema: &Schema, proto: &str, sttl: f64, state: &str) -> Record {
        Record::from_pairs(
            schema,
            vec![
                ("proto", RawValue::from(proto)),
                ("sttl", RawValue::from(sttl)),
                ("state", RawValue::from(state)),
            ],
            Label::Benign,
            AttackCategory::Normal,
        )
        .unwrap()
    }

    fn corpus(schema: &Schema) -> Vec<Record> {
        vec![
            record(schema, "udp", 254.0, "INT"),
            record(schema, "tcp", 31.0, "FIN"),
            record(schema, "udp", 62.0, "CON"),
            record(schema, "arp", 0.0, "INT"),
        ]
    }

    #[test]
    fn test_codes_in_first_observed_order() {
        let schema = schema();
        let encoder = FeatureEncoder::fit(Arc::clone(&schema), &corpus(&schema)).unwrap();

        let proto = encoder.codes("proto").unwrap();
        assert_eq!(proto.code("udp"), Some(0));
        assert_eq!(proto.code("tcp"), Some(1));
        assert_eq!(proto.code("arp"), Some(2));
        assert_eq!(proto.category(1), Some("tcp"));

        let state = encoder.codes("state").unwrap();
        assert_eq!(state.len(), 3);
        assert!(encoder.codes("sttl").is_none());
    }

    #[test]
    fn test_encoding_is_pure() {
        let schema = schema();
        let encoder = FeatureEncoder::fit(Arc::clone(&schema), &corpus(&schema)).unwrap();
        let r = record(&schema, "tcp", 31.0, "FIN");

        let a = encoder.encode(&r).unwrap();
        let b = encoder.encode(&r).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.values, vec![1.0, 31.0, 1.0]);
    }

    #[test]
    fn test_codes_stable_across_batches() {
        let schema = schema();
        let encoder = Arc::new(FeatureEncoder::fit(Arc::clone(&schema), &corpus(&schema)).unwrap());
        let training_view = Arc::clone(&encoder);
        let evaluation_view = Arc::clone(&encoder);

        let first = training_view
            .encode_batch(&[record(&schema, "arp", 1.0, "INT")])
            .unwrap();
        let second = evaluation_view
            .encode_batch(&[
                record(&schema, "tcp", 2.0, "CON"),
                record(&schema, "arp", 3.0, "INT"),
            ])
            .unwrap();

        assert_eq!(first.features.get(0, 0), second.features.get(1, 0));
        assert_eq!(first.features.get(0, 2), second.features.get(1, 2));
    }

    #[test]
    fn test_unseen_category_rejected() {
        let schema = schema();
        let encoder = FeatureEncoder::fit(Arc::clone(&schema), &corpus(&schema)).unwrap();
        let err = encoder.encode(&record(&schema, "sctp", 1.0, "INT")).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnseenCategory { field: "proto".into(), value: "sctp".into() }
        );
    }

    #[test]
    fn test_missing_value_rejected() {
        let schema = schema();
        let mut rows = corpus(&schema);
        rows[2].values[1] = None;

        let encoder = FeatureEncoder::fit(Arc::clone(&schema), &rows[..2]).unwrap();
        let err = encoder.encode_batch(&rows[..3]).unwrap_err();
        assert!(matches!(
            err,
            TriageError::Schema(SchemaError::MissingValue { row: 2, ref field }) if field == "sttl"
        ));

        rows[3].values[0] = None;
        assert!(FeatureEncoder::fit(Arc::clone(&schema), &rows).is_err());
    }

    #[test]
    fn test_wrong_width_rejected() {
        let schema = schema();
        let encoder = FeatureEncoder::fit(Arc::clone(&schema), &corpus(&schema)).unwrap();
        let mut r = record(&schema, "tcp", 1.0, "FIN");
        r.values.pop();
        assert!(matches!(
            encoder.encode(&r),
            Err(SchemaError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        let schema = schema();
        let encoder = FeatureEncoder::fit(Arc::clone(&schema), &corpus(&schema)).unwrap();

        let err = encoder.encode(&record(&schema, "tcp", f64::NAN, "FIN")).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidNumber { ref field, .. } if field == "sttl"));

        let rows = vec![
            record(&schema, "tcp", 31.0, "FIN"),
            record(&schema, "udp", f64::INFINITY, "INT"),
        ];
        let err = encoder.encode_batch(&rows).unwrap_err();
        assert!(matches!(
            err,
            TriageError::Schema(SchemaError::InvalidNumber { row: 1, ref value, .. }) if value == "inf"
        ));
    }
}
