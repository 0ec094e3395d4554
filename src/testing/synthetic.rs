//! Synthetic UNSW-NB15-like corpus generation
//!
//! Produces labeled records for any schema, keyed on field names so the
//! UNSW-NB15 columns get plausible values. Benign flows carry the low
//! source TTLs (29/31) seen in the real data and attacks the high ones
//! (62/254), so `sttl` alone separates the classes while the remaining
//! numeric columns overlap and shift with the attack family.

use std::io::Write;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dataset::{AttackCategory, FieldKind, Label, RawValue, Record, Schema};
use crate::error::Result;

/// Generator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Number of records
    pub rows: usize,
    /// Probability that a record is an attack
    pub attack_ratio: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            rows: 1000,
            attack_ratio: 0.4,
            seed: 11,
        }
    }
}

/// Seeded record generator
pub struct CorpusGenerator {
    config: SyntheticConfig,
}

impl CorpusGenerator {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    pub fn generate(&self, schema: &Schema) -> Result<Vec<Record>> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut records = Vec::with_capacity(self.config.rows);

        for _ in 0..self.config.rows {
            let (label, category) = if rng.random::<f64>() < self.config.attack_ratio {
                let idx = rng.random_range(1..AttackCategory::ALL.len());
                (Label::Attack, AttackCategory::from_index(idx))
            } else {
                (Label::Benign, AttackCategory::Normal)
            };

            let mut pairs: Vec<(String, RawValue)> = Vec::with_capacity(schema.len());
            for (idx, field) in schema.fields.iter().enumerate() {
                let value = match field.kind {
                    FieldKind::Categorical => {
                        RawValue::Category(pick_category(&field.name, label, &mut rng).to_string())
                    }
                    FieldKind::Numeric => {
                        RawValue::Numeric(numeric_value(&field.name, idx, category, &mut rng))
                    }
                };
                pairs.push((field.name.clone(), value));
            }
            records.push(Record::from_pairs(schema, pairs, label, category)?);
        }
        Ok(records)
    }
}

fn pick_category(field: &str, label: Label, rng: &mut StdRng) -> &'static str {
    let choices: &[&'static str] = match (field, label) {
        ("proto", Label::Benign) => &["tcp", "udp"],
        ("proto", Label::Attack) => &["tcp", "udp", "unas"],
        ("service", _) => &["-", "http", "dns", "ftp"],
        ("state", Label::Benign) => &["FIN", "CON"],
        ("state", Label::Attack) => &["INT", "FIN"],
        _ => &["a", "b"],
    };
    choices[rng.random_range(0..choices.len())]
}

fn numeric_value(field: &str, idx: usize, category: AttackCategory, rng: &mut StdRng) -> f64 {
    match field {
        "sttl" => {
            let choices: [f64; 2] = if category == AttackCategory::Normal {
                [31.0, 29.0]
            } else {
                [254.0, 62.0]
            };
            choices[rng.random_range(0..2)]
        }
        "dttl" => {
            let choices: [f64; 3] = [0.0, 29.0, 252.0];
            choices[rng.random_range(0..3)]
        }
        _ => {
            // overlapping ranges, shifted by attack family
            let scale = 1.0 + (idx % 7) as f64;
            let shift = category.index() as f64 * 1.5;
            ((rng.random::<f64>() * 10.0 + shift) * scale * 1000.0).round() / 1000.0
        }
    }
}

/// Write records as a UNSW-NB15 style CSV (`id`, features, `attack_cat`, `label`)
pub fn write_csv<W: Write>(schema: &Schema, records: &[Record], mut out: W) -> Result<()> {
    let mut header = vec!["id".to_string()];
    header.extend(schema.feature_names());
    header.push(schema.category_column.clone());
    header.push(schema.label_column.clone());
    writeln!(out, "{}", header.join(","))?;

    for (i, record) in records.iter().enumerate() {
        let mut line = vec![(i + 1).to_string()];
        for value in &record.values {
            line.push(match value {
                Some(RawValue::Numeric(v)) => v.to_string(),
                Some(RawValue::Category(s)) => s.clone(),
                None => String::new(),
            });
        }
        line.push(record.attack_cat.to_string());
        line.push(record.label.index().to_string());
        writeln!(out, "{}", line.join(","))?;
    }
    Ok(())
}
