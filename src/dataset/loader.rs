//! CSV corpus loading.
//!
//! Reads one or more header-led CSV files and concatenates their rows in
//! order. Columns are matched by header name, so extra columns (such as
//! `id`) are ignored and column order may differ between files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::record::{RawValue, Record};
use super::schema::{AttackCategory, FieldKind, Label, Schema};
use crate::error::{Result, SchemaError, TriageError};

/// Loads labeled flow records for a fixed schema
#[derive(Debug, Clone)]
pub struct CorpusLoader {
    schema: Arc<Schema>,
}

/// Column positions resolved from a header line
struct HeaderMap {
    fields: Vec<usize>,
    label: usize,
    category: usize,
    width: usize,
}

impl CorpusLoader {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Load and concatenate several CSV files
    pub fn load_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let file = File::open(path)?;
            let before = records.len();
            self.read_into(BufReader::new(file), &mut records)?;
            info!(path = %path.display(), rows = records.len() - before, "loaded corpus file");
        }
        Ok(records)
    }

    /// Load records from any buffered reader
    pub fn load_reader<R: BufRead>(&self, reader: R) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        self.read_into(reader, &mut records)?;
        Ok(records)
    }

    fn read_into<R: BufRead>(&self, reader: R, out: &mut Vec<Record>) -> Result<()> {
        let mut lines = reader.lines();

        let header = match lines.next() {
            Some(line) => line?,
            None => return Err(TriageError::insufficient("corpus file is empty")),
        };
        let columns = self.resolve_header(&header)?;

        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // Index of the record in the concatenated corpus
            let row = out.len();
            let cells = split_line(&line);
            if cells.len() < columns.width {
                debug!(row, cells = cells.len(), "short row");
            }
            out.push(self.parse_row(row, &cells, &columns)?);
        }
        Ok(())
    }

    fn resolve_header(&self, header: &str) -> Result<HeaderMap> {
        let names = split_line(header);
        let find = |name: &str| -> std::result::Result<usize, SchemaError> {
            names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| SchemaError::MissingColumn(name.to_string()))
        };

        let fields = self
            .schema
            .fields
            .iter()
            .map(|f| find(&f.name))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(HeaderMap {
            fields,
            label: find(&self.schema.label_column)?,
            category: find(&self.schema.category_column)?,
            width: names.len(),
        })
    }

    fn parse_row(&self, row: usize, cells: &[String], columns: &HeaderMap) -> Result<Record> {
        let mut values = Vec::with_capacity(self.schema.len());

        for (spec, &col) in self.schema.fields.iter().zip(columns.fields.iter()) {
            let cell = cells.get(col).map(|c| c.as_str()).unwrap_or("");
            if cell.is_empty() {
                values.push(None);
                continue;
            }
            let value = match spec.kind {
                FieldKind::Categorical => RawValue::Category(cell.to_string()),
                FieldKind::Numeric => {
                    // `parse` accepts NaN and infinities
                    let v = cell
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| SchemaError::InvalidNumber {
                            row,
                            field: spec.name.clone(),
                            value: cell.to_string(),
                        })?;
                    RawValue::Numeric(v)
                }
            };
            values.push(Some(value));
        }

        let label: Label = required(cells, columns.label, row, &self.schema.label_column)?.parse()?;
        let attack_cat: AttackCategory =
            required(cells, columns.category, row, &self.schema.category_column)?.parse()?;
        if label.is_attack() == (attack_cat == AttackCategory::Normal) {
            return Err(SchemaError::LabelMismatch {
                row,
                label,
                category: attack_cat,
            }
            .into());
        }

        Ok(Record {
            values,
            label,
            attack_cat,
        })
    }
}

/// Non-empty cell of a target column
fn required<'a>(
    cells: &'a [String],
    col: usize,
    row: usize,
    field: &str,
) -> std::result::Result<&'a str, SchemaError> {
    match cells.get(col).map(|c| c.as_str()) {
        Some(cell) if !cell.is_empty() => Ok(cell),
        _ => Err(SchemaError::MissingValue {
            row,
            field: field.to_string(),
        }),
    }
}

/// Split a CSV line, honouring double-quoted cells
fn split_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in line.trim_end_matches('\r').chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::schema::FieldSpec;
    use std::io::{Cursor, Write};

    fn tiny_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            FieldSpec { name: "proto".into(), kind: FieldKind::Categorical },
            FieldSpec { name: "sttl".into(), kind: FieldKind::Numeric },
            FieldSpec { name: "sinpkt".into(), kind: FieldKind::Numeric },
        ]))
    }

    #[test]
    fn test_split_line_quotes() {
        assert_eq!(split_line("a,\"b,c\", d"), vec!["a", "b,c", "d"]);
        assert_eq!(split_line("1,2,\r"), vec!["1", "2", ""]);
    }

    #[test]
    fn test_load_by_header_name() {
        let csv = "id,sinpkt,proto,sttl,attack_cat,label\n\
                   1,0.5,tcp,31,Normal,0\n\
                   2,0.0,udp,254,Generic,1\n";
        let loader = CorpusLoader::new(tiny_schema());
        let records = loader.load_reader(Cursor::new(csv)).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].values[0], Some(RawValue::Category("tcp".into())));
        assert_eq!(records[0].values[1], Some(RawValue::Numeric(31.0)));
        assert_eq!(records[1].label, Label::Attack);
        assert_eq!(records[1].attack_cat, AttackCategory::Generic);
    }

    #[test]
    fn test_missing_column() {
        let csv = "proto,sttl,attack_cat,label\ntcp,31,Normal,0\n";
        let loader = CorpusLoader::new(tiny_schema());
        let err = loader.load_reader(Cursor::new(csv)).unwrap_err();
        assert!(matches!(
            err,
            TriageError::Schema(SchemaError::MissingColumn(ref c)) if c == "sinpkt"
        ));
    }

    #[test]
    fn test_invalid_number() {
        let csv = "proto,sttl,sinpkt,attack_cat,label\ntcp,abc,0,Normal,0\n";
        let loader = CorpusLoader::new(tiny_schema());
        let err = loader.load_reader(Cursor::new(csv)).unwrap_err();
        assert!(matches!(err, TriageError::Schema(SchemaError::InvalidNumber { row: 0, .. })));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        let loader = CorpusLoader::new(tiny_schema());
        for cell in ["NaN", "inf", "-infinity"] {
            let csv = format!("proto,sttl,sinpkt,attack_cat,label\ntcp,{},0,Normal,0\n", cell);
            let err = loader.load_reader(Cursor::new(csv)).unwrap_err();
            assert!(matches!(
                err,
                TriageError::Schema(SchemaError::InvalidNumber { ref field, ref value, .. })
                    if field == "sttl" && value == cell
            ));
        }
    }

    #[test]
    fn test_missing_attack_category() {
        let csv = "proto,sttl,sinpkt,attack_cat,label\ntcp,31,0,,1\n";
        let loader = CorpusLoader::new(tiny_schema());
        let err = loader.load_reader(Cursor::new(csv)).unwrap_err();
        assert!(matches!(
            err,
            TriageError::Schema(SchemaError::MissingValue { row: 0, ref field }) if field == "attack_cat"
        ));
    }

    #[test]
    fn test_label_and_category_must_agree() {
        let loader = CorpusLoader::new(tiny_schema());

        let csv = "proto,sttl,sinpkt,attack_cat,label\ntcp,31,0,Normal,1\n";
        let err = loader.load_reader(Cursor::new(csv)).unwrap_err();
        assert!(matches!(
            err,
            TriageError::Schema(SchemaError::LabelMismatch {
                label: Label::Attack,
                category: AttackCategory::Normal,
                ..
            })
        ));

        let csv = "proto,sttl,sinpkt,attack_cat,label\ntcp,31,0,Exploits,0\n";
        let err = loader.load_reader(Cursor::new(csv)).unwrap_err();
        assert!(matches!(
            err,
            TriageError::Schema(SchemaError::LabelMismatch { label: Label::Benign, .. })
        ));
    }

    #[test]
    fn test_row_numbers_skip_blank_lines() {
        let csv = "proto,sttl,sinpkt,attack_cat,label\n\ntcp,31,0,Normal,0\n\n\ntcp,abc,0,Normal,0\n";
        let loader = CorpusLoader::new(tiny_schema());
        let err = loader.load_reader(Cursor::new(csv)).unwrap_err();
        assert!(matches!(err, TriageError::Schema(SchemaError::InvalidNumber { row: 1, .. })));
    }

    #[test]
    fn test_empty_cell_is_missing() {
        let csv = "proto,sttl,sinpkt,attack_cat,label\n,31,0,Normal,0\n";
        let loader = CorpusLoader::new(tiny_schema());
        let records = loader.load_reader(Cursor::new(csv)).unwrap();
        assert_eq!(records[0].values[0], None);
    }

    #[test]
    fn test_concatenates_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("train.csv");
        let b = dir.path().join("test.csv");
        let header = "proto,sttl,sinpkt,attack_cat,label\n";

        let mut f = File::create(&a).unwrap();
        write!(f, "{}tcp,31,0,Normal,0\ntcp,31,1,Normal,0\n", header).unwrap();
        let mut f = File::create(&b).unwrap();
        write!(f, "{}udp,254,0,Exploits,1\n", header).unwrap();

        let loader = CorpusLoader::new(tiny_schema());
        let records = loader.load_files(&[a, b]).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].attack_cat, AttackCategory::Exploits);
    }
}
