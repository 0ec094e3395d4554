//! Column layout of the labeled flow corpus.
//!
//! The default schema follows the UNSW-NB15 training/testing CSV files:
//! 42 flow features (three of them categorical), the binary `label`
//! column and the `attack_cat` family column. The `id` column is ignored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Kind of value a feature column carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Continuous or count-valued number
    Numeric,
    /// String drawn from a fixed vocabulary
    Categorical,
}

/// One feature column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

/// Binary ground truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Benign = 0,
    Attack = 1,
}

impl Label {
    /// Class index used by the classifiers
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Self {
        if idx == 0 {
            Label::Benign
        } else {
            Label::Attack
        }
    }

    pub fn is_attack(self) -> bool {
        self == Label::Attack
    }
}

impl FromStr for Label {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" | "0.0" => Ok(Label::Benign),
            "1" | "1.0" => Ok(Label::Attack),
            other => Err(SchemaError::InvalidLabel(other.to_string())),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Benign => write!(f, "benign"),
            Label::Attack => write!(f, "attack"),
        }
    }
}

/// Attack family of a record (`Normal` for benign traffic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttackCategory {
    Normal,
    Fuzzers,
    Analysis,
    Backdoor,
    DoS,
    Exploits,
    Generic,
    Reconnaissance,
    Shellcode,
    Worms,
}

impl AttackCategory {
    pub const ALL: [AttackCategory; 10] = [
        AttackCategory::Normal,
        AttackCategory::Fuzzers,
        AttackCategory::Analysis,
        AttackCategory::Backdoor,
        AttackCategory::DoS,
        AttackCategory::Exploits,
        AttackCategory::Generic,
        AttackCategory::Reconnaissance,
        AttackCategory::Shellcode,
        AttackCategory::Worms,
    ];

    /// Class index used by the attack-category classifier
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|c| *c == self).unwrap_or(0)
    }

    pub fn from_index(idx: usize) -> Self {
        Self::ALL.get(idx).copied().unwrap_or(AttackCategory::Normal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttackCategory::Normal => "Normal",
            AttackCategory::Fuzzers => "Fuzzers",
            AttackCategory::Analysis => "Analysis",
            AttackCategory::Backdoor => "Backdoor",
            AttackCategory::DoS => "DoS",
            AttackCategory::Exploits => "Exploits",
            AttackCategory::Generic => "Generic",
            AttackCategory::Reconnaissance => "Reconnaissance",
            AttackCategory::Shellcode => "Shellcode",
            AttackCategory::Worms => "Worms",
        }
    }
}

impl FromStr for AttackCategory {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let category = match trimmed.to_ascii_lowercase().as_str() {
            "normal" => AttackCategory::Normal,
            "fuzzers" => AttackCategory::Fuzzers,
            "analysis" => AttackCategory::Analysis,
            "backdoor" | "backdoors" => AttackCategory::Backdoor,
            "dos" => AttackCategory::DoS,
            "exploits" => AttackCategory::Exploits,
            "generic" => AttackCategory::Generic,
            "reconnaissance" => AttackCategory::Reconnaissance,
            "shellcode" => AttackCategory::Shellcode,
            "worms" => AttackCategory::Worms,
            _ => return Err(SchemaError::UnknownAttackCategory(trimmed.to_string())),
        };
        Ok(category)
    }
}

impl fmt::Display for AttackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UNSW-NB15 feature columns in file order
const UNSW_NB15_FIELDS: [(&str, FieldKind); 42] = [
    ("dur", FieldKind::Numeric),
    ("proto", FieldKind::Categorical),
    ("service", FieldKind::Categorical),
    ("state", FieldKind::Categorical),
    ("spkts", FieldKind::Numeric),
    ("dpkts", FieldKind::Numeric),
    ("sbytes", FieldKind::Numeric),
    ("dbytes", FieldKind::Numeric),
    ("rate", FieldKind::Numeric),
    ("sttl", FieldKind::Numeric),
    ("dttl", FieldKind::Numeric),
    ("sload", FieldKind::Numeric),
    ("dload", FieldKind::Numeric),
    ("sloss", FieldKind::Numeric),
    ("dloss", FieldKind::Numeric),
    ("sinpkt", FieldKind::Numeric),
    ("dinpkt", FieldKind::Numeric),
    ("sjit", FieldKind::Numeric),
    ("djit", FieldKind::Numeric),
    ("swin", FieldKind::Numeric),
    ("stcpb", FieldKind::Numeric),
    ("dtcpb", FieldKind::Numeric),
    ("dwin", FieldKind::Numeric),
    ("tcprtt", FieldKind::Numeric),
    ("synack", FieldKind::Numeric),
    ("ackdat", FieldKind::Numeric),
    ("smean", FieldKind::Numeric),
    ("dmean", FieldKind::Numeric),
    ("trans_depth", FieldKind::Numeric),
    ("response_body_len", FieldKind::Numeric),
    ("ct_srv_src", FieldKind::Numeric),
    ("ct_state_ttl", FieldKind::Numeric),
    ("ct_dst_ltm", FieldKind::Numeric),
    ("ct_src_dport_ltm", FieldKind::Numeric),
    ("ct_dst_sport_ltm", FieldKind::Numeric),
    ("ct_dst_src_ltm", FieldKind::Numeric),
    ("is_ftp_login", FieldKind::Numeric),
    ("ct_ftp_cmd", FieldKind::Numeric),
    ("ct_flw_http_mthd", FieldKind::Numeric),
    ("ct_src_ltm", FieldKind::Numeric),
    ("ct_srv_dst", FieldKind::Numeric),
    ("is_sm_ips_ports", FieldKind::Numeric),
];

/// Feature columns plus the names of the two target columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldSpec>,
    pub label_column: String,
    pub category_column: String,
}

impl Schema {
    /// Build a schema from explicit fields
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            label_column: "label".to_string(),
            category_column: "attack_cat".to_string(),
        }
    }

    /// Schema of the UNSW-NB15 CSV release
    pub fn unsw_nb15() -> Self {
        Self::new(
            UNSW_NB15_FIELDS
                .iter()
                .map(|(name, kind)| FieldSpec {
                    name: name.to_string(),
                    kind: *kind,
                })
                .collect(),
        )
    }

    /// Number of feature columns
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a feature column
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Indices of the categorical columns
    pub fn categorical_indices(&self) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.kind == FieldKind::Categorical)
            .map(|(i, _)| i)
            .collect()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::unsw_nb15()
    }
}
