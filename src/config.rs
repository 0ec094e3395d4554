use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ml::{ForestParams, MaxFeatures, TreeParams};
use crate::pipeline::ConfirmationSpec;
use crate::testing::report::ReportFormat;
use crate::triage::{Rule, RuleExtractor};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub triage: TriageConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        // general.seed governs every model
        config.apply_seed(config.general.seed);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Use one seed for the split, the grid and every model
    pub fn apply_seed(&mut self, seed: u64) {
        self.general.seed = seed;
        self.triage.extractor.grid.seed = seed;
        for candidate in &mut self.confirmation.candidates {
            *candidate.model.seed_mut() = seed;
        }
        self.analysis.category_forest.seed = seed;
    }
}

/// Corpus and split settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Share of rows held out for evaluation
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,

    /// CSV files, concatenated in order
    #[serde(default)]
    pub data_paths: Vec<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            test_fraction: default_test_fraction(),
            data_paths: Vec::new(),
        }
    }
}

/// Triage stage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub extractor: RuleExtractor,

    /// Operator-supplied rule; skips extraction when set
    #[serde(default)]
    pub rule: Option<Rule>,
}

/// Confirmation candidates, compared in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "ConfirmationSpec::defaults")]
    pub candidates: Vec<ConfirmationSpec>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            candidates: ConfirmationSpec::defaults(),
        }
    }
}

/// Feature ranking and attack-family classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Features kept for the attack-family model
    #[serde(default = "default_top_features")]
    pub top_features: usize,

    #[serde(default = "default_category_forest")]
    pub category_forest: ForestParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_features: default_top_features(),
            category_forest: default_category_forest(),
        }
    }
}

/// Report output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub format: ReportFormat,

    /// Write the report here instead of stdout
    #[serde(default)]
    pub output: Option<PathBuf>,
}

fn default_seed() -> u64 {
    11
}

fn default_test_fraction() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_top_features() -> usize {
    10
}

fn default_category_forest() -> ForestParams {
    ForestParams {
        n_estimators: 100,
        tree: TreeParams {
            min_samples_split: 5,
            max_features: MaxFeatures::Sqrt,
            ..Default::default()
        },
        ..Default::default()
    }
}
