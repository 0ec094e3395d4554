//! Second-stage confirmation classifiers

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::Label;
use crate::error::Result;
use crate::features::{LabeledBatch, Matrix};
use crate::ml::{BoostParams, Classifier, ForestParams, Learner};

/// Model family and hyperparameters of a confirmation candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfirmationModel {
    RandomForest(ForestParams),
    GradientBoosting(BoostParams),
}

impl ConfirmationModel {
    fn fit(&self, x: &Matrix, y: &[usize]) -> Result<Box<dyn Classifier>> {
        Ok(match self {
            ConfirmationModel::RandomForest(p) => Box::new(p.fit(x, y, 2)?),
            ConfirmationModel::GradientBoosting(p) => Box::new(p.fit(x, y, 2)?),
        })
    }

    pub fn seed_mut(&mut self) -> &mut u64 {
        match self {
            ConfirmationModel::RandomForest(p) => &mut p.seed,
            ConfirmationModel::GradientBoosting(p) => &mut p.seed,
        }
    }
}

/// A named confirmation candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationSpec {
    pub name: String,
    pub model: ConfirmationModel,
}

impl ConfirmationSpec {
    pub fn new(name: impl Into<String>, model: ConfirmationModel) -> Self {
        Self {
            name: name.into(),
            model,
        }
    }

    /// The three candidates compared in the UNSW-NB15 analysis
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "Random Forest Model",
                ConfirmationModel::RandomForest(ForestParams::default()),
            ),
            Self::new(
                "XGBoost Classifier",
                ConfirmationModel::GradientBoosting(BoostParams::xgboost_like()),
            ),
            Self::new(
                "Light GBM Classifier",
                ConfirmationModel::GradientBoosting(BoostParams::lightgbm_like()),
            ),
        ]
    }

    /// Train on the whole training split, not only rows the rule would
    /// send to review
    pub fn train(&self, train: &LabeledBatch) -> Result<ConfirmationClassifier> {
        let model = self.model.fit(&train.features, &train.label_indices())?;
        info!(model = %self.name, rows = train.len(), "confirmation classifier trained");
        Ok(ConfirmationClassifier::new(self.name.clone(), model))
    }
}

/// A trained attack/benign classifier used on needs-review rows
pub struct ConfirmationClassifier {
    name: String,
    model: Box<dyn Classifier>,
}

impl ConfirmationClassifier {
    pub fn new(name: impl Into<String>, model: Box<dyn Classifier>) -> Self {
        Self {
            name: name.into(),
            model,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &dyn Classifier {
        self.model.as_ref()
    }

    /// Predicted label of every row
    pub fn score(&self, rows: &Matrix) -> Result<Vec<Label>> {
        Ok(self
            .model
            .predict(rows)?
            .into_iter()
            .map(Label::from_index)
            .collect())
    }
}

impl fmt::Debug for ConfirmationClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationClassifier")
            .field("name", &self.name)
            .field("model", &self.model.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::AttackCategory;

    fn batch() -> LabeledBatch {
        let rows: Vec<Vec<f64>> = (0..120)
            .map(|i| vec![if i % 4 == 0 { 254.0 } else { 31.0 }, (i % 9) as f64])
            .collect();
        let labels: Vec<Label> = (0..120)
            .map(|i| if i % 4 == 0 { Label::Attack } else { Label::Benign })
            .collect();
        let categories = labels
            .iter()
            .map(|l| if l.is_attack() { AttackCategory::Generic } else { AttackCategory::Normal })
            .collect();
        LabeledBatch::new(
            vec!["sttl".to_string(), "smean".to_string()].into(),
            Matrix::from_rows(&rows).unwrap(),
            labels,
            categories,
        )
        .unwrap()
    }

    #[test]
    fn test_default_candidates_train_and_score() {
        let data = batch();
        for spec in ConfirmationSpec::defaults() {
            let spec = match spec.model {
                ConfirmationModel::RandomForest(p) => ConfirmationSpec::new(
                    spec.name,
                    ConfirmationModel::RandomForest(ForestParams { n_estimators: 25, ..p }),
                ),
                ConfirmationModel::GradientBoosting(p) => ConfirmationSpec::new(
                    spec.name,
                    ConfirmationModel::GradientBoosting(BoostParams { n_rounds: 10, ..p }),
                ),
            };
            let classifier = spec.train(&data).unwrap();
            let labels = classifier.score(&data.features).unwrap();
            assert_eq!(labels, data.labels, "{}", classifier.name());
        }
    }

    #[test]
    fn test_model_from_toml() {
        let text = r#"
name = "Light GBM Classifier"

[model]
kind = "gradient_boosting"
n_rounds = 50
learning_rate = 0.1

[model.growth]
kind = "leaf_wise"
num_leaves = 31
"#;
        let spec: ConfirmationSpec = toml::from_str(text).unwrap();
        match spec.model {
            ConfirmationModel::GradientBoosting(p) => {
                assert_eq!(p.n_rounds, 50);
                assert_eq!(p.growth, crate::ml::Growth::LeafWise { num_leaves: 31, max_depth: None });
            }
            other => panic!("unexpected model {:?}", other),
        }
    }
}
