//! Immutable inputs shared by every pipeline stage

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::dataset::{train_test_split, CorpusLoader, Record, Schema};
use crate::error::Result;
use crate::features::{FeatureEncoder, LabeledBatch};

/// Encoded corpus, the encoder that produced it and the train/test split
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub schema: Arc<Schema>,
    /// Frozen category codes used for both splits
    pub encoder: Arc<FeatureEncoder>,
    pub train: LabeledBatch,
    pub test: LabeledBatch,
    pub seed: u64,
}

impl PipelineContext {
    /// Fit the encoder on the whole corpus, then split
    pub fn from_records(
        schema: Arc<Schema>,
        records: &[Record],
        test_fraction: f64,
        seed: u64,
    ) -> Result<Self> {
        let encoder = Arc::new(FeatureEncoder::fit(Arc::clone(&schema), records)?);
        let encoded = encoder.encode_batch(records)?;
        let split = train_test_split(encoded.len(), test_fraction, seed)?;
        let train = encoded.select_rows(&split.train);
        let test = encoded.select_rows(&split.test);

        info!(
            rows = encoded.len(),
            features = encoded.dim(),
            train = train.len(),
            test = test.len(),
            train_attacks = train.attack_count(),
            test_attacks = test.attack_count(),
            "pipeline context ready"
        );

        Ok(Self {
            schema,
            encoder,
            train,
            test,
            seed,
        })
    }

    /// Load CSV files and build the context
    pub fn load<P: AsRef<Path>>(
        schema: Arc<Schema>,
        paths: &[P],
        test_fraction: f64,
        seed: u64,
    ) -> Result<Self> {
        let records = CorpusLoader::new(Arc::clone(&schema)).load_files(paths)?;
        Self::from_records(schema, &records, test_fraction, seed)
    }

    pub fn total_rows(&self) -> usize {
        self.train.len() + self.test.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic::{CorpusGenerator, SyntheticConfig};

    #[test]
    fn test_splits_share_encoder_codes() {
        let schema = Arc::new(Schema::unsw_nb15());
        let records = CorpusGenerator::new(SyntheticConfig { rows: 200, ..Default::default() })
            .generate(&schema)
            .unwrap();
        let ctx = PipelineContext::from_records(Arc::clone(&schema), &records, 0.3, 11).unwrap();

        assert_eq!(ctx.test.len(), 60);
        assert_eq!(ctx.train.len(), 140);
        assert_eq!(ctx.total_rows(), 200);
        assert!(Arc::ptr_eq(&ctx.train.feature_names, &ctx.test.feature_names));

        // re-encoding a record through the shared encoder reproduces its row
        let again = ctx.encoder.encode(&records[0]).unwrap();
        let full = ctx.encoder.encode_batch(&records).unwrap();
        assert_eq!(again.values, full.features.row(0));
    }
}
