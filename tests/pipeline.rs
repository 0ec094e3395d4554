//! End-to-end runs over a synthetic corpus written to disk

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use flowtriage::config::Config;
use flowtriage::ml::{BoostParams, ForestParams};
use flowtriage::pipeline::{ConfirmationModel, ConfirmationSpec, Evaluator, PipelineContext, TriagePipeline};
use flowtriage::testing::report::{ReportFormat, RuleSource};
use flowtriage::testing::synthetic::{write_csv, CorpusGenerator, SyntheticConfig};
use flowtriage::{Rule, Schema, TriageError, TriageFilter};

fn write_corpus(dir: &std::path::Path, name: &str, rows: usize, seed: u64) -> std::path::PathBuf {
    let schema = Schema::unsw_nb15();
    let records = CorpusGenerator::new(SyntheticConfig {
        rows,
        seed,
        ..Default::default()
    })
    .generate(&schema)
    .unwrap();
    let path = dir.join(name);
    write_csv(&schema, &records, BufWriter::new(File::create(&path).unwrap())).unwrap();
    path
}

fn quick_config() -> Config {
    let mut config = Config::default();
    config.confirmation.candidates = vec![
        ConfirmationSpec::new(
            "Random Forest Model",
            ConfirmationModel::RandomForest(ForestParams {
                n_estimators: 15,
                ..Default::default()
            }),
        ),
        ConfirmationSpec::new(
            "Light GBM Classifier",
            ConfirmationModel::GradientBoosting(BoostParams {
                n_rounds: 15,
                ..BoostParams::lightgbm_like()
            }),
        ),
    ];
    config.analysis.category_forest.n_estimators = 15;
    config
}

#[test]
fn extracted_rule_clears_only_benign_rows() {
    let dir = tempfile::tempdir().unwrap();
    let train = write_corpus(dir.path(), "training-set.csv", 300, 11);
    let test = write_corpus(dir.path(), "testing-set.csv", 200, 12);

    let ctx = PipelineContext::load(Arc::new(Schema::unsw_nb15()), &[train, test], 0.3, 11).unwrap();
    assert_eq!(ctx.total_rows(), 500);
    assert_eq!(ctx.test.len(), 150);

    let config = quick_config();
    let report = TriagePipeline::run(&ctx, &config).unwrap();

    assert_eq!(report.rule.source, RuleSource::Extracted);
    assert_eq!(report.rule.cleared_training_attacks, Some(0));
    assert!(report.rule.cleared_training_rows.unwrap() > 0);
    assert_eq!(report.rule.cv_recall, Some(1.0));

    let triage = &report.comparison.triage;
    assert_eq!(triage.leaked_attacks, 0);
    let benign = ctx.test.len() - ctx.test.attack_count();
    assert_eq!(triage.auto_cleared, benign);
    let expected = benign as f64 / ctx.test.len() as f64;
    assert!((triage.filtered_fraction.unwrap() - expected).abs() < 1e-12);

    for evaluation in &report.comparison.evaluations {
        assert_eq!(evaluation.confirmation_rows, triage.needs_review);
        assert_eq!(evaluation.overall.confusion.total(), ctx.test.len());
        assert_eq!(evaluation.review.confusion.total(), triage.needs_review);
    }

    let json: serde_json::Value = serde_json::from_str(&report.render(ReportFormat::Json)).unwrap();
    assert_eq!(json["rule"]["source"], "extracted");
}

#[test]
fn configured_rule_routes_rows_without_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_corpus(dir.path(), "corpus.csv", 300, 5);
    let ctx = PipelineContext::load(Arc::new(Schema::unsw_nb15()), &[path], 0.3, 5).unwrap();

    let mut config = quick_config();
    config.analysis.enabled = false;
    config.triage.rule = Some(Rule::gt("sttl", 254.0));

    let report = TriagePipeline::run(&ctx, &config).unwrap();
    assert_eq!(report.rule.source, RuleSource::Configured);
    assert_eq!(report.comparison.triage.auto_cleared, 0);
    assert!(report.analysis.is_none());
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.category == "Efficiency"));
}

#[test]
fn config_file_drives_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path(), "corpus.csv", 200, 3);

    let mut config = quick_config();
    config.general.data_paths = vec![corpus];
    config.triage.rule = Some(Rule::le("sttl", 61.0));
    let config_path = dir.path().join("flowtriage.toml");
    config.save(&config_path).unwrap();

    let loaded = Config::load(&config_path).unwrap();
    assert_eq!(loaded, config);

    let ctx = PipelineContext::load(
        Arc::new(Schema::unsw_nb15()),
        &loaded.general.data_paths,
        loaded.general.test_fraction,
        loaded.general.seed,
    )
    .unwrap();
    let compiled = loaded
        .triage
        .rule
        .as_ref()
        .unwrap()
        .compile(&ctx.test.feature_names)
        .unwrap();
    let partition = TriageFilter::partition(&compiled, &ctx.test.features).unwrap();
    assert!(partition.is_consistent());

    let evaluator = Evaluator::new(&partition, &ctx.test).unwrap();
    assert_eq!(evaluator.triage_stats().leaked_attacks, 0);
}

#[test]
fn missing_column_is_a_schema_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.csv");
    std::fs::write(&path, "id,dur,proto\n1,0.1,tcp\n").unwrap();

    let err = PipelineContext::load(Arc::new(Schema::unsw_nb15()), &[path], 0.3, 11).unwrap_err();
    assert!(matches!(err, TriageError::Schema(_)));
}
