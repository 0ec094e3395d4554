use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{Table, Tabled};

use flowtriage::analysis;
use flowtriage::config::Config;
use flowtriage::dataset::Schema;
use flowtriage::ml::{ForestParams, Learner};
use flowtriage::pipeline::{PipelineContext, TriagePipeline};
use flowtriage::testing::report::{pct, ReportFormat};
use flowtriage::testing::synthetic::{write_csv, CorpusGenerator, SyntheticConfig};

#[derive(Parser)]
#[command(name = "flowtriage")]
#[command(author, version, about = "Two-stage network traffic triage on UNSW-NB15")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Corpus selection shared by the analysis commands
#[derive(Args)]
pub struct CorpusArgs {
    /// CSV files (default: general.data_paths from the config)
    #[arg(value_name = "CSV")]
    pub paths: Vec<PathBuf>,

    /// Seed for the split and every model
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Share of rows held out for evaluation
    #[arg(long)]
    pub test_fraction: Option<f64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline and print the report
    Run {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Report format
        #[arg(short, long, value_enum)]
        format: Option<ReportFormat>,

        /// Write the report to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract the triage rule from the training split
    ExtractRule {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Print the rule as TOML for the [triage.rule] section
        #[arg(long)]
        toml: bool,
    },

    /// Rank features by forest importance and label correlation
    RankFeatures {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Number of features to show
        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// Attack-family distribution and classifier
    Categories {
        #[command(flatten)]
        corpus: CorpusArgs,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a synthetic UNSW-NB15-like corpus
    Synth {
        /// Output CSV path
        output: PathBuf,

        /// Number of rows
        #[arg(short, long, default_value = "10000")]
        rows: usize,

        /// Share of attack rows
        #[arg(short, long, default_value = "0.4")]
        attack_ratio: f64,

        /// Generator seed
        #[arg(short, long, default_value = "11")]
        seed: u64,
    },
}

/// Table row for the grid search
#[derive(Tabled)]
struct CandidateRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Candidate")]
    params: String,
    #[tabled(rename = "Mean recall")]
    mean: String,
    #[tabled(rename = "Std")]
    std: String,
}

/// Table row for feature ranking
#[derive(Tabled)]
struct FeatureRow {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Feature")]
    feature: String,
    #[tabled(rename = "Importance")]
    importance: String,
    #[tabled(rename = "Label corr.")]
    correlation: String,
}

/// Table row for attack families
#[derive(Tabled)]
struct FamilyRow {
    #[tabled(rename = "Family")]
    family: String,
    #[tabled(rename = "Count")]
    count: usize,
    #[tabled(rename = "Share")]
    share: String,
}

/// Table row for per-class metrics
#[derive(Tabled)]
struct ClassRow {
    #[tabled(rename = "Family")]
    family: String,
    #[tabled(rename = "Precision")]
    precision: String,
    #[tabled(rename = "Recall")]
    recall: String,
    #[tabled(rename = "F1")]
    f1: String,
    #[tabled(rename = "Support")]
    support: usize,
}

pub fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Run {
            corpus,
            format,
            output,
        } => cmd_run(config, corpus, format, output),
        Commands::ExtractRule { corpus, toml } => cmd_extract_rule(config, corpus, toml),
        Commands::RankFeatures { corpus, top } => cmd_rank_features(config, corpus, top),
        Commands::Categories { corpus } => cmd_categories(config, corpus),
        Commands::GenConfig { output } => cmd_gen_config(output),
        Commands::Synth {
            output,
            rows,
            attack_ratio,
            seed,
        } => cmd_synth(output, rows, attack_ratio, seed),
    }
}

/// Apply CLI overrides and load the corpus
fn build_context(config: &mut Config, corpus: CorpusArgs) -> Result<PipelineContext> {
    if !corpus.paths.is_empty() {
        config.general.data_paths = corpus.paths;
    }
    if let Some(seed) = corpus.seed {
        config.apply_seed(seed);
    }
    if let Some(fraction) = corpus.test_fraction {
        config.general.test_fraction = fraction;
    }
    if config.general.data_paths.is_empty() {
        bail!("No corpus given: pass CSV paths or set general.data_paths in the config");
    }

    PipelineContext::load(
        Arc::new(Schema::unsw_nb15()),
        &config.general.data_paths,
        config.general.test_fraction,
        config.general.seed,
    )
    .context("Failed to load corpus")
}

fn emit(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn cmd_run(
    mut config: Config,
    corpus: CorpusArgs,
    format: Option<ReportFormat>,
    output: Option<PathBuf>,
) -> Result<()> {
    let ctx = build_context(&mut config, corpus)?;
    let report = TriagePipeline::run(&ctx, &config).context("Pipeline run failed")?;

    let format = format.unwrap_or(config.report.format);
    let output = output.or_else(|| config.report.output.clone());
    emit(&report.render(format), output.as_deref())?;

    if output.is_some() || format == ReportFormat::Text {
        let triage = &report.comparison.triage;
        if triage.leaked_attacks > 0 {
            eprintln!(
                "{}",
                format!("{} attacks were auto-cleared by the rule", triage.leaked_attacks)
                    .red()
                    .bold()
            );
        }
        if let Some(best) = &report.comparison.best_recall {
            eprintln!("{} {}", "Best recall:".green().bold(), best);
        }
    }
    Ok(())
}

fn cmd_extract_rule(mut config: Config, corpus: CorpusArgs, as_toml: bool) -> Result<()> {
    let ctx = build_context(&mut config, corpus)?;
    let extracted = config
        .triage
        .extractor
        .extract(&ctx.train)
        .context("Rule extraction failed")?;

    if as_toml {
        #[derive(serde::Serialize)]
        struct RuleSection<'a> {
            rule: &'a flowtriage::triage::Rule,
        }
        #[derive(serde::Serialize)]
        struct TriageSection<'a> {
            triage: RuleSection<'a>,
        }
        let text = toml::to_string_pretty(&TriageSection {
            triage: RuleSection {
                rule: &extracted.rule,
            },
        })?;
        println!("{}", text);
        return Ok(());
    }

    println!("{} {}", "Rule:".green().bold(), extracted.rule);
    println!(
        "Winning tree: {} (cv recall {:.4})",
        extracted.search.best_params, extracted.search.best_score
    );
    println!(
        "Clears {} training rows, {} of them attacks",
        extracted.cleared_training_rows, extracted.cleared_training_attacks
    );
    println!();

    let rows: Vec<CandidateRow> = extracted
        .search
        .scores
        .iter()
        .enumerate()
        .map(|(i, c)| CandidateRow {
            index: i,
            params: c.params.clone(),
            mean: if i == extracted.search.best_index {
                format!("{:.4}", c.mean_score).green().bold().to_string()
            } else {
                format!("{:.4}", c.mean_score)
            },
            std: format!("{:.4}", c.std_score),
        })
        .collect();
    println!("{}", Table::new(rows));
    println!();
    println!("{}", extracted.tree.export_text(&ctx.train.feature_names));
    Ok(())
}

fn cmd_rank_features(mut config: Config, corpus: CorpusArgs, top: usize) -> Result<()> {
    let ctx = build_context(&mut config, corpus)?;
    let params = ForestParams {
        seed: config.general.seed,
        ..Default::default()
    };
    let forest = params.fit(&ctx.train.features, &ctx.train.label_indices(), 2)?;
    let importances = flowtriage::ml::Classifier::feature_importances(&forest)
        .unwrap_or_else(|| vec![0.0; ctx.train.dim()]);
    let ranking = analysis::rank_features(&importances, &ctx.train.feature_names)?;
    let correlations = analysis::label_correlations(&ctx.train);

    let rows: Vec<FeatureRow> = ranking
        .iter()
        .take(top)
        .enumerate()
        .map(|(i, f)| FeatureRow {
            rank: i + 1,
            feature: f.feature.clone(),
            importance: format!("{:.4}", f.importance),
            correlation: correlations
                .iter()
                .find(|c| c.feature == f.feature)
                .and_then(|c| c.correlation)
                .map_or_else(|| "n/a".to_string(), |c| format!("{:+.3}", c)),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn cmd_categories(mut config: Config, corpus: CorpusArgs) -> Result<()> {
    let ctx = build_context(&mut config, corpus)?;
    let report = analysis::analyze(&ctx, None, &config.analysis)?;

    let rows: Vec<FamilyRow> = report
        .distribution
        .iter()
        .map(|s| FamilyRow {
            family: s.category.to_string(),
            count: s.count,
            share: format!("{:.1}%", s.share * 100.0),
        })
        .collect();
    println!("{}", "Attack families".bold());
    println!("{}", Table::new(rows));

    if let Some(model) = &report.category_model {
        println!();
        println!(
            "{} {}",
            "Attack-family classifier on".bold(),
            model.features.join(", ")
        );
        let fmt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.3}", v));
        let rows: Vec<ClassRow> = model
            .report
            .classes
            .iter()
            .map(|c| ClassRow {
                family: c.label.clone(),
                precision: fmt(c.precision),
                recall: fmt(c.recall),
                f1: fmt(c.f1),
                support: c.support,
            })
            .collect();
        println!("{}", Table::new(rows));
        println!("Accuracy: {}", pct(model.report.accuracy));
    }
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let toml_str = config.to_toml()?;

    match output {
        Some(path) => {
            std::fs::write(&path, &toml_str)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn cmd_synth(output: PathBuf, rows: usize, attack_ratio: f64, seed: u64) -> Result<()> {
    if !(0.0..=1.0).contains(&attack_ratio) {
        bail!("attack ratio must be within [0, 1]");
    }
    let schema = Schema::unsw_nb15();
    let records = CorpusGenerator::new(SyntheticConfig {
        rows,
        attack_ratio,
        seed,
    })
    .generate(&schema)?;

    let file = std::fs::File::create(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut out = std::io::BufWriter::new(file);
    write_csv(&schema, &records, &mut out)?;
    out.flush()?;

    let attacks = records.iter().filter(|r| r.label.is_attack()).count();
    println!(
        "Wrote {} rows ({} attacks) to {}",
        rows,
        attacks,
        output.display()
    );
    Ok(())
}
