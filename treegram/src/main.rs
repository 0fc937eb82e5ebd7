use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use treegram::{
    check_model_pipeline, check_table_pipeline, cost_pipeline, eval_pipeline, train_pipeline,
};
use treegram_core::{CheckReport, Config};

#[derive(Parser)]
#[command(name = "treegram")]
#[command(about = "Train, score and check hierarchical grammar language models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a sequence model from a treebank
    Train {
        /// Input treebank, one bracketed tree per line
        #[arg(short, long)]
        input: PathBuf,
        /// Output model artifact
        #[arg(short, long)]
        output: PathBuf,
        /// TOML config overriding the built-in defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Run the normalization check on the trained model
        #[arg(long)]
        check: bool,
    },
    /// Score a treebank against a trained model
    Eval {
        /// Input treebank
        #[arg(short, long)]
        input: PathBuf,
        /// Trained model artifact
        #[arg(short, long)]
        model: PathBuf,
        /// TOML config overriding the built-in defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the report as JSON instead of a text summary
        #[arg(long)]
        json: bool,
    },
    /// Check that trained distributions sum to one
    Check {
        /// Trained model artifact
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Pre-aggregated count table
        #[arg(short, long)]
        table: Option<PathBuf>,
        /// TOML config overriding the built-in defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Score a treebank against a count table and print feature lines
    Cost {
        /// Input treebank
        #[arg(short, long)]
        input: PathBuf,
        /// Pre-aggregated count table
        #[arg(short, long)]
        table: PathBuf,
        /// TOML config overriding the built-in defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::load_toml(p)
            .map_err(|e| anyhow::anyhow!("failed to load config {}: {e}", p.display())),
        None => Ok(Config::default()),
    }
}

fn print_check(source: &Path, report: &CheckReport) {
    let verdict = if report.is_clean() {
        "clean"
    } else {
        "mass above one found"
    };
    println!(
        "{}: {} contexts across {} distributions, {}",
        source.display(),
        report.total_contexts(),
        report.models.len(),
        verdict
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            input,
            output,
            config,
            check,
        } => {
            let cfg = load_config(config.as_ref())?;
            let summary = train_pipeline(&input, &output, &cfg, check)?;
            println!(
                "trained {} trees ({} skipped) into {}: {} parents, {} symbols",
                summary.trees,
                summary.skipped,
                output.display(),
                summary.parents,
                summary.symbols
            );
        }
        Commands::Eval {
            input,
            model,
            config,
            json,
        } => {
            let cfg = load_config(config.as_ref())?;
            let report = eval_pipeline(&input, &model, &cfg)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "logprob {:.4} over {} trees ({} skipped): {:.4} bits/word, {:.4} bits/node, {} unknown words",
                    report.logprob,
                    report.trees,
                    report.skipped_trees,
                    report.bits_per_word(),
                    report.bits_per_node(),
                    report.unknown_events
                );
            }
        }
        Commands::Check {
            model,
            table,
            config,
        } => {
            let cfg = load_config(config.as_ref())?;
            if model.is_none() && table.is_none() {
                bail!("nothing to check: pass --model and/or --table");
            }
            if let Some(path) = model {
                let report = check_model_pipeline(&path, &cfg)?;
                print_check(&path, &report);
            }
            if let Some(path) = table {
                let report = check_table_pipeline(&path, &cfg)?;
                print_check(&path, &report);
            }
        }
        Commands::Cost {
            input,
            table,
            config,
        } => {
            let cfg = load_config(config.as_ref())?;
            let stdout = io::stdout();
            let mut out = io::BufWriter::new(stdout.lock());
            let summary = cost_pipeline(&input, &table, &cfg, &mut out)?;
            out.flush()?;
            eprintln!(
                "scored {} trees ({} skipped), {} events, total cost {:.4}, {} oov children",
                summary.trees,
                summary.skipped,
                summary.events,
                summary.total_cost,
                summary.oov_children
            );
        }
    }
    Ok(())
}
