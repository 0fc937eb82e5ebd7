//! Batch pipelines over treebank files.
//!
//! Each pipeline is one synchronous pass: trees stream in line by line,
//! malformed lines are logged and skipped, and everything else aborts the
//! run. Model artifacts move through `treegram-core`'s own save/load
//! entry points.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use treegram_core::{
    tree_events, CheckReport, Config, EvalReport, Evaluator, EventOptions, ModelError, PcfgModel,
    SequenceCounter, SequenceModel,
};

use crate::corpus::Treebank;

/// Totals from one training pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainSummary {
    pub trees: u64,
    pub skipped: u64,
    pub parents: usize,
    pub symbols: usize,
}

/// Totals from one count-table scoring pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CostSummary {
    pub trees: u64,
    pub skipped: u64,
    pub events: u64,
    pub oov_children: u64,
    pub backoff_events: u64,
    pub total_cost: f64,
}

/// Trains a sequence model over a treebank and writes the bincode
/// artifact to `model_out`. With `run_check`, the normalization check
/// runs on the finished model and its findings go to the log.
pub fn train_pipeline(
    corpus: &Path,
    model_out: &Path,
    cfg: &Config,
    run_check: bool,
) -> Result<TrainSummary> {
    let mut counter = SequenceCounter::new(cfg);
    let mut trees = 0u64;
    let mut skipped = 0u64;

    let reader = Treebank::open(corpus)
        .with_context(|| format!("opening treebank {}", corpus.display()))?;
    for (line, item) in reader {
        match item {
            Ok(tree) => match counter.observe_tree(&tree) {
                Ok(()) => trees += 1,
                Err(ModelError::Node { msg }) => {
                    warn!(line, %msg, "skipping ill-formed tree");
                    skipped += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("counting {}", corpus.display()))
                }
            },
            Err(ModelError::Parse { pos, msg }) => {
                warn!(line, pos, %msg, "skipping malformed tree");
                skipped += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", corpus.display())),
        }
    }
    info!(trees, skipped, "counted treebank");

    let model = counter.train(cfg);
    if run_check {
        model.check(cfg.check_epsilon).log_summary();
    }

    let summary = TrainSummary {
        trees,
        skipped,
        parents: model.parent_count(),
        symbols: model.symbols().len(),
    };
    model
        .save_bincode(model_out)
        .with_context(|| format!("writing model {}", model_out.display()))?;
    info!(path = %model_out.display(), symbols = summary.symbols, "wrote model artifact");
    Ok(summary)
}

/// Scores a treebank against a trained model artifact.
pub fn eval_pipeline(corpus: &Path, model_path: &Path, cfg: &Config) -> Result<EvalReport> {
    let model = SequenceModel::load_bincode(model_path)
        .with_context(|| format!("loading model {}", model_path.display()))?;
    let mut evaluator = Evaluator::new(&model, cfg);

    let reader = Treebank::open(corpus)
        .with_context(|| format!("opening treebank {}", corpus.display()))?;
    for (line, item) in reader {
        match item {
            Ok(tree) => match evaluator.score_tree(&tree) {
                Ok(_) => {}
                Err(ModelError::Node { msg }) => {
                    warn!(line, %msg, "skipping unscorable tree");
                    evaluator.mark_skipped();
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("scoring {}", corpus.display()))
                }
            },
            Err(ModelError::Parse { pos, msg }) => {
                warn!(line, pos, %msg, "skipping malformed tree");
                evaluator.mark_skipped();
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", corpus.display())),
        }
    }

    let report = evaluator.report(cfg.top_unknown);
    report.log_summary();
    Ok(report)
}

/// Runs the normalization check on a trained model artifact.
pub fn check_model_pipeline(model_path: &Path, cfg: &Config) -> Result<CheckReport> {
    let model = SequenceModel::load_bincode(model_path)
        .with_context(|| format!("loading model {}", model_path.display()))?;
    let report = model.check(cfg.check_epsilon);
    report.log_summary();
    Ok(report)
}

/// Runs the normalization check on a count table.
pub fn check_table_pipeline(table: &Path, cfg: &Config) -> Result<CheckReport> {
    let pcfg = PcfgModel::read(table, &cfg.feature_prefix)
        .with_context(|| format!("loading count table {}", table.display()))?;
    let report = pcfg.check(cfg.pcfg_sum_tolerance);
    report.log_summary();
    Ok(report)
}

/// Scores a treebank against a count table, writing one feature line per
/// tree: the input line number, a tab, and `name=value` pairs.
pub fn cost_pipeline<W: Write>(
    corpus: &Path,
    table: &Path,
    cfg: &Config,
    out: &mut W,
) -> Result<CostSummary> {
    let pcfg = PcfgModel::read(table, &cfg.feature_prefix)
        .with_context(|| format!("loading count table {}", table.display()))?;
    let opts = EventOptions {
        terminal_unigrams: false,
        digit2at: cfg.digit2at,
    };

    let mut summary = CostSummary {
        trees: 0,
        skipped: 0,
        events: 0,
        oov_children: 0,
        backoff_events: 0,
        total_cost: 0.0,
    };

    let reader = Treebank::open(corpus)
        .with_context(|| format!("opening treebank {}", corpus.display()))?;
    for (line, item) in reader {
        let tree = match item {
            Ok(tree) => tree,
            Err(ModelError::Parse { pos, msg }) => {
                warn!(line, pos, %msg, "skipping malformed tree");
                summary.skipped += 1;
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", corpus.display())),
        };
        let events = match tree_events(&tree, &opts) {
            Ok(events) => events,
            Err(ModelError::Node { msg }) => {
                warn!(line, %msg, "skipping ill-formed tree");
                summary.skipped += 1;
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("scoring {}", corpus.display())),
        };

        let costs: Vec<_> = events.iter().map(|ev| pcfg.cost(ev)).collect();
        summary.trees += 1;
        summary.events += costs.len() as u64;
        for c in &costs {
            summary.total_cost += c.cost;
            summary.oov_children += u64::from(c.oov);
            if c.backoff.is_some() {
                summary.backoff_events += 1;
            }
        }

        let feats = pcfg.accumulate_features(&costs);
        let rendered: Vec<String> = feats
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        writeln!(out, "{}\t{}", line, rendered.join(" "))
            .context("writing feature line")?;
    }

    info!(
        trees = summary.trees,
        skipped = summary.skipped,
        events = summary.events,
        oov_children = summary.oov_children,
        backoff_events = summary.backoff_events,
        "scored treebank against count table"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use std::path::PathBuf;

    fn stamp() -> u128 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    }

    fn temp_file(name: &str, ext: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("pipeline_{name}_{}.{ext}", stamp()));
        let mut f = File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    const CORPUS: &str = "\
# three trees, one broken line
(S (NP (DT the) (NN dog)) (VP (VBZ barks)))
(S (NP (DT the) (NN cat)) (VP (VBZ sits)))
(S (NP (DT the
(S (VP (VBZ runs)))
";

    #[test]
    fn train_then_eval_round_trip() {
        let corpus = temp_file("corpus", "txt", CORPUS);
        let model_path = std::env::temp_dir().join(format!("pipeline_model_{}.bin", stamp()));
        let cfg = Config::default();

        let summary = train_pipeline(&corpus, &model_path, &cfg, true).unwrap();
        assert_eq!(summary.trees, 3);
        assert_eq!(summary.skipped, 1);
        assert!(summary.parents > 0);

        let report = eval_pipeline(&corpus, &model_path, &cfg).unwrap();
        std::fs::remove_file(&corpus).ok();
        std::fs::remove_file(&model_path).ok();

        assert_eq!(report.trees, 3);
        assert_eq!(report.skipped_trees, 1);
        assert!(report.logprob.is_finite());
        assert!(report.logprob < 0.0);
        assert_eq!(report.unknown_events, 0);
    }

    #[test]
    fn check_model_pipeline_reports_clean_distributions() {
        let corpus = temp_file("check", "txt", CORPUS);
        let model_path = std::env::temp_dir().join(format!("pipeline_check_{}.bin", stamp()));
        let cfg = Config::default();

        train_pipeline(&corpus, &model_path, &cfg, false).unwrap();
        let report = check_model_pipeline(&model_path, &cfg).unwrap();
        std::fs::remove_file(&corpus).ok();
        std::fs::remove_file(&model_path).ok();

        assert!(report.total_contexts() > 0);
        for sums in &report.models {
            assert!(sums.sum_gt_1.is_empty());
        }
    }

    #[test]
    fn cost_pipeline_writes_one_feature_line_per_tree() {
        let corpus = temp_file(
            "cost_corpus",
            "txt",
            "(S (NP (DT the) (NN dog)) (VP (VBZ barks)))\n",
        );
        let table = temp_file(
            "cost_table",
            "tsv",
            "S NP VP\t8\t10\nNP DT NN\t5\t10\nVP VBZ\t4\t10\n\
             DT \"the\"\t6\t10\nNN \"dog\"\t3\t10\nVBZ \"barks\"\t2\t10\n\
             (TOTAL_NT)\t0\t100\n(TOTAL_LEX)\t0\t100\n",
        );
        let cfg = Config::default();

        let mut out = Vec::new();
        let summary = cost_pipeline(&corpus, &table, &cfg, &mut out).unwrap();
        std::fs::remove_file(&corpus).ok();
        std::fs::remove_file(&table).ok();

        assert_eq!(summary.trees, 1);
        assert_eq!(summary.events, 6);
        assert_eq!(summary.oov_children, 0);
        assert_eq!(summary.backoff_events, 0);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("1\t"));
        assert!(lines[0].contains("pcfg="));
        assert!(!lines[0].contains("pcfg-oov"));
    }

    #[test]
    fn cost_pipeline_flags_backoff_and_oov() {
        let corpus = temp_file(
            "oov_corpus",
            "txt",
            "(S (NP (DT the) (NN fox)) (VP (VBZ barks)))\n",
        );
        // No "NP DT NN" row and no "fox" row anywhere.
        let table = temp_file(
            "oov_table",
            "tsv",
            "S NP VP\t8\t10\nVP VBZ\t4\t10\nNP\t10\t50\nDT\t6\t60\nNN\t5\t60\n\
             DT \"the\"\t6\t10\nNN \"dog\"\t3\t10\nVBZ \"barks\"\t2\t10\n",
        );
        let cfg = Config::default();

        let mut out = Vec::new();
        let summary = cost_pipeline(&corpus, &table, &cfg, &mut out).unwrap();
        std::fs::remove_file(&corpus).ok();
        std::fs::remove_file(&table).ok();

        // (NP DT NN) backs off through the DT/NN marginals; (NN "fox")
        // backs off with one unseen child.
        assert_eq!(summary.trees, 1);
        assert_eq!(summary.backoff_events, 2);
        assert_eq!(summary.oov_children, 1);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("pcfg-oov=1"));
        assert!(text.contains("pcfg-bo-NP=1"));
    }
}
