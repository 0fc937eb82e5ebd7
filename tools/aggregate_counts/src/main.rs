use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use treegram_core::{tree_events, Event, EventOptions, Tree, TOTAL_LEX, TOTAL_NT};

/// Aggregates a treebank into the tab-separated count table the base
/// grammar model reads: one row per expansion event normalized by its
/// left-hand-side group total, one marginal row per label normalized by
/// the grand nonterminal total, one row per quoted word normalized by
/// the grand lexical total, plus the two sentinel totals.
#[derive(Parser)]
struct Opts {
    /// Treebank file, one bracketed tree per line
    treebank: PathBuf,

    /// Output count table (event TAB count TAB normalizer)
    #[clap(short, long, default_value = "counts.tsv")]
    out: PathBuf,
    /// Mask digits in terminal words with @
    #[clap(long)]
    digit2at: bool,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let file = File::open(&opts.treebank)
        .with_context(|| format!("opening treebank {}", opts.treebank.display()))?;
    let reader = BufReader::new(file);
    let ev_opts = EventOptions {
        terminal_unigrams: true,
        digit2at: opts.digit2at,
    };

    let mut expansions: HashMap<String, u64> = HashMap::new();
    let mut lhs_totals: HashMap<String, u64> = HashMap::new();
    let mut words: HashMap<String, u64> = HashMap::new();
    let mut total_nt = 0u64;
    let mut total_lex = 0u64;
    let mut trees = 0u64;
    let mut skipped = 0u64;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let tree = match Tree::parse(text) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("warning: line {}: {}", i + 1, e);
                skipped += 1;
                continue;
            }
        };
        let events = match tree_events(&tree, &ev_opts) {
            Ok(evs) => evs,
            Err(e) => {
                eprintln!("warning: line {}: {}", i + 1, e);
                skipped += 1;
                continue;
            }
        };
        trees += 1;
        for ev in &events {
            match ev {
                Event::Production { parent, children } if children.is_empty() => {
                    *words.entry(parent.clone()).or_default() += 1;
                    total_lex += 1;
                }
                _ => {
                    *expansions.entry(ev.event_string()).or_default() += 1;
                    *lhs_totals.entry(ev.parent().to_string()).or_default() += 1;
                    total_nt += 1;
                }
            }
        }
    }

    let mut rows: Vec<(String, u64, u64)> = Vec::new();
    for (key, count) in &expansions {
        let lhs = key.split(' ').next().unwrap_or("");
        rows.push((key.clone(), *count, lhs_totals[lhs]));
    }
    for (label, count) in &lhs_totals {
        rows.push((label.clone(), *count, total_nt));
    }
    for (word, count) in &words {
        rows.push((word.clone(), *count, total_lex));
    }
    rows.push((TOTAL_NT.to_string(), total_nt, total_nt));
    rows.push((TOTAL_LEX.to_string(), total_lex, total_lex));
    rows.sort();

    let of = File::create(&opts.out)
        .with_context(|| format!("creating {}", opts.out.display()))?;
    let mut w = BufWriter::new(of);
    for (key, count, norm) in &rows {
        writeln!(w, "{key}\t{count}\t{norm}")?;
    }
    w.flush()?;

    println!(
        "wrote {} rows from {} trees ({} skipped) to {}",
        rows.len(),
        trees,
        skipped,
        opts.out.display()
    );
    Ok(())
}
