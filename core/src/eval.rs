//! Corpus evaluation with running statistics and a score cache.
//!
//! An [`Evaluator`] wraps a trained model for one pass over a test
//! corpus. Production events repeat heavily across trees, so their
//! scores go through an LRU cache; lexical events are a single table
//! lookup and are scored directly. The accumulated statistics come out
//! as an [`EvalReport`], which serializes cleanly for downstream
//! tooling.

use std::num::NonZeroUsize;

use ahash::AHashMap;
use lru::LruCache;
use serde::Serialize;
use tracing::info;

use crate::error::ModelError;
use crate::event::{tree_events, Event, EventOptions};
use crate::prob::log10_to_bits;
use crate::sequence::SequenceModel;
use crate::tree::Tree;
use crate::Config;

pub struct Evaluator<'a> {
    model: &'a SequenceModel,
    digit2at: bool,
    cache: Option<LruCache<Event, f64>>,
    cache_hits: usize,
    cache_misses: usize,
    logprob: f64,
    trees: u64,
    skipped: u64,
    nodes: u64,
    words: u64,
    events: u64,
    unknown: u64,
    unknown_hist: AHashMap<(String, String), u64>,
}

impl<'a> Evaluator<'a> {
    pub fn new(model: &'a SequenceModel, cfg: &Config) -> Self {
        Self {
            model,
            digit2at: cfg.digit2at,
            cache: NonZeroUsize::new(cfg.score_cache_size).map(LruCache::new),
            cache_hits: 0,
            cache_misses: 0,
            logprob: 0.0,
            trees: 0,
            skipped: 0,
            nodes: 0,
            words: 0,
            events: 0,
            unknown: 0,
            unknown_hist: AHashMap::new(),
        }
    }

    /// Scores every event of one tree and folds it into the running
    /// totals. Returns the tree's log10 probability.
    pub fn score_tree(&mut self, tree: &Tree) -> Result<f64, ModelError> {
        let opts = EventOptions {
            terminal_unigrams: false,
            digit2at: self.digit2at,
        };
        let mut tree_lp = 0.0;
        for ev in tree_events(tree, &opts)? {
            let (lp, scored) = self.score_event(&ev);
            tree_lp += lp;
            self.events += 1;
            if !scored {
                self.unknown += 1;
                if let Event::Lexical { tag, word } = ev {
                    *self.unknown_hist.entry((tag, word)).or_insert(0) += 1;
                }
            }
        }
        self.logprob += tree_lp;
        self.trees += 1;
        self.nodes += tree.size() as u64;
        self.words += tree.word_count() as u64;
        Ok(tree_lp)
    }

    fn score_event(&mut self, ev: &Event) -> (f64, bool) {
        if matches!(ev, Event::Production { .. }) {
            if let Some(cache) = self.cache.as_mut() {
                if let Some(&lp) = cache.get(ev) {
                    self.cache_hits += 1;
                    return (lp, true);
                }
            }
            let (lp, scored) = self.model.evaluate(ev);
            if let Some(cache) = self.cache.as_mut() {
                cache.put(ev.clone(), lp);
                self.cache_misses += 1;
            }
            return (lp, scored);
        }
        self.model.evaluate(ev)
    }

    /// Records a tree that could not be parsed and was not scored.
    pub fn mark_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Returns (hits, misses).
    pub fn cache_stats(&self) -> (usize, usize) {
        (self.cache_hits, self.cache_misses)
    }

    /// Cache hit rate as a percentage, or None before any lookup.
    pub fn cache_hit_rate(&self) -> Option<f32> {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            None
        } else {
            Some(self.cache_hits as f32 / total as f32 * 100.0)
        }
    }

    /// Snapshots the running totals, keeping the `top_n` most frequent
    /// unknown (tag, word) pairs.
    pub fn report(&self, top_n: usize) -> EvalReport {
        let mut top: Vec<(String, String, u64)> = self
            .unknown_hist
            .iter()
            .map(|((t, w), &n)| (t.clone(), w.clone(), n))
            .collect();
        top.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| (&a.0, &a.1).cmp(&(&b.0, &b.1))));
        top.truncate(top_n);

        EvalReport {
            logprob: self.logprob,
            bits: log10_to_bits(self.logprob),
            trees: self.trees,
            skipped_trees: self.skipped,
            nodes: self.nodes,
            words: self.words,
            events: self.events,
            scored_events: self.events - self.unknown,
            unknown_events: self.unknown,
            unknown_types: self.unknown_hist.len(),
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            top_unknown: top,
        }
    }
}

/// Totals from one evaluation pass.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    /// Corpus log10 probability.
    pub logprob: f64,
    /// Corpus log2 probability.
    pub bits: f64,
    pub trees: u64,
    pub skipped_trees: u64,
    pub nodes: u64,
    pub words: u64,
    pub events: u64,
    /// Events scored against trained mass: every production, plus the
    /// lexical events that did not fall through to the unknown penalty.
    pub scored_events: u64,
    /// Lexical events scored through the unknown-word penalty.
    pub unknown_events: u64,
    /// Distinct unknown (tag, word) pairs.
    pub unknown_types: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Most frequent unknown pairs, highest count first.
    pub top_unknown: Vec<(String, String, u64)>,
}

impl EvalReport {
    pub fn bits_per_word(&self) -> f64 {
        if self.words == 0 {
            0.0
        } else {
            -self.bits / self.words as f64
        }
    }

    pub fn bits_per_node(&self) -> f64 {
        if self.nodes == 0 {
            0.0
        } else {
            -self.bits / self.nodes as f64
        }
    }

    pub fn bits_per_event(&self) -> f64 {
        if self.events == 0 {
            0.0
        } else {
            -self.bits / self.events as f64
        }
    }

    pub fn log_summary(&self) {
        info!(
            trees = self.trees,
            skipped = self.skipped_trees,
            nodes = self.nodes,
            words = self.words,
            events = self.events,
            "evaluated corpus"
        );
        info!(
            logprob = self.logprob,
            bits_per_word = self.bits_per_word(),
            bits_per_node = self.bits_per_node(),
            bits_per_event = self.bits_per_event(),
            "corpus probability"
        );
        info!(
            unknown_events = self.unknown_events,
            unknown_types = self.unknown_types,
            cache_hits = self.cache_hits,
            cache_misses = self.cache_misses,
            "coverage"
        );
        for (tag, word, count) in &self.top_unknown {
            info!(tag = %tag, word = %word, count, "unknown word");
        }
    }
}
