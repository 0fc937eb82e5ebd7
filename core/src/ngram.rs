//! Backoff n-gram language model over interned symbols.
//!
//! Counting and scoring are split into two types. [`NgramCounter`]
//! accumulates, for every position of a framed sentence, the target
//! symbol under each context length from zero up to `order - 1`.
//! [`NgramCounter::train_lm`] finalizes the counts into an [`NgramLm`]:
//! discounted log10 probabilities per context plus one backoff weight
//! per context, computed shortest contexts first so that each weight
//! normalizes against the already-finalized lower order.
//!
//! The unigram level keeps exact relative frequencies, so a backoff
//! walk always terminates with real mass for any symbol seen in
//! training. Symbols never seen at all bottom out at [`LOG10_ZERO`].

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::prob::{Counts, LogProbs, LOG10_ZERO};
use crate::symbol::{Sym, SymbolTable};

/// Mass reservation scheme applied per context during finalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Discounting {
    /// Reserve `types / (types + tokens)` of each context's mass.
    WittenBell,
    /// Reserve a fixed fraction of each context's mass.
    Fixed(f64),
}

/// Fixed discounts are clamped below 1 so seen events keep some mass.
const MAX_FIXED_DISCOUNT: f64 = 0.99;

/// Backoff weights collapse to the floor once the lower order has
/// almost no leftover mass to redistribute.
const MIN_LEFTOVER: f64 = 1e-12;

/// Context-conditioned counts, keyed by (context, target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NgramCounter {
    order: usize,
    counts: AHashMap<Vec<Sym>, Counts<Sym>>,
}

impl NgramCounter {
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(1),
            counts: AHashMap::new(),
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Counts every n-gram ending at positions `start..`, one entry per
    /// context length. Contexts never reach left of the sentence start.
    pub fn count_text(&mut self, sent: &[Sym], start: usize) {
        for i in start..sent.len() {
            let maxk = (self.order - 1).min(i);
            for k in 0..=maxk {
                let ctx = sent[i - k..i].to_vec();
                self.counts.entry(ctx).or_default().add(sent[i], 1.0);
            }
        }
    }

    /// Adds `n` to a single (context, target) cell.
    pub fn add_ngram(&mut self, ctx: Vec<Sym>, target: Sym, n: f64) {
        self.counts.entry(ctx).or_default().add(target, n);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<Sym>, &Counts<Sym>)> {
        self.counts.iter()
    }

    /// Elementwise sum with another counter of the same order and symbol
    /// space. Shard counts merged this way train to the same model as a
    /// single pass over the concatenated corpus.
    pub fn merge(&mut self, other: NgramCounter) {
        debug_assert_eq!(self.order, other.order);
        for (ctx, table) in other.counts {
            match self.counts.get_mut(&ctx) {
                Some(mine) => mine.merge(table),
                None => {
                    self.counts.insert(ctx, table);
                }
            }
        }
    }

    /// Finalizes counts into a scorable model.
    pub fn train_lm(self, discounting: Discounting) -> NgramLm {
        let mut contexts: Vec<(Vec<Sym>, Counts<Sym>)> = self.counts.into_iter().collect();
        contexts.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));

        let mut dists: AHashMap<Vec<Sym>, ContextDist> = AHashMap::new();
        for (ctx, table) in contexts {
            if ctx.is_empty() {
                // exact relative frequencies at the bottom
                let logp = table.normalize().into_log10();
                dists.insert(
                    ctx,
                    ContextDist {
                        logp,
                        log_bo: LOG10_ZERO,
                    },
                );
                continue;
            }

            let total = table.total();
            let types = table.len() as f64;
            let (denom, reserved) = match discounting {
                Discounting::WittenBell => (total + types, types / (total + types)),
                Discounting::Fixed(g) => {
                    let g = g.clamp(0.0, MAX_FIXED_DISCOUNT);
                    if g > 0.0 {
                        (total / (1.0 - g), g)
                    } else {
                        (total, 0.0)
                    }
                }
            };
            let probs = table.normalize_by(|_| denom);

            // Mass the lower orders already give to this context's seen
            // targets; the weight spreads the reserved mass over the rest.
            let shorter = &ctx[1..];
            let seen: f64 = probs
                .iter()
                .map(|(w, _)| 10f64.powf(chain_logp(&dists, shorter, *w)))
                .sum();
            let leftover = 1.0 - seen;
            let log_bo = if reserved > 0.0 && leftover > MIN_LEFTOVER {
                (reserved / leftover).log10()
            } else {
                LOG10_ZERO
            };

            dists.insert(
                ctx,
                ContextDist {
                    logp: probs.into_log10(),
                    log_bo,
                },
            );
        }
        NgramLm {
            order: self.order,
            dists,
        }
    }
}

/// One finalized conditional distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextDist {
    logp: LogProbs<Sym>,
    log_bo: f64,
}

/// Trained backoff model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NgramLm {
    order: usize,
    dists: AHashMap<Vec<Sym>, ContextDist>,
}

impl NgramLm {
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn context_count(&self) -> usize {
        self.dists.len()
    }

    /// Stored conditioning contexts, the empty unigram context included.
    pub fn contexts(&self) -> impl Iterator<Item = &[Sym]> {
        self.dists.keys().map(Vec::as_slice)
    }

    /// Scores the symbol at position `i` against its longest available
    /// in-sentence context. Returns the matched log probability and the
    /// accumulated backoff cost separately; their sum is the score.
    pub fn score_word(&self, sent: &[Sym], i: usize) -> (f64, f64) {
        let w = sent[i];
        let maxk = (self.order - 1).min(i);
        let ctx = &sent[i - maxk..i];
        let (lp, bo) = chain_lookup(&self.dists, ctx, w);
        if lp <= LOG10_ZERO {
            warn!(sym = w, "symbol missing from model vocabulary");
        }
        (lp, bo)
    }

    /// Total log10 score of positions `start..`. Equal to summing the
    /// [`score_word`](Self::score_word) pairs over the same positions.
    pub fn score_text(&self, sent: &[Sym], start: usize) -> f64 {
        (start..sent.len())
            .map(|i| {
                let (lp, bo) = self.score_word(sent, i);
                lp + bo
            })
            .sum()
    }

    /// Backoff-chain log probability of `w` under an explicit context,
    /// truncated to the model order.
    pub fn logp_given(&self, ctx: &[Sym], w: Sym) -> f64 {
        let ctx = if ctx.len() >= self.order {
            &ctx[ctx.len() - (self.order - 1)..]
        } else {
            ctx
        };
        let (lp, bo) = chain_lookup(&self.dists, ctx, w);
        lp + bo
    }

    /// Symbols with unigram mass.
    pub fn vocab(&self) -> Vec<Sym> {
        let empty: &[Sym] = &[];
        self.dists
            .get(empty)
            .map(|d| d.logp.iter().map(|(w, _)| *w).collect())
            .unwrap_or_default()
    }

    /// Sums realized probability mass over the full vocabulary for every
    /// stored context. Returns how many contexts sum to one within
    /// `epsilon`, how many fall short, and each context that overshoots
    /// together with its sum. Saturated contexts whose lower order has
    /// no leftover mass legitimately land in the short bucket.
    pub fn check_sums(&self, epsilon: f64) -> (usize, usize, Vec<(Vec<Sym>, f64)>) {
        let vocab = self.vocab();
        let mut contexts: Vec<&Vec<Sym>> = self.dists.keys().collect();
        contexts.sort();

        let mut eq1 = 0;
        let mut lt1 = 0;
        let mut gt1 = Vec::new();
        for ctx in contexts {
            let sum: f64 = vocab
                .iter()
                .map(|w| 10f64.powf(self.logp_given(ctx, *w)))
                .sum();
            if (sum - 1.0).abs() <= epsilon {
                eq1 += 1;
            } else if sum < 1.0 {
                lt1 += 1;
            } else {
                gt1.push((ctx.clone(), sum));
            }
        }
        (eq1, lt1, gt1)
    }

    /// Writes the model in ARPA text form, n-grams sorted within each
    /// section. A backoff weight is emitted only for n-grams that exist
    /// as a context of a longer order.
    pub fn write_arpa<W: std::io::Write>(
        &self,
        out: &mut W,
        symbols: &SymbolTable,
    ) -> std::io::Result<()> {
        let mut sections: Vec<Vec<(String, f64, Option<f64>)>> = vec![Vec::new(); self.order];
        let mut full = Vec::new();
        for (ctx, dist) in &self.dists {
            for (w, lp) in dist.logp.iter() {
                let n = ctx.len() + 1;
                let mut toks: Vec<&str> = ctx.iter().map(|s| symbols.name_or(*s, "?")).collect();
                toks.push(symbols.name_or(*w, "?"));
                full.clear();
                full.extend_from_slice(ctx);
                full.push(*w);
                let bo = if n < self.order {
                    self.dists.get(&full).map(|d| d.log_bo)
                } else {
                    None
                };
                sections[n - 1].push((toks.join(" "), lp, bo));
            }
        }
        for sec in &mut sections {
            sec.sort_by(|a, b| a.0.cmp(&b.0));
        }

        writeln!(out, "\\data\\")?;
        for (i, sec) in sections.iter().enumerate() {
            writeln!(out, "ngram {}={}", i + 1, sec.len())?;
        }
        for (i, sec) in sections.iter().enumerate() {
            writeln!(out)?;
            writeln!(out, "\\{}-grams:", i + 1)?;
            for (gram, lp, bo) in sec {
                match bo {
                    Some(b) => writeln!(out, "{lp:.6}\t{gram}\t{b:.6}")?,
                    None => writeln!(out, "{lp:.6}\t{gram}")?,
                }
            }
        }
        writeln!(out)?;
        writeln!(out, "\\end\\")
    }
}

/// Walks contexts from longest to shortest, accumulating backoff
/// weights until the target is found. Missing contexts cost nothing;
/// a stored context that lacks the target charges its backoff weight.
fn chain_lookup(dists: &AHashMap<Vec<Sym>, ContextDist>, ctx: &[Sym], w: Sym) -> (f64, f64) {
    let mut bo = 0.0;
    for start in 0..=ctx.len() {
        if let Some(d) = dists.get(&ctx[start..]) {
            if let Some(lp) = d.logp.get(&w) {
                return (lp, bo);
            }
            bo += d.log_bo;
        }
    }
    (LOG10_ZERO, bo)
}

fn chain_logp(dists: &AHashMap<Vec<Sym>, ContextDist>, ctx: &[Sym], w: Sym) -> f64 {
    let (lp, bo) = chain_lookup(dists, ctx, w);
    lp + bo
}
