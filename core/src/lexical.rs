//! Word-given-tag unigram model, `p(word | tag)`.
//!
//! The word vocabulary is open: mass proportional to the number of
//! singleton (tag, word) pairs is reserved for a sentinel unknown word,
//! and the log of that reserved mass becomes the penalty charged per
//! unseen word at scoring time. Tags are closed; a tag with no backoff
//! weight at scoring time is a defect in the caller's data and is
//! logged as such.
//!
//! Training folds each tag's backoff mass directly into the stored
//! conditional: the table ends up holding
//! `(1 - a_tag) * p(w|tag) + a_tag * p(w)`, so a scoring hit needs no
//! further interpolation and the per-tag distributions still sum to one
//! together with the weighted marginal over unstored words.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::prob::{log10_or_zero, Counts, LogProbs, Probs};
use crate::symbol::Sym;

/// Raw (tag, word) counts. The word marginal is derived at training
/// time, so merging shards only has to sum one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagWordCounts {
    tagword: Counts<(Sym, Sym)>,
}

impl TagWordCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&mut self, tag: Sym, word: Sym) {
        self.tagword.add((tag, word), 1.0);
    }

    /// Adds `n` observations of a pair, for shard merging.
    pub fn add(&mut self, tag: Sym, word: Sym, n: f64) {
        self.tagword.add((tag, word), n);
    }

    pub fn iter(&self) -> impl Iterator<Item = ((Sym, Sym), f64)> + '_ {
        self.tagword.iter().map(|(&k, c)| (k, c))
    }

    pub fn is_empty(&self) -> bool {
        self.tagword.is_empty()
    }

    pub fn merge(&mut self, other: TagWordCounts) {
        self.tagword.merge(other.tagword);
    }

    /// Finalizes counts into a scorable model.
    ///
    /// Per tag, the backoff weight is `types / tokens` under Witten-Bell,
    /// else the fixed weight. With `unk` set, the singleton pair count is
    /// added to the word total before any ratio is taken, and the same
    /// reserved fraction becomes the sentinel's marginal probability and
    /// the unknown-word penalty.
    pub fn train(self, witten_bell: bool, fixed_backoff: f64, unk: Option<Sym>) -> TagWordModel {
        // (tokens, types) per tag
        let mut tag_stats: AHashMap<Sym, (f64, f64)> = AHashMap::new();
        let mut words = Counts::new();
        let mut wsum = 0.0;
        let mut singletons = 0usize;
        for (&(t, w), c) in self.tagword.iter() {
            let e = tag_stats.entry(t).or_insert((0.0, 0.0));
            e.0 += c;
            e.1 += 1.0;
            words.add(w, c);
            wsum += c;
            if c == 1.0 {
                singletons += 1;
            }
        }
        if unk.is_some() {
            wsum += singletons as f64;
        }

        let mut word_probs = words.normalize_by(|_| wsum);
        let mut logp_unk = 0.0;
        if let Some(u) = unk {
            let punk = singletons as f64 / wsum;
            word_probs.insert(u, punk);
            logp_unk = log10_or_zero(punk);
        }

        let bo_weights: Probs<Sym> = tag_stats
            .iter()
            .map(|(&t, &(tokens, types))| {
                let a = if witten_bell {
                    types / tokens
                } else {
                    fixed_backoff
                };
                (t, a)
            })
            .collect();

        let mut tagword_probs = self
            .tagword
            .normalize_by(|&(t, _)| tag_stats.get(&t).map(|s| s.0).unwrap_or(0.0));
        tagword_probs.update(|&(t, w), p| {
            let a = bo_weights.get(&t).unwrap_or(0.0);
            let pw = word_probs.get(&w).unwrap_or(0.0);
            (1.0 - a) * p + a * pw
        });

        TagWordModel {
            tagword: tagword_probs.into_log10(),
            word: word_probs.into_log10(),
            bo_for_tag: bo_weights.into_log10(),
            unk,
            logp_unk,
        }
    }
}

/// Trained `p(word | tag)` with interpolation already folded in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagWordModel {
    tagword: LogProbs<(Sym, Sym)>,
    word: LogProbs<Sym>,
    bo_for_tag: LogProbs<Sym>,
    unk: Option<Sym>,
    logp_unk: f64,
}

impl TagWordModel {
    /// Scores a word under a tag. The flag is false exactly when the
    /// word fell through to the reserved unknown penalty.
    ///
    /// `word` is `None` when the surface form could not be resolved
    /// against the training vocabulary at all.
    pub fn logp_tag_word_known(&self, tag: Sym, word: Option<Sym>) -> (f64, bool) {
        let w = match word {
            Some(w) => w,
            None => return (self.logp_unk, false),
        };
        if let Some(lp) = self.tagword.get(&(tag, w)) {
            return (lp, true);
        }
        if let Some(pw) = self.word.get(&w) {
            return match self.bo_for_tag.get(&tag) {
                Some(b) => (b + pw, true),
                None => {
                    warn!(tag, "tag missing from closed vocabulary, using word marginal");
                    (pw, true)
                }
            };
        }
        (self.logp_unk, false)
    }

    /// True when the word carries no trained marginal mass.
    pub fn is_oov(&self, word: Sym) -> bool {
        self.word.get(&word).is_none()
    }

    /// Penalty charged per unknown word.
    pub fn logp_unk(&self) -> f64 {
        self.logp_unk
    }

    pub fn tag_count(&self) -> usize {
        self.bo_for_tag.len()
    }

    pub fn word_count(&self) -> usize {
        self.word.len()
    }

    /// Realized mass per context: every tag, plus the word marginal as
    /// its own context keyed `None`. Each tag sums its stored
    /// conditionals plus its weighted share of the marginal over words
    /// never stored with it.
    pub fn check_sums(&self, epsilon: f64) -> (usize, usize, Vec<(Option<Sym>, f64)>) {
        let mut stored_mass: AHashMap<Sym, f64> = AHashMap::new();
        let mut stored_words: AHashMap<Sym, ahash::AHashSet<Sym>> = AHashMap::new();
        for (&(t, w), lp) in self.tagword.iter() {
            *stored_mass.entry(t).or_insert(0.0) += 10f64.powf(lp);
            stored_words.entry(t).or_default().insert(w);
        }

        let mut tags: Vec<Sym> = self.bo_for_tag.iter().map(|(&t, _)| t).collect();
        tags.sort_unstable();

        let mut eq1 = 0;
        let mut lt1 = 0;
        let mut gt1 = Vec::new();
        let mut bucket = |ctx: Option<Sym>, sum: f64| {
            if (sum - 1.0).abs() <= epsilon {
                eq1 += 1;
            } else if sum < 1.0 {
                lt1 += 1;
            } else {
                gt1.push((ctx, sum));
            }
        };

        for t in tags {
            let bo = self.bo_for_tag.get(&t).map(|b| 10f64.powf(b)).unwrap_or(0.0);
            let stored = stored_words.get(&t);
            let unseen: f64 = self
                .word
                .iter()
                .filter(|(w, _)| stored.map_or(true, |s| !s.contains(w)))
                .map(|(_, lp)| 10f64.powf(lp))
                .sum();
            let sum = stored_mass.get(&t).copied().unwrap_or(0.0) + bo * unseen;
            bucket(Some(t), sum);
        }

        let marginal: f64 = self.word.iter().map(|(_, lp)| 10f64.powf(lp)).sum();
        bucket(None, marginal);

        (eq1, lt1, gt1)
    }
}
