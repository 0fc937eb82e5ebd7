//! Parent-conditioned sequence model over tree events.
//!
//! Every nonterminal expansion is framed as a sentence
//! `[START, c1, .., ck, END]` and scored by an order-n backoff model.
//! Training keeps one model per observed parent label plus one global
//! model over all expansions; scoring interpolates the two per
//! position, in the linear domain, with a fixed weight on the parent
//! side. Lexical emissions are routed to a [`TagWordModel`] instead.
//!
//! Labels are interned into a [`SymbolTable`] owned by the counter and
//! frozen into the trained model. Nonterminal labels form a closed
//! vocabulary: a label that fails to resolve at scoring time is logged
//! as a defect and scored through the least-specific path available.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::check::{CheckReport, ModelSums};
use crate::error::ModelError;
use crate::event::{tree_events, Event, EventOptions};
use crate::lexical::{TagWordCounts, TagWordModel};
use crate::ngram::{Discounting, NgramCounter, NgramLm};
use crate::prob::{log10_interp, LOG10_ZERO};
use crate::symbol::{Sym, SymbolTable};
use crate::tree::Tree;
use crate::Config;

/// Generic sequence start symbol.
pub const START_LABEL: &str = "<s>";
/// Sequence end symbol.
pub const END_LABEL: &str = "</s>";

/// Placeholder id for labels that fail to resolve at scoring time. It
/// is never interned, so every table lookup on it misses.
const NO_SYM: Sym = Sym::MAX;

/// Accumulates framed expansion counts and lexical pair counts from a
/// training corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceCounter {
    order: usize,
    parent: bool,
    parent_start: bool,
    digit2at: bool,
    symbols: SymbolTable,
    start: Sym,
    end: Sym,
    global: NgramCounter,
    by_parent: AHashMap<Sym, NgramCounter>,
    lexical: TagWordCounts,
}

impl SequenceCounter {
    pub fn new(cfg: &Config) -> Self {
        let order = cfg.order.max(1);
        let mut symbols = SymbolTable::new();
        let start = symbols.intern(START_LABEL);
        let end = symbols.intern(END_LABEL);
        Self {
            order,
            parent: cfg.parent,
            parent_start: cfg.parent_start,
            digit2at: cfg.digit2at,
            symbols,
            start,
            end,
            global: NgramCounter::new(order),
            by_parent: AHashMap::new(),
            lexical: TagWordCounts::new(),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn parent_count(&self) -> usize {
        self.by_parent.len()
    }

    /// Extracts the event stream of one tree and counts every event.
    pub fn observe_tree(&mut self, tree: &Tree) -> Result<(), ModelError> {
        let opts = EventOptions {
            terminal_unigrams: false,
            digit2at: self.digit2at,
        };
        for ev in tree_events(tree, &opts)? {
            match ev {
                Event::Lexical { tag, word } => {
                    let t = self.symbols.intern(&tag);
                    let w = self.symbols.intern(&word);
                    self.lexical.count(t, w);
                }
                Event::Production { parent, children } => {
                    let p = self.symbols.intern(&parent);
                    let syms: Vec<Sym> =
                        children.iter().map(|c| self.symbols.intern(c)).collect();
                    self.observe(p, &syms);
                }
            }
        }
        Ok(())
    }

    /// Counts one framed expansion into the global model and, when
    /// parent conditioning is on, into the parent's own model, created
    /// on first sight.
    pub fn observe(&mut self, parent: Sym, children: &[Sym]) {
        let start = if self.parent_start {
            self.start_for(parent)
        } else {
            self.start
        };
        let mut sent = Vec::with_capacity(children.len() + 2);
        sent.push(start);
        sent.extend_from_slice(children);
        sent.push(self.end);

        self.global.count_text(&sent, 1);
        if self.parent {
            self.by_parent
                .entry(parent)
                .or_insert_with(|| NgramCounter::new(self.order))
                .count_text(&sent, 1);
        }
    }

    fn start_for(&mut self, parent: Sym) -> Sym {
        let name = format!("<s:{}>", self.symbols.name_or(parent, "?"));
        self.symbols.intern(&name)
    }

    /// Merges another counter trained over a different corpus shard.
    ///
    /// The other shard's symbol ids are remapped by name into this
    /// registry before its counts are summed in, so shards may be
    /// counted fully independently.
    pub fn merge(&mut self, other: SequenceCounter) {
        let mut map = vec![NO_SYM; other.symbols.len()];
        for (id, name) in other.symbols.iter() {
            map[id as usize] = self.symbols.intern(name);
        }

        remap_ngrams(&mut self.global, &other.global, &map);
        for (p, counter) in other.by_parent.iter() {
            let np = map[*p as usize];
            let dst = self
                .by_parent
                .entry(np)
                .or_insert_with(|| NgramCounter::new(self.order));
            remap_ngrams(dst, counter, &map);
        }
        for ((t, w), c) in other.lexical.iter() {
            self.lexical.add(map[t as usize], map[w as usize], c);
        }
    }

    /// Finalizes all counts into a frozen, scorable model.
    pub fn train(mut self, cfg: &Config) -> SequenceModel {
        let unk = cfg
            .unk_word
            .as_deref()
            .filter(|w| !w.is_empty())
            .map(|w| self.symbols.intern(w));
        let discounting = if cfg.witten_bell {
            Discounting::WittenBell
        } else {
            Discounting::Fixed(cfg.fixed_discount)
        };

        let global = self.global.train_lm(discounting);
        let by_parent: AHashMap<Sym, NgramLm> = self
            .by_parent
            .into_iter()
            .map(|(p, c)| (p, c.train_lm(discounting)))
            .collect();
        let lexical = self
            .lexical
            .train(cfg.uni_witten_bell, cfg.fixed_backoff, unk);

        info!(
            contexts = global.context_count(),
            parents = by_parent.len(),
            tags = lexical.tag_count(),
            words = lexical.word_count(),
            "trained sequence model"
        );

        SequenceModel {
            order: self.order,
            parent: self.parent,
            parent_start: self.parent_start,
            parent_alpha: cfg.parent_alpha,
            symbols: self.symbols,
            start: self.start,
            end: self.end,
            global,
            by_parent,
            lexical,
        }
    }
}

fn remap_ngrams(dst: &mut NgramCounter, src: &NgramCounter, map: &[Sym]) {
    for (ctx, table) in src.iter() {
        let new_ctx: Vec<Sym> = ctx.iter().map(|s| map[*s as usize]).collect();
        for (w, c) in table.iter() {
            dst.add_ngram(new_ctx.clone(), map[*w as usize], c);
        }
    }
}

/// Trained hierarchical sequence model. All tables are read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceModel {
    order: usize,
    parent: bool,
    parent_start: bool,
    parent_alpha: f64,
    symbols: SymbolTable,
    start: Sym,
    end: Sym,
    global: NgramLm,
    by_parent: AHashMap<Sym, NgramLm>,
    lexical: TagWordModel,
}

impl SequenceModel {
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn parent_count(&self) -> usize {
        self.by_parent.len()
    }

    /// The parent-agnostic sequence model.
    pub fn global(&self) -> &NgramLm {
        &self.global
    }

    /// The lexical emission model.
    pub fn lexical(&self) -> &TagWordModel {
        &self.lexical
    }

    /// Scores one event. The flag is false exactly for lexical events
    /// that fell through to the unknown-word penalty; production events
    /// always score.
    pub fn evaluate(&self, ev: &Event) -> (f64, bool) {
        match ev {
            Event::Lexical { tag, word } => {
                let w = self.symbols.resolve(word);
                match self.symbols.resolve(tag) {
                    Some(t) => self.lexical.logp_tag_word_known(t, w),
                    None => {
                        warn!(tag = %tag, "preterminal tag missing from closed vocabulary");
                        (self.lexical.logp_unk(), false)
                    }
                }
            }
            Event::Production { parent, children } => {
                let p = self.symbols.resolve(parent).unwrap_or_else(|| {
                    warn!(label = %parent, "parent label missing from closed vocabulary");
                    NO_SYM
                });
                let syms: Vec<Sym> = children
                    .iter()
                    .map(|c| {
                        self.symbols.resolve(c).unwrap_or_else(|| {
                            warn!(label = %c, "child label missing from closed vocabulary");
                            NO_SYM
                        })
                    })
                    .collect();
                (self.score_production(p, &syms), true)
            }
        }
    }

    /// Scores a framed child sequence under its parent.
    ///
    /// With a dedicated parent model present, each position blends the
    /// parent-specific and global scores in the linear domain. Without
    /// one, the whole framed sentence goes to the global model in one
    /// call.
    pub fn score_production(&self, parent: Sym, children: &[Sym]) -> f64 {
        let sent = self.framed(parent, children);
        if self.parent {
            if let Some(dist) = self.by_parent.get(&parent) {
                let mut total = 0.0;
                for i in 1..sent.len() {
                    let (pp, pbo) = dist.score_word(&sent, i);
                    let (bp, bbo) = self.global.score_word(&sent, i);
                    let lp = log10_interp(pp + pbo, bp + bbo, self.parent_alpha);
                    if lp <= LOG10_ZERO {
                        warn!(
                            parent = self.symbols.name_or(parent, "?"),
                            position = i,
                            "zero interpolated probability"
                        );
                    }
                    total += lp;
                }
                return total;
            }
            debug!(
                parent = self.symbols.name_or(parent, "?"),
                "no dedicated model for parent, scoring global only"
            );
        }
        self.global.score_text(&sent, 1)
    }

    fn framed(&self, parent: Sym, children: &[Sym]) -> Vec<Sym> {
        let start = if self.parent_start {
            let name = format!("<s:{}>", self.symbols.name_or(parent, "?"));
            self.symbols.resolve(&name).unwrap_or(self.start)
        } else {
            self.start
        };
        let mut sent = Vec::with_capacity(children.len() + 2);
        sent.push(start);
        sent.extend_from_slice(children);
        sent.push(self.end);
        sent
    }

    /// Normalization audit over every trained distribution: the global
    /// model, each parent model, and the lexical model.
    pub fn check(&self, epsilon: f64) -> CheckReport {
        let mut models = Vec::new();

        let (eq1, lt1, gt1) = self.global.check_sums(epsilon);
        models.push(ModelSums {
            model: "nonterminals".to_string(),
            contexts: self.global.context_count(),
            sum_eq_1: eq1,
            sum_lt_1: lt1,
            sum_gt_1: self.render_ngram_overshoots(gt1),
        });

        let mut parents: Vec<(&Sym, &NgramLm)> = self.by_parent.iter().collect();
        parents.sort_by_key(|(p, _)| self.symbols.name_or(**p, "?"));
        for (p, lm) in parents {
            let (eq1, lt1, gt1) = lm.check_sums(epsilon);
            models.push(ModelSums {
                model: format!("parent {}", self.symbols.name_or(*p, "?")),
                contexts: lm.context_count(),
                sum_eq_1: eq1,
                sum_lt_1: lt1,
                sum_gt_1: self.render_ngram_overshoots(gt1),
            });
        }

        let (eq1, lt1, gt1) = self.lexical.check_sums(epsilon);
        models.push(ModelSums {
            model: "terminals".to_string(),
            contexts: self.lexical.tag_count() + 1,
            sum_eq_1: eq1,
            sum_lt_1: lt1,
            sum_gt_1: gt1
                .into_iter()
                .map(|(ctx, sum)| {
                    let name = match ctx {
                        Some(t) => self.symbols.name_or(t, "?").to_string(),
                        None => "(word marginal)".to_string(),
                    };
                    (name, sum)
                })
                .collect(),
        });

        CheckReport { epsilon, models }
    }

    fn render_ngram_overshoots(&self, gt1: Vec<(Vec<Sym>, f64)>) -> Vec<(String, f64)> {
        gt1.into_iter()
            .map(|(ctx, sum)| {
                let name = if ctx.is_empty() {
                    "(unigram)".to_string()
                } else {
                    ctx.iter()
                        .map(|s| self.symbols.name_or(*s, "?"))
                        .collect::<Vec<_>>()
                        .join(" ")
                };
                (name, sum)
            })
            .collect()
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        Ok(())
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(bincode::deserialize_from(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<Tree> {
        [
            "(S (NP (DT the) (NN dog)) (VP (VBZ barks)))",
            "(S (NP (DT the) (NN cat)) (VP (VBZ sleeps)))",
            "(S (NP (NN dog)) (VP (VBZ barks) (NP (DT the) (NN cat))))",
        ]
        .iter()
        .map(|s| Tree::parse(s).unwrap())
        .collect()
    }

    fn trained(cfg: &Config) -> SequenceModel {
        let mut counter = SequenceCounter::new(cfg);
        for t in corpus() {
            counter.observe_tree(&t).unwrap();
        }
        counter.train(cfg)
    }

    #[test]
    fn production_scores_are_finite_and_negative() {
        let cfg = Config::default();
        let m = trained(&cfg);
        let ev = Event::Production {
            parent: "S".into(),
            children: vec!["NP".into(), "VP".into()],
        };
        let (lp, scored) = m.evaluate(&ev);
        assert!(scored);
        assert!(lp.is_finite());
        assert!(lp < 0.0);
    }

    #[test]
    fn lexical_events_route_to_tag_word_model() {
        let cfg = Config::default();
        let m = trained(&cfg);
        let (lp, known) = m.evaluate(&Event::Lexical {
            tag: "NN".into(),
            word: "\"dog\"".into(),
        });
        assert!(known);
        assert!(lp.is_finite() && lp < 0.0);

        let (lp_unk, known) = m.evaluate(&Event::Lexical {
            tag: "NN".into(),
            word: "\"zebra\"".into(),
        });
        assert!(!known);
        assert_eq!(lp_unk, m.lexical().logp_unk());
    }

    #[test]
    fn unseen_parent_scores_through_global_model() {
        let cfg = Config::default();
        let m = trained(&cfg);
        // FRAG never occurs as a parent, or anywhere
        let (lp, scored) = m.evaluate(&Event::Production {
            parent: "FRAG".into(),
            children: vec!["NP".into(), "VP".into()],
        });
        assert!(scored);
        assert!(lp.is_finite());
    }

    #[test]
    fn parent_off_matches_global_score_exactly() {
        let mut cfg = Config::default();
        cfg.parent = false;
        let m = trained(&cfg);
        let np = m.symbols().resolve("NP").unwrap();
        let dt = m.symbols().resolve("DT").unwrap();
        let nn = m.symbols().resolve("NN").unwrap();
        let got = m.score_production(np, &[dt, nn]);
        let sent = vec![
            m.symbols().resolve(START_LABEL).unwrap(),
            dt,
            nn,
            m.symbols().resolve(END_LABEL).unwrap(),
        ];
        let want = m.global().score_text(&sent, 1);
        assert!((got - want).abs() < 1e-12);
    }

    #[test]
    fn interpolation_blends_parent_and_global() {
        // with alpha = 1 the blend equals the parent-specific score,
        // with alpha = 0 it equals the global score
        let mut cfg = Config::default();
        cfg.order = 2;

        cfg.parent_alpha = 0.0;
        let m0 = trained(&cfg);
        let np = m0.symbols().resolve("NP").unwrap();
        let dt = m0.symbols().resolve("DT").unwrap();
        let nn = m0.symbols().resolve("NN").unwrap();
        let blended0 = m0.score_production(np, &[dt, nn]);
        let sent = vec![
            m0.symbols().resolve(START_LABEL).unwrap(),
            dt,
            nn,
            m0.symbols().resolve(END_LABEL).unwrap(),
        ];
        let global_only = m0.global().score_text(&sent, 1);
        assert!((blended0 - global_only).abs() < 1e-9);

        cfg.parent_alpha = 0.999;
        let m1 = trained(&cfg);
        let blended1 = m1.score_production(np, &[dt, nn]);
        assert!(blended1 > blended0 - 1e-9);
    }

    #[test]
    fn parent_specific_start_symbols() {
        let mut cfg = Config::default();
        cfg.parent_start = true;
        let m = trained(&cfg);
        assert!(m.symbols().resolve("<s:NP>").is_some());
        assert!(m.symbols().resolve("<s:S>").is_some());
        let (lp, scored) = m.evaluate(&Event::Production {
            parent: "NP".into(),
            children: vec!["DT".into(), "NN".into()],
        });
        assert!(scored);
        assert!(lp.is_finite() && lp < 0.0);
    }

    #[test]
    fn merged_counters_match_single_pass() {
        let cfg = Config::default();
        let trees = corpus();

        let mut whole = SequenceCounter::new(&cfg);
        for t in &trees {
            whole.observe_tree(t).unwrap();
        }

        // shards observe in a different order so interned ids differ
        let mut a = SequenceCounter::new(&cfg);
        a.observe_tree(&trees[2]).unwrap();
        let mut b = SequenceCounter::new(&cfg);
        b.observe_tree(&trees[0]).unwrap();
        b.observe_tree(&trees[1]).unwrap();
        a.merge(b);

        let m1 = whole.train(&cfg);
        let m2 = a.train(&cfg);
        let probes = [
            Event::Production {
                parent: "S".into(),
                children: vec!["NP".into(), "VP".into()],
            },
            Event::Production {
                parent: "VP".into(),
                children: vec!["VBZ".into(), "NP".into()],
            },
            Event::Lexical {
                tag: "NN".into(),
                word: "\"cat\"".into(),
            },
            Event::Lexical {
                tag: "NN".into(),
                word: "\"zebra\"".into(),
            },
        ];
        for ev in &probes {
            let (x, kx) = m1.evaluate(ev);
            let (y, ky) = m2.evaluate(ev);
            assert_eq!(kx, ky, "flag mismatch on {ev:?}");
            assert!((x - y).abs() < 1e-9, "score mismatch on {ev:?}: {x} vs {y}");
        }
    }

    #[test]
    fn check_reports_normalized_contexts() {
        let cfg = Config::default();
        let m = trained(&cfg);
        let report = m.check(cfg.check_epsilon);
        // global, one per parent, terminals
        assert_eq!(report.models.len(), 2 + m.parent_count());
        for sums in &report.models {
            assert!(sums.sum_gt_1.is_empty(), "overshoot in {}", sums.model);
            assert!(sums.contexts > 0);
            assert_eq!(
                sums.contexts,
                sums.sum_eq_1 + sums.sum_lt_1 + sums.sum_gt_1.len()
            );
        }
    }

    #[test]
    fn bincode_round_trip_preserves_scores() {
        let cfg = Config::default();
        let m = trained(&cfg);
        let mut path = std::env::temp_dir();
        path.push(format!(
            "seq_model_rt_{}.bin",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        m.save_bincode(&path).unwrap();
        let back = SequenceModel::load_bincode(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let ev = Event::Production {
            parent: "NP".into(),
            children: vec!["DT".into(), "NN".into()],
        };
        let (x, _) = m.evaluate(&ev);
        let (y, _) = back.evaluate(&ev);
        assert_eq!(x, y);
        assert_eq!(back.order(), m.order());
        assert_eq!(back.parent_count(), m.parent_count());
    }
}
