//! Production costs from a pre-aggregated count table.
//!
//! Rows arrive as `event-string TAB count TAB normalizer` and are
//! stored as `-log10(count / normalizer)` keyed by the event's full
//! string form. An exact row wins; otherwise each child label falls
//! back to its own single-token marginal row, unseen children are
//! free but counted, and the event is marked as backed off under its
//! parent. No mass is reserved for unknowns here, unlike the trained
//! emission model.
//!
//! A table can be compiled into an fst index plus a bincode cost
//! vector for compact storage and loaded back without the original
//! text file.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read};
use std::path::Path;

use ahash::{AHashMap, AHashSet};
use fst::{Map, MapBuilder, Streamer};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::check::{CheckReport, ModelSums};
use crate::error::ModelError;
use crate::event::Event;
use crate::prob::counts_to_cost;

/// Sentinel row carrying the grand nonterminal total.
pub const TOTAL_NT: &str = "(TOTAL_NT)";
/// Sentinel row carrying the grand lexical total.
pub const TOTAL_LEX: &str = "(TOTAL_LEX)";

static FEAT_SPECIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[=\s]").unwrap());

/// Replaces characters that would break `name=value` feature syntax.
pub fn escape_feature_name(s: &str) -> String {
    FEAT_SPECIAL.replace_all(s, "_").into_owned()
}

/// Cost of one event under the count table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventCost {
    /// Exact row cost, or the summed child marginals under backoff.
    pub cost: f64,
    /// Children found nowhere in the table.
    pub oov: u32,
    /// The event's parent label when the exact row was absent.
    pub backoff: Option<String>,
}

/// On-disk payload stored beside the fst index.
#[derive(Serialize, Deserialize)]
struct CompiledCosts {
    prefix: String,
    costs: Vec<f64>,
    total_nt: Option<f64>,
    total_lex: Option<f64>,
}

/// Count-table production-cost model.
#[derive(Debug, Clone)]
pub struct PcfgModel {
    prefix: String,
    costs: AHashMap<String, f64>,
    parents: AHashSet<String>,
    total_nt: Option<f64>,
    total_lex: Option<f64>,
}

impl PcfgModel {
    /// Reads a tab-separated count table. Any malformed line is fatal.
    pub fn read<P: AsRef<Path>>(path: P, prefix: &str) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut model = Self {
            prefix: prefix.to_string(),
            costs: AHashMap::new(),
            parents: AHashSet::new(),
            total_nt: None,
            total_lex: None,
        };
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            model.read_line(&line, &shown, i + 1)?;
        }
        info!(
            path = %shown,
            rows = model.costs.len(),
            parents = model.parents.len(),
            "loaded count table"
        );
        Ok(model)
    }

    fn read_line(&mut self, line: &str, path: &str, n: usize) -> Result<(), ModelError> {
        let bad = |msg: String| ModelError::Format {
            path: path.to_string(),
            line: n,
            msg,
        };

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 3 {
            return Err(bad(format!(
                "expected 3 tab-separated fields, got {}",
                fields.len()
            )));
        }
        let evs = fields[0];
        let count: f64 = fields[1]
            .parse()
            .map_err(|_| bad(format!("bad count field {:?}", fields[1])))?;
        let norm: f64 = fields[2]
            .parse()
            .map_err(|_| bad(format!("bad normalizer field {:?}", fields[2])))?;

        if evs == TOTAL_NT {
            self.total_nt = Some(norm);
            return Ok(());
        }
        if evs == TOTAL_LEX {
            self.total_lex = Some(norm);
            return Ok(());
        }
        if evs.is_empty() {
            return Err(bad("empty event string".to_string()));
        }
        if !(count > 0.0 && count.is_finite() && norm > 0.0 && norm.is_finite()) {
            return Err(bad(format!(
                "count and normalizer must be positive, got {count} / {norm}"
            )));
        }

        let mut tokens = evs.split(' ');
        let lhs = tokens.next().unwrap_or("");
        if lhs.starts_with('"') && tokens.next().is_some() {
            return Err(bad(format!(
                "quoted lexical row must be a single token: {evs:?}"
            )));
        }

        if self
            .costs
            .insert(evs.to_string(), counts_to_cost(count, norm))
            .is_some()
        {
            warn!(path = %path, line = n, event = %evs, "duplicate event row overwrites earlier cost");
        }
        if !lhs.starts_with('"') {
            self.parents.insert(lhs.to_string());
        }
        Ok(())
    }

    /// Scores one event: the exact row if present, else the sum of
    /// each child's marginal row. A parent label absent from the whole
    /// table never occurred in training and is reported as a defect.
    pub fn cost(&self, ev: &Event) -> EventCost {
        let evs = ev.event_string();
        if let Some(&c) = self.costs.get(&evs) {
            return EventCost {
                cost: c,
                oov: 0,
                backoff: None,
            };
        }

        let parent = ev.parent();
        if !self.parents.contains(parent) {
            warn!(parent = %parent, "parent label missing from count table");
        }
        debug!(event = %evs, "count-table backoff");

        let mut cost = 0.0;
        let mut oov = 0u32;
        for child in ev.children() {
            match self.costs.get(child) {
                Some(&c) => cost += c,
                None => {
                    debug!(label = %child, "count-table oov child");
                    oov += 1;
                }
            }
        }
        EventCost {
            cost,
            oov,
            backoff: Some(parent.to_string()),
        }
    }

    /// Folds per-event costs into a sparse feature vector: the
    /// aggregate cost always, the OOV total and per-parent backoff
    /// indicators only when nonzero.
    pub fn accumulate_features(&self, costs: &[EventCost]) -> Vec<(String, f64)> {
        let mut sum_cost = 0.0;
        let mut sum_oov = 0u64;
        let mut by_label: AHashMap<&str, u64> = AHashMap::new();
        for ec in costs {
            sum_cost += ec.cost;
            sum_oov += u64::from(ec.oov);
            if let Some(label) = &ec.backoff {
                *by_label.entry(label.as_str()).or_insert(0) += 1;
            }
        }

        let mut feats = vec![(self.prefix.clone(), sum_cost)];
        if sum_oov > 0 {
            feats.push((self.oov_feature(), sum_oov as f64));
        }
        let mut labels: Vec<(&str, u64)> = by_label.into_iter().collect();
        labels.sort();
        for (label, count) in labels {
            feats.push((self.bo_feature(label), count as f64));
        }
        feats
    }

    /// Feature name for a backoff-triggering parent label.
    pub fn bo_feature(&self, label: &str) -> String {
        format!("{}-bo-{}", self.prefix, escape_feature_name(label))
    }

    pub fn oov_feature(&self) -> String {
        format!("{}-oov", self.prefix)
    }

    /// Sums realized probability mass per normalization group: one
    /// group per expanding parent, one for the nonterminal marginal
    /// rows, one for the quoted lexical rows.
    pub fn check_sums(&self, tolerance: f64) -> (usize, usize, Vec<(String, f64)>) {
        let mut groups: AHashMap<String, f64> = AHashMap::new();
        for (key, &cost) in self.costs.iter() {
            let mut tokens = key.split(' ');
            let lhs = tokens.next().unwrap_or("");
            let group = if tokens.next().is_none() {
                if lhs.starts_with('"') {
                    "(lexical unigrams)".to_string()
                } else {
                    "(nonterminal unigrams)".to_string()
                }
            } else {
                lhs.to_string()
            };
            *groups.entry(group).or_insert(0.0) += 10f64.powf(-cost);
        }

        let mut entries: Vec<(String, f64)> = groups.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut eq1 = 0;
        let mut lt1 = 0;
        let mut gt1 = Vec::new();
        for (name, sum) in entries {
            if (sum - 1.0).abs() <= tolerance {
                eq1 += 1;
            } else if sum < 1.0 {
                lt1 += 1;
            } else {
                gt1.push((name, sum));
            }
        }
        (eq1, lt1, gt1)
    }

    pub fn check(&self, tolerance: f64) -> CheckReport {
        let (eq1, lt1, gt1) = self.check_sums(tolerance);
        CheckReport {
            epsilon: tolerance,
            models: vec![ModelSums {
                model: "count table".to_string(),
                contexts: eq1 + lt1 + gt1.len(),
                sum_eq_1: eq1,
                sum_lt_1: lt1,
                sum_gt_1: gt1,
            }],
        }
    }

    /// Writes the table as an fst index plus a bincode cost vector.
    pub fn compile<P: AsRef<Path>>(&self, fst_path: P, costs_path: P) -> Result<(), ModelError> {
        let mut rows: Vec<(&String, f64)> = self.costs.iter().map(|(k, &c)| (k, c)).collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));

        let mut builder = MapBuilder::new(Vec::new())?;
        let mut flat = Vec::with_capacity(rows.len());
        for (i, (key, cost)) in rows.iter().enumerate() {
            builder.insert(key.as_bytes(), i as u64)?;
            flat.push(*cost);
        }
        std::fs::write(fst_path.as_ref(), builder.into_inner()?)?;

        let payload = CompiledCosts {
            prefix: self.prefix.clone(),
            costs: flat,
            total_nt: self.total_nt,
            total_lex: self.total_lex,
        };
        let file = File::create(costs_path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &payload)?;
        Ok(())
    }

    /// Loads a compiled table back into queryable form.
    pub fn load_compiled<P: AsRef<Path>>(fst_path: P, costs_path: P) -> Result<Self, ModelError> {
        let map = {
            let mut f = File::open(fst_path.as_ref())?;
            let mut buf = Vec::new();
            f.read_to_end(&mut buf)?;
            Map::new(buf)?
        };
        let payload: CompiledCosts = {
            let file = File::open(costs_path.as_ref())?;
            let reader = BufReader::new(file);
            bincode::deserialize_from(reader)?
        };
        if map.len() != payload.costs.len() {
            return Err(ModelError::Corrupt {
                msg: format!(
                    "index has {} keys but cost vector has {}",
                    map.len(),
                    payload.costs.len()
                ),
            });
        }

        let mut costs = AHashMap::with_capacity(payload.costs.len());
        let mut parents = AHashSet::new();
        let mut stream = map.stream();
        while let Some((kbytes, idx)) = stream.next() {
            let key = String::from_utf8_lossy(kbytes).into_owned();
            let lhs = key.split(' ').next().unwrap_or("");
            if !lhs.is_empty() && !lhs.starts_with('"') {
                parents.insert(lhs.to_string());
            }
            costs.insert(key, payload.costs[idx as usize]);
        }

        Ok(Self {
            prefix: payload.prefix,
            costs,
            parents,
            total_nt: payload.total_nt,
            total_lex: payload.total_lex,
        })
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn total_nt(&self) -> Option<f64> {
        self.total_nt
    }

    pub fn total_lex(&self) -> Option<f64> {
        self.total_lex
    }

    /// Raw cost of one event-string key.
    pub fn cost_of(&self, key: &str) -> Option<f64> {
        self.costs.get(key).copied()
    }

    pub fn parent_known(&self, label: &str) -> bool {
        self.parents.contains(label)
    }
}
