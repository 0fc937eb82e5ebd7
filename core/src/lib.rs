//! treegram-core
//!
//! Hierarchical grammar models over bracketed trees: order-n backoff
//! sequence models per parent label, smoothed tag/word emissions, and a
//! count-table cost model, plus the consistency checks that keep their
//! distributions honest.
//!
//! Public API:
//! - `Tree` - Bracketed tree parsing and traversal
//! - `Event` - Lexical and production events extracted from trees
//! - `SequenceCounter` / `SequenceModel` - Parent-conditioned backoff scoring
//! - `Evaluator` / `EvalReport` - Corpus evaluation with a score cache
//! - `PcfgModel` - Count-table production costs and sparse features
//! - `CheckReport` - Normalization audits
//! - `Config` - Training and scoring knobs
use serde::{Deserialize, Serialize};

pub mod check;
pub use check::{CheckReport, ModelSums};

pub mod error;
pub use error::ModelError;

pub mod event;
pub use event::{tree_events, Event, EventOptions};

pub mod eval;
pub use eval::{EvalReport, Evaluator};

pub mod grammar;
pub use grammar::{escape_feature_name, EventCost, PcfgModel, TOTAL_LEX, TOTAL_NT};

pub mod lexical;
pub use lexical::{TagWordCounts, TagWordModel};

pub mod ngram;
pub use ngram::{Discounting, NgramCounter, NgramLm};

pub mod prob;
pub use prob::{Counts, LogProbs, Probs, LOG10_ZERO};

pub mod sequence;
pub use sequence::{SequenceCounter, SequenceModel, END_LABEL, START_LABEL};

pub mod symbol;
pub use symbol::{Sym, SymbolTable};

pub mod tree;
pub use tree::Tree;

/// Training and scoring configuration shared by every model.
///
/// Only corpus-independent knobs live here. Input paths and output
/// choices belong to the driver binaries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Markov order of the child-sequence models
    pub order: usize,

    /// Keep a dedicated sequence model per parent label
    pub parent: bool,
    /// Linear weight on the parent-specific model when interpolating
    /// with the global one (0.0 to 1.0)
    pub parent_alpha: f64,
    /// Frame child sequences with a distinct start symbol per parent
    /// label instead of the shared one
    pub parent_start: bool,

    /// Mask digits in terminal words with `@`
    pub digit2at: bool,

    // Sequence-model smoothing
    /// Witten-Bell discounting for the child-sequence models; when
    /// false, hold out `fixed_discount` per context instead
    pub witten_bell: bool,
    /// Reserved mass per context when `witten_bell` is false (0.0 to 1.0)
    pub fixed_discount: f64,

    // Emission-model smoothing
    /// Witten-Bell backoff weights per tag in the emission model; when
    /// false, use `fixed_backoff` for every tag
    pub uni_witten_bell: bool,
    /// Per-tag backoff weight when `uni_witten_bell` is false
    pub fixed_backoff: f64,
    /// Sentinel that receives the reserved unknown-word mass; None or
    /// an empty string disables the reservation entirely
    pub unk_word: Option<String>,

    // Consistency checking
    /// Tolerance when testing trained contexts for mass 1
    pub check_epsilon: f64,
    /// Looser tolerance for count-table groups, whose rows may
    /// legitimately overlap
    pub pcfg_sum_tolerance: f64,

    // Evaluation
    /// How many unknown (tag, word) pairs the report keeps
    pub top_unknown: usize,
    /// Entries in the production-score cache; 0 disables caching
    pub score_cache_size: usize,

    /// Leading component of count-table feature names
    pub feature_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order: 5,
            parent: true,
            parent_alpha: 0.999,
            parent_start: false,
            digit2at: false,
            witten_bell: true,
            fixed_discount: 0.1,
            uni_witten_bell: true,
            fixed_backoff: 0.1,
            unk_word: Some("<unk>".to_string()),
            check_epsilon: 1e-5,
            pcfg_sum_tolerance: 1e-3,
            top_unknown: 10,
            score_cache_size: 1000,
            feature_prefix: "pcfg".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Utility helpers.
pub mod utils {
    /// Normalize input strings (NFC) and trim whitespace.
    pub fn normalize(s: &str) -> String {
        use unicode_normalization::UnicodeNormalization;
        s.nfc().collect::<String>().trim().to_string()
    }
}
