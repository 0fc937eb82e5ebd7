//! Interned symbols.
//!
//! Sequence models key every table on small integer ids rather than on
//! strings. The registry grows during training (`intern`) and is frozen
//! inside a trained model, where lookups go through `resolve` and a miss
//! means the label never occurred in the training corpus.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Interned symbol id.
pub type Sym = u32;

/// Bidirectional string/id registry.
///
/// Serialized as the bare name list; the reverse map is rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SymbolTable {
    names: Vec<String>,
    ids: AHashMap<String, Sym>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, inserting it if unseen.
    pub fn intern(&mut self, name: &str) -> Sym {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as Sym;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Returns the id for `name` if it was interned during training.
    pub fn resolve(&self, name: &str) -> Option<Sym> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, sym: Sym) -> Option<&str> {
        self.names.get(sym as usize).map(|s| s.as_str())
    }

    /// Rendering helper for log lines and reports.
    pub fn name_or(&self, sym: Sym, fallback: &'static str) -> &str {
        self.name(sym).unwrap_or(fallback)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Sym, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, s)| (i as Sym, s.as_str()))
    }
}

impl From<Vec<String>> for SymbolTable {
    fn from(names: Vec<String>) -> Self {
        let ids = names
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as Sym))
            .collect();
        Self { names, ids }
    }
}

impl From<SymbolTable> for Vec<String> {
    fn from(t: SymbolTable) -> Self {
        t.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut t = SymbolTable::new();
        let a = t.intern("NP");
        let b = t.intern("VP");
        assert_ne!(a, b);
        assert_eq!(t.intern("NP"), a);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn resolve_misses_unseen_labels() {
        let mut t = SymbolTable::new();
        t.intern("NP");
        assert_eq!(t.resolve("NP"), Some(0));
        assert_eq!(t.resolve("XX"), None);
        assert_eq!(t.name(0), Some("NP"));
        assert_eq!(t.name(7), None);
    }

    #[test]
    fn serde_round_trip_preserves_ids() {
        let mut t = SymbolTable::new();
        for s in ["S", "NP", "VP", "\"dog\""] {
            t.intern(s);
        }
        let bytes = bincode::serialize(&t).unwrap();
        let back: SymbolTable = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.len(), 4);
        assert_eq!(back.resolve("VP"), t.resolve("VP"));
        assert_eq!(back.name(3), Some("\"dog\""));
    }
}
