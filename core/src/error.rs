//! Error types shared across the model crates.

use thiserror::Error;

/// Errors raised while loading tables, parsing trees, or serializing models.
///
/// Malformed count-table lines and I/O failures are fatal to the operation
/// that hit them. Tree parse failures are per-record: callers skip the
/// offending line and keep going.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A count-table line that does not match the `event \t count \t norm`
    /// layout, or whose numeric fields cannot produce a finite cost.
    #[error("{path}:{line}: bad count-table line: {msg}")]
    Format {
        path: String,
        line: usize,
        msg: String,
    },

    /// A bracketed tree that could not be parsed.
    #[error("tree parse error at offset {pos}: {msg}")]
    Parse { pos: usize, msg: String },

    /// A structurally valid tree that violates the node taxonomy, e.g. a
    /// nonterminal with several children one of which is a bare word.
    #[error("ill-formed tree node: {msg}")]
    Node { msg: String },

    /// A compiled table whose index and payload disagree.
    #[error("corrupt compiled table: {msg}")]
    Corrupt { msg: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Index(#[from] fst::Error),
}
