//! Bracketed syntax trees.
//!
//! One tree per corpus line, in the usual parenthesized form:
//!
//! ```text
//! (S (NP (DT the) (NN dog)) (VP (VBZ barks)))
//! ```
//!
//! Leaves are bare tokens and every parenthesized node carries a label.
//! Atoms are NFC-normalized at parse time so that downstream tables see
//! a single spelling per token.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::utils;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(|\)|[^\s()]+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub label: String,
    pub children: Vec<Tree>,
}

impl Tree {
    pub fn leaf(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            children: Vec::new(),
        }
    }

    pub fn node(label: impl Into<String>, children: Vec<Tree>) -> Self {
        Self {
            label: label.into(),
            children,
        }
    }

    /// Parses a single bracketed tree.
    ///
    /// Rejects empty input, unbalanced brackets, childless bracketed
    /// nodes, and trailing material after the root closes.
    pub fn parse(text: &str) -> Result<Tree, ModelError> {
        let mut stack: Vec<Tree> = Vec::new();
        let mut root: Option<Tree> = None;
        let mut want_label = false;

        for m in TOKEN_RE.find_iter(text) {
            let (pos, tok) = (m.start(), m.as_str());
            if root.is_some() {
                return Err(ModelError::Parse {
                    pos,
                    msg: format!("trailing material after root tree: {tok:?}"),
                });
            }
            match tok {
                "(" => {
                    if want_label {
                        return Err(ModelError::Parse {
                            pos,
                            msg: "expected node label after '('".into(),
                        });
                    }
                    stack.push(Tree::leaf(""));
                    want_label = true;
                }
                ")" => {
                    if want_label {
                        return Err(ModelError::Parse {
                            pos,
                            msg: "empty node '()'".into(),
                        });
                    }
                    let node = match stack.pop() {
                        Some(n) => n,
                        None => {
                            return Err(ModelError::Parse {
                                pos,
                                msg: "unbalanced ')'".into(),
                            })
                        }
                    };
                    if node.children.is_empty() {
                        return Err(ModelError::Parse {
                            pos,
                            msg: format!("bracketed node {:?} has no children", node.label),
                        });
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                atom => {
                    let atom = utils::normalize(atom);
                    if want_label {
                        match stack.last_mut() {
                            Some(open) => open.label = atom,
                            None => unreachable!("label state without an open node"),
                        }
                        want_label = false;
                    } else if stack.is_empty() {
                        return Err(ModelError::Parse {
                            pos,
                            msg: format!("bare token {atom:?} outside any tree"),
                        });
                    } else if let Some(open) = stack.last_mut() {
                        open.children.push(Tree::leaf(atom));
                    }
                }
            }
        }

        if !stack.is_empty() {
            return Err(ModelError::Parse {
                pos: text.len(),
                msg: format!("unclosed '(' ({} open)", stack.len()),
            });
        }
        root.ok_or(ModelError::Parse {
            pos: 0,
            msg: "no tree found".into(),
        })
    }

    /// A leaf: a surface word.
    pub fn is_terminal(&self) -> bool {
        self.children.is_empty()
    }

    /// A tag node dominating exactly one word.
    pub fn is_preterminal(&self) -> bool {
        self.children.len() == 1 && self.children[0].is_terminal()
    }

    /// Total node count, leaves included.
    pub fn size(&self) -> usize {
        self.preorder().count()
    }

    /// Number of leaves.
    pub fn word_count(&self) -> usize {
        self.preorder().filter(|n| n.is_terminal()).count()
    }

    pub fn preorder(&self) -> Preorder<'_> {
        Preorder { stack: vec![self] }
    }

    /// The label as it appears in events: terminal words quoted (with
    /// optional digit masking), nonterminal labels with literal brackets
    /// rewritten to `-LRB-`/`-RRB-`.
    pub fn canonical_label(&self, digit2at: bool) -> String {
        if self.is_terminal() {
            quote_word(&self.label, digit2at)
        } else {
            bracket_label(&self.label)
        }
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_terminal() {
            return write!(f, "{}", self.label);
        }
        write!(f, "({}", self.label)?;
        for c in &self.children {
            write!(f, " {c}")?;
        }
        write!(f, ")")
    }
}

/// Quotes a surface word, optionally masking digits with `@`.
pub fn quote_word(word: &str, digit2at: bool) -> String {
    static DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").unwrap());
    if digit2at {
        format!("\"{}\"", DIGIT_RE.replace_all(word, "@"))
    } else {
        format!("\"{word}\"")
    }
}

/// Rewrites literal brackets in a nonterminal label so the label stays a
/// single token in event strings and count tables.
pub fn bracket_label(label: &str) -> String {
    if label.contains('(') || label.contains(')') {
        label.replace('(', "-LRB-").replace(')', "-RRB-")
    } else {
        label.to_string()
    }
}

/// Iterator over nodes in preorder.
pub struct Preorder<'a> {
    stack: Vec<&'a Tree>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = &'a Tree;

    fn next(&mut self) -> Option<&'a Tree> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
