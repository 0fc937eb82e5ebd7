//! Scoring events read off a tree.
//!
//! Every internal node contributes exactly one event. A preterminal (a
//! tag over one word) becomes a lexical emission; any other internal
//! node becomes a production over its children's canonical labels. The
//! two kinds never overlap, so a node is either tag material or grammar
//! material, never both.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::tree::Tree;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// Tag emitting a quoted surface word.
    Lexical { tag: String, word: String },
    /// Nonterminal expanding to an ordered child sequence. Zero children
    /// marks a terminal-unigram event whose parent is the quoted word.
    Production {
        parent: String,
        children: Vec<String>,
    },
}

impl Event {
    /// The conditioning label: the tag of an emission, the left-hand
    /// side of a production.
    pub fn parent(&self) -> &str {
        match self {
            Event::Lexical { tag, .. } => tag,
            Event::Production { parent, .. } => parent,
        }
    }

    /// Generated labels, left to right.
    pub fn children(&self) -> impl Iterator<Item = &str> {
        let slice: Vec<&str> = match self {
            Event::Lexical { word, .. } => vec![word.as_str()],
            Event::Production { children, .. } => children.iter().map(|c| c.as_str()).collect(),
        };
        slice.into_iter()
    }

    /// Space-joined key used by count tables.
    pub fn event_string(&self) -> String {
        match self {
            Event::Lexical { tag, word } => format!("{tag} {word}"),
            Event::Production { parent, children } => {
                if children.is_empty() {
                    parent.clone()
                } else {
                    format!("{parent} {}", children.join(" "))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EventOptions {
    /// Also emit a zero-child event per surface word, for tables that
    /// keep word-unigram backoff rows.
    pub terminal_unigrams: bool,
    /// Mask digits in words with `@`.
    pub digit2at: bool,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            terminal_unigrams: false,
            digit2at: false,
        }
    }
}

/// Extracts the event sequence of `tree` in preorder.
///
/// Fails on ill-formed structure: a nonterminal that directly dominates
/// a bare word alongside other children.
pub fn tree_events(tree: &Tree, opts: &EventOptions) -> Result<Vec<Event>, ModelError> {
    let mut events = Vec::new();
    for node in tree.preorder() {
        if node.is_terminal() {
            if opts.terminal_unigrams {
                events.push(Event::Production {
                    parent: node.canonical_label(opts.digit2at),
                    children: Vec::new(),
                });
            }
            continue;
        }
        if node.is_preterminal() {
            events.push(Event::Lexical {
                tag: node.canonical_label(opts.digit2at),
                word: node.children[0].canonical_label(opts.digit2at),
            });
            continue;
        }
        let mut children = Vec::with_capacity(node.children.len());
        for c in &node.children {
            if c.is_terminal() {
                return Err(ModelError::Node {
                    msg: format!(
                        "nonterminal {:?} directly dominates word {:?}",
                        node.label, c.label
                    ),
                });
            }
            children.push(c.canonical_label(opts.digit2at));
        }
        events.push(Event::Production {
            parent: node.canonical_label(opts.digit2at),
            children,
        });
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree {
        Tree::parse("(S (NP (DT the) (NN dog)) (VP (VBZ barks)))").unwrap()
    }

    #[test]
    fn events_in_preorder() {
        let evs = tree_events(&sample(), &EventOptions::default()).unwrap();
        assert_eq!(
            evs,
            vec![
                Event::Production {
                    parent: "S".into(),
                    children: vec!["NP".into(), "VP".into()],
                },
                Event::Production {
                    parent: "NP".into(),
                    children: vec!["DT".into(), "NN".into()],
                },
                Event::Lexical {
                    tag: "DT".into(),
                    word: "\"the\"".into(),
                },
                Event::Lexical {
                    tag: "NN".into(),
                    word: "\"dog\"".into(),
                },
                Event::Production {
                    parent: "VP".into(),
                    children: vec!["VBZ".into()],
                },
                Event::Lexical {
                    tag: "VBZ".into(),
                    word: "\"barks\"".into(),
                },
            ]
        );
    }

    #[test]
    fn terminal_unigrams_add_leaf_events() {
        let opts = EventOptions {
            terminal_unigrams: true,
            ..Default::default()
        };
        let evs = tree_events(&sample(), &opts).unwrap();
        let leaves: Vec<&Event> = evs
            .iter()
            .filter(|e| matches!(e, Event::Production { children, .. } if children.is_empty()))
            .collect();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0].event_string(), "\"the\"");
    }

    #[test]
    fn mixed_children_are_rejected() {
        let t = Tree::parse("(NP (DT the) dog)").unwrap();
        let err = tree_events(&t, &EventOptions::default()).unwrap_err();
        assert!(err.to_string().contains("dominates"));
    }

    #[test]
    fn event_strings() {
        let e = Event::Production {
            parent: "NP".into(),
            children: vec!["NP".into(), "PP".into()],
        };
        assert_eq!(e.event_string(), "NP NP PP");
        let l = Event::Lexical {
            tag: "NN".into(),
            word: "\"dog\"".into(),
        };
        assert_eq!(l.event_string(), "NN \"dog\"");
        assert_eq!(l.parent(), "NN");
        let ws: Vec<&str> = l.children().collect();
        assert_eq!(ws, ["\"dog\""]);
    }

    #[test]
    fn digit_masking_flows_through() {
        let t = Tree::parse("(CD 42)").unwrap();
        let opts = EventOptions {
            digit2at: true,
            ..Default::default()
        };
        let evs = tree_events(&t, &opts).unwrap();
        assert_eq!(
            evs,
            vec![Event::Lexical {
                tag: "CD".into(),
                word: "\"@@\"".into(),
            }]
        );
    }
}
