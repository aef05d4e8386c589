//! Sequence file parser.
//!
//! The format is line oriented and whitespace tokenized:
//!
//! ```text
//! # comment
//! action count
//!     count 3
//!     action sleep
//!         seconds 0
//!     end
//! end
//! ```
//!
//! `action <type>` opens a block, `end` closes the innermost open block, and every
//! other line inside a block is a parameter line for that block. Indentation carries
//! no meaning. The parser keeps the open blocks on a stack; closing a block attaches
//! it to the block below it, or to the forest's roots when the stack becomes empty.

use crate::action::{ActionNode, NodeId};
use crate::error::{NodeLabel, ScanError, ScanResult};
use crate::registry::{ActionRegistry, Registration};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Opens a block.
pub const OPEN_DIRECTIVE: &str = "action";
/// Closes the innermost open block.
pub const CLOSE_DIRECTIVE: &str = "end";
/// Starts a comment line.
pub const COMMENT_MARKER: char = '#';

/// Root-level action nodes in declaration order.
#[derive(Debug, Default)]
pub struct Forest {
    roots: Vec<ActionNode>,
}

impl Forest {
    pub fn roots(&self) -> &[ActionNode] {
        &self.roots
    }

    pub(crate) fn roots_mut(&mut self) -> &mut [ActionNode] {
        &mut self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of root nodes.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Number of nodes at every depth.
    pub fn node_count(&self) -> usize {
        self.roots.iter().map(ActionNode::subtree_len).sum()
    }

    /// Depth-first, pre-order walk over every node.
    pub fn walk(&self) -> Vec<&ActionNode> {
        fn visit<'a>(node: &'a ActionNode, out: &mut Vec<&'a ActionNode>) {
            out.push(node);
            for child in node.children() {
                visit(child, out);
            }
        }
        let mut out = Vec::new();
        for root in &self.roots {
            visit(root, &mut out);
        }
        out
    }

    /// Node with the given id, if any.
    pub fn find(&self, id: NodeId) -> Option<&ActionNode> {
        self.walk().into_iter().find(|node| node.id() == id)
    }
}

/// Renders the forest back into sequence-file syntax.
impl fmt::Display for Forest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for root in &self.roots {
            root.render(f, 0)?;
        }
        Ok(())
    }
}

/// Builds a [`Forest`] from sequence text.
pub struct Parser<'r> {
    registry: &'r ActionRegistry,
    resolved: HashMap<String, Registration>,
}

impl<'r> Parser<'r> {
    pub fn new(registry: &'r ActionRegistry) -> Self {
        Self {
            registry,
            resolved: HashMap::new(),
        }
    }

    /// Parse a whole sequence. No node is set up, whatever the outcome.
    pub fn parse(&mut self, text: &str) -> ScanResult<Forest> {
        let mut forest = Forest::default();
        let mut open: Vec<ActionNode> = Vec::new();
        let mut next_id = 0;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let tokens: Vec<String> = raw.split_whitespace().map(String::from).collect();
            let Some(first) = tokens.first() else {
                continue;
            };
            if first.starts_with(COMMENT_MARKER) {
                continue;
            }

            match first.as_str() {
                OPEN_DIRECTIVE => {
                    let kind = match tokens.as_slice() {
                        [_, kind] => kind,
                        [_] => {
                            return Err(ScanError::Structural {
                                line,
                                message: "'action' requires an action type".to_string(),
                            })
                        }
                        [_, _, extra, ..] => {
                            return Err(ScanError::Structural {
                                line,
                                message: format!("unexpected token '{extra}' after action type"),
                            })
                        }
                        [] => continue,
                    };
                    let registration = self.resolve(kind, line)?;
                    let node = ActionNode::new(
                        NodeId(next_id),
                        open.last().map(ActionNode::id),
                        NodeLabel {
                            kind: kind.clone(),
                            line,
                        },
                        registration.category(),
                        registration.instantiate(),
                    );
                    next_id += 1;
                    open.push(node);
                }
                CLOSE_DIRECTIVE => {
                    if let Some(extra) = tokens.get(1) {
                        return Err(ScanError::Structural {
                            line,
                            message: format!("unexpected token '{extra}' after 'end'"),
                        });
                    }
                    let closed = open.pop().ok_or_else(|| ScanError::Structural {
                        line,
                        message: "'end' without a matching 'action'".to_string(),
                    })?;
                    match open.last_mut() {
                        Some(parent) => parent.push_child(closed),
                        None => forest.roots.push(closed),
                    }
                }
                _ => {
                    let current = open.last_mut().ok_or_else(|| ScanError::Structural {
                        line,
                        message: format!("parameter '{first}' outside of any action block"),
                    })?;
                    current.parse_line(&tokens, line)?;
                }
            }
        }

        if let Some(unclosed) = open.last() {
            return Err(ScanError::Structural {
                line: unclosed.line(),
                message: format!(
                    "action '{}' is never closed ({} block(s) still open at end of input)",
                    unclosed.kind(),
                    open.len()
                ),
            });
        }

        debug!(
            roots = forest.len(),
            nodes = forest.node_count(),
            "Parsed sequence"
        );
        Ok(forest)
    }

    fn resolve(&mut self, kind: &str, line: usize) -> ScanResult<Registration> {
        if let Some(registration) = self.resolved.get(kind) {
            return Ok(registration.clone());
        }
        let registration = self
            .registry
            .lookup(kind)
            .cloned()
            .ok_or_else(|| ScanError::UnknownActionType {
                kind: kind.to_string(),
                line,
            })?;
        debug!(kind, "Resolved action type");
        self.resolved.insert(kind.to_string(), registration.clone());
        Ok(registration)
    }

    /// Number of distinct action types resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }
}

/// Parse `text` with the given registry.
pub fn parse(text: &str, registry: &ActionRegistry) -> ScanResult<Forest> {
    Parser::new(registry).parse(text)
}

/// Read and parse the sequence file at `path`.
pub fn parse_file(path: &Path, registry: &ActionRegistry) -> ScanResult<Forest> {
    let text = std::fs::read_to_string(path)?;
    parse(&text, registry)
}
