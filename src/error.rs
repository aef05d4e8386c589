//! Custom error types for the sequencer.
//!
//! Two layers of errors exist:
//!
//! - **`ActionError`**: what a single action handler reports about itself: a bad
//!   parameter, a device that could not be acquired, an operation that failed
//!   mid-run, or an empty scan grid.
//! - **`ScanError`**: the crate-wide error. Parse-time failures (`Structural`,
//!   `UnknownActionType`) carry the offending source line. Handler failures are
//!   wrapped in `ScanError::Action` together with a [`NodeLabel`] naming the node's
//!   type and source line, so the first fatal error of a run can always be traced back
//!   to the configuration.
//!
//! Handlers return `ScanResult` so that errors raised by their children pass through
//! untouched. A handler's own `ActionError` converts into an unlabeled
//! `ScanError::Action` via `?`, and the owning node attaches its label on the way out.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Type tag and source line of an action node, used in diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLabel {
    /// Action type as written after `action`.
    pub kind: String,
    /// 1-based line of the `action` directive.
    pub line: usize,
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action '{}' (line {})", self.kind, self.line)
    }
}

/// Failures raised by an action handler about its own work.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Execution error: {0}")]
    Runtime(String),

    #[error("Scan grid is empty")]
    EmptyGrid,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV output error: {0}")]
    Csv(#[from] csv::Error),
}

impl ActionError {
    /// Wraps a capability failure raised while acquiring or opening a device.
    pub fn resource(err: anyhow::Error) -> Self {
        ActionError::Resource(format!("{err:#}"))
    }

    /// Wraps a capability failure raised while operating a device.
    pub fn runtime(err: anyhow::Error) -> Self {
        ActionError::Runtime(format!("{err:#}"))
    }
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Structural parse error at line {line}: {message}")]
    Structural { line: usize, message: String },

    #[error("Unknown action type '{kind}' at line {line}")]
    UnknownActionType { kind: String, line: usize },

    #[error("{}{source}", location(.node))]
    Action {
        node: Option<NodeLabel>,
        #[source]
        source: ActionError,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Cleanup failed for {} node(s)", .0.len())]
    CleanupFailed(Vec<ScanError>),
}

fn location(node: &Option<NodeLabel>) -> String {
    match node {
        Some(label) => format!("{label}: "),
        None => String::new(),
    }
}

impl From<ActionError> for ScanError {
    fn from(source: ActionError) -> Self {
        ScanError::Action { node: None, source }
    }
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Config(Box::new(err))
    }
}

impl ScanError {
    /// Attaches `label` to an action error that does not name its node yet.
    ///
    /// Errors that already carry a label (raised deeper in the tree) are returned
    /// unchanged.
    pub fn at(self, label: &NodeLabel) -> Self {
        match self {
            ScanError::Action { node: None, source } => ScanError::Action {
                node: Some(label.clone()),
                source,
            },
            other => other,
        }
    }

    /// The node that raised this error, if known.
    pub fn node(&self) -> Option<&NodeLabel> {
        match self {
            ScanError::Action { node, .. } => node.as_ref(),
            _ => None,
        }
    }

    /// Source line associated with this error, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            ScanError::Structural { line, .. } | ScanError::UnknownActionType { line, .. } => {
                Some(*line)
            }
            ScanError::Action { node, .. } => node.as_ref().map(|n| n.line),
            _ => None,
        }
    }
}
