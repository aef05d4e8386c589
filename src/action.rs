//! Action nodes and the setup → run → cleanup contract.
//!
//! An [`ActionNode`] is one `action <type> ... end` block of a sequence file. It owns
//! its [`ParameterStore`], its child nodes, and a boxed [`Action`] handler that
//! implements the type-specific behaviour. The node drives the lifecycle:
//!
//! - **setup**: the handler sets itself up first, then every child in declaration
//!   order. A child may therefore rely on state its parent established (a stage
//!   composite has already found its reference position).
//! - **run**: the handler decides how often its children run. The default runs them
//!   once each, in order. Control-flow handlers call [`Children::run_all`] zero, one,
//!   or many times.
//! - **cleanup**: a node whose setup completed releases its own resources, then
//!   cleans up its children in reverse order. Failures are collected, not propagated,
//!   so one failing release never skips the others.
//!
//! Cancellation is checked at node boundaries: before a node is set up and before
//! each run. Cleanup ignores the token.

use crate::error::{ActionError, NodeLabel, ScanError, ScanResult};
use crate::hardware::ConnectionManager;
use crate::output::OutputTarget;
use crate::parameters::ParameterStore;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Position of a node in parse order. Roots and children share one sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether an action drives hardware itself or only schedules its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionCategory {
    /// Performs an effect of its own (acquire, move, beep) before running children.
    Leaf,
    /// Decides how many times its children run (repeat, scan, delay).
    Composite,
}

/// Everything an action may touch while it executes.
#[derive(Clone)]
pub struct ActionContext {
    /// Shared, reference-counted device connections.
    pub connections: ConnectionManager,
    /// Cooperative cancellation, checked between nodes and while waiting.
    pub cancel: CancellationToken,
    /// Where leaf actions write their output.
    pub output: OutputTarget,
}

impl ActionContext {
    pub fn new(connections: ConnectionManager, output: OutputTarget) -> Self {
        Self {
            connections,
            cancel: CancellationToken::new(),
            output,
        }
    }

    /// Replace the cancellation token, e.g. with one wired to Ctrl-C.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail with [`ScanError::Cancelled`] once cancellation was requested.
    pub fn check_cancelled(&self) -> ScanResult<()> {
        if self.cancel.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Type-specific behaviour of an action node.
///
/// Handlers never set up, run, or clean up their children themselves except
/// through [`Children::run_all`]; the owning [`ActionNode`] propagates setup and
/// cleanup.
#[async_trait]
pub trait Action: Send {
    /// Record one parameter line. Handlers may intercept structural keywords here.
    fn parse_line(
        &mut self,
        tokens: &[String],
        params: &mut ParameterStore,
    ) -> Result<(), ActionError> {
        params.record(tokens);
        Ok(())
    }

    /// Derive runtime state from the parameters and acquire resources.
    async fn setup(
        &mut self,
        _params: &ParameterStore,
        _ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        Ok(())
    }

    /// Perform this action's effect, then run the children once.
    async fn run(&mut self, children: &mut Children<'_>, ctx: &ActionContext) -> ScanResult<()> {
        children.run_all(ctx).await
    }

    /// Release whatever `setup` acquired.
    async fn cleanup(
        &mut self,
        _params: &ParameterStore,
        _ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        Ok(())
    }
}

/// The children of the node being run, handed to [`Action::run`].
pub struct Children<'a> {
    nodes: &'a mut [ActionNode],
}

impl<'a> Children<'a> {
    pub fn new(nodes: &'a mut [ActionNode]) -> Self {
        Self { nodes }
    }

    /// Run every child once, in declaration order, stopping at the first error.
    pub async fn run_all(&mut self, ctx: &ActionContext) -> ScanResult<()> {
        for child in self.nodes.iter_mut() {
            child.run(ctx).await?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Parsed,
    Ready,
    Released,
}

/// One action block of a sequence file.
pub struct ActionNode {
    id: NodeId,
    parent: Option<NodeId>,
    label: NodeLabel,
    category: ActionCategory,
    params: ParameterStore,
    handler: Box<dyn Action>,
    children: Vec<ActionNode>,
    phase: Phase,
}

impl ActionNode {
    pub fn new(
        id: NodeId,
        parent: Option<NodeId>,
        label: NodeLabel,
        category: ActionCategory,
        handler: Box<dyn Action>,
    ) -> Self {
        Self {
            id,
            parent,
            label,
            category,
            params: ParameterStore::new(),
            handler,
            children: Vec::new(),
            phase: Phase::Parsed,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The enclosing node, for diagnostics only.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Action type as written in the sequence file.
    pub fn kind(&self) -> &str {
        &self.label.kind
    }

    /// 1-based line of the `action` directive.
    pub fn line(&self) -> usize {
        self.label.line
    }

    pub fn label(&self) -> &NodeLabel {
        &self.label
    }

    pub fn category(&self) -> ActionCategory {
        self.category
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    pub fn children(&self) -> &[ActionNode] {
        &self.children
    }

    /// True once setup completed and cleanup has not run yet.
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Number of nodes in this subtree, this one included.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(ActionNode::subtree_len).sum::<usize>()
    }

    pub(crate) fn push_child(&mut self, child: ActionNode) {
        self.children.push(child);
    }

    /// Hand one parameter line (found at `line`) to the handler.
    pub fn parse_line(&mut self, tokens: &[String], line: usize) -> ScanResult<()> {
        self.handler
            .parse_line(tokens, &mut self.params)
            .map_err(|err| match err {
                ActionError::Parameter(msg) => ActionError::Parameter(format!("line {line}: {msg}")),
                other => other,
            })
            .map_err(|err| ScanError::from(err).at(&self.label))
    }

    /// Set up this node, then its children in declaration order.
    ///
    /// Stops at the first failure. Nodes whose setup completed before the failure are
    /// left ready so that [`cleanup`](Self::cleanup) releases them.
    pub fn setup<'a>(&'a mut self, ctx: &'a ActionContext) -> BoxFuture<'a, ScanResult<()>> {
        async move {
            if self.phase != Phase::Parsed {
                warn!(node = %self.label, "Setup requested twice; ignoring");
                return Ok(());
            }
            ctx.check_cancelled()?;

            info!(node = %self.label, "Setting up");
            self.handler
                .setup(&self.params, ctx)
                .await
                .map_err(|err| ScanError::from(err).at(&self.label))?;
            self.phase = Phase::Ready;

            for child in &mut self.children {
                child.setup(ctx).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Run this node once. How often the children run is up to the handler.
    pub fn run<'a>(&'a mut self, ctx: &'a ActionContext) -> BoxFuture<'a, ScanResult<()>> {
        async move {
            ctx.check_cancelled()?;
            if self.phase != Phase::Ready {
                return Err(ScanError::from(ActionError::Runtime(
                    "run requested before setup completed".to_string(),
                ))
                .at(&self.label));
            }

            debug!(node = %self.label, "Running");
            let mut children = Children::new(&mut self.children);
            self.handler
                .run(&mut children, ctx)
                .await
                .map_err(|err| err.at(&self.label))
        }
        .boxed()
    }

    /// Release this node (if its setup completed) and then its children, last first.
    ///
    /// Returns every failure instead of stopping at the first one. Each node is
    /// released at most once; later calls are no-ops.
    pub fn cleanup<'a>(&'a mut self, ctx: &'a ActionContext) -> BoxFuture<'a, Vec<ScanError>> {
        async move {
            let mut failures = Vec::new();

            if self.phase == Phase::Ready {
                self.phase = Phase::Released;
                match self.handler.cleanup(&self.params, ctx).await {
                    Ok(()) => info!(node = %self.label, "Cleaned up"),
                    Err(err) => {
                        let err = ScanError::from(err).at(&self.label);
                        error!(node = %self.label, error = %err, "Cleanup failed");
                        failures.push(err);
                    }
                }
            }

            for child in self.children.iter_mut().rev() {
                failures.extend(child.cleanup(ctx).await);
            }
            failures
        }
        .boxed()
    }

    pub(crate) fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "    ".repeat(depth);
        writeln!(f, "{indent}action {}", self.label.kind)?;
        for param in self.params.entries() {
            writeln!(f, "{indent}    {param}")?;
        }
        for child in &self.children {
            child.render(f, depth + 1)?;
        }
        writeln!(f, "{indent}end")
    }
}

impl fmt::Debug for ActionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionNode")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("label", &self.label)
            .field("category", &self.category)
            .field("params", &self.params)
            .field("children", &self.children)
            .finish()
    }
}
