//! Common test utilities for rust_scan integration tests
//!
//! - `Tracer`: an action that records every lifecycle call into a shared journal and
//!   can be told to fail in one phase
//! - `Harness`: registry, simulated backend, and a temporary output directory

#![allow(dead_code)] // Not every test file uses every helper

use async_trait::async_trait;
use rust_scan::hardware::{ConnectionManager, SimulatedBackend};
use rust_scan::{
    parse, Action, ActionCategory, ActionContext, ActionError, ActionRegistry, Children, Forest,
    OutputTarget, ParameterStore, RunEngine, RunSummary, ScanResult,
};
use std::fmt;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Lifecycle phase recorded by a [`Tracer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Run,
    Cleanup,
}

impl Phase {
    fn from_param(value: &str) -> Option<Self> {
        match value {
            "setup" => Some(Phase::Setup),
            "run" => Some(Phase::Run),
            "cleanup" => Some(Phase::Cleanup),
            _ => None,
        }
    }
}

/// One recorded call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub phase: Phase,
    pub name: String,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            Phase::Setup => "setup",
            Phase::Run => "run",
            Phase::Cleanup => "cleanup",
        };
        write!(f, "{phase}:{}", self.name)
    }
}

pub type Journal = Arc<Mutex<Vec<Call>>>;

/// Leaf action configured by `name <label>` and `fail <setup|run|cleanup>`. A bare
/// `cancel` line makes every run cancel the whole sequence after recording.
pub struct Tracer {
    journal: Journal,
    name: String,
    fail_in: Option<Phase>,
    cancels: bool,
}

impl Tracer {
    fn record(&self, phase: Phase) -> Result<(), ActionError> {
        self.journal.lock().unwrap().push(Call {
            phase,
            name: self.name.clone(),
        });
        if self.fail_in == Some(phase) {
            Err(ActionError::Runtime(format!("tracer {} told to fail", self.name)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Action for Tracer {
    async fn setup(
        &mut self,
        params: &ParameterStore,
        _ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        self.name = params.first("name").unwrap_or("trace").to_string();
        self.fail_in = params.first("fail").and_then(Phase::from_param);
        self.cancels = params.contains("cancel");
        self.record(Phase::Setup)
    }

    async fn run(&mut self, children: &mut Children<'_>, ctx: &ActionContext) -> ScanResult<()> {
        self.record(Phase::Run)?;
        if self.cancels {
            ctx.cancel.cancel();
        }
        children.run_all(ctx).await
    }

    async fn cleanup(
        &mut self,
        _params: &ParameterStore,
        _ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        self.record(Phase::Cleanup)
    }
}

/// Everything a sequence needs to run against simulated hardware.
pub struct Harness {
    pub registry: ActionRegistry,
    pub journal: Journal,
    pub backend: Arc<SimulatedBackend>,
    pub connections: ConnectionManager,
    pub output_dir: TempDir,
}

impl Harness {
    /// Harness over an instant simulated backend.
    pub fn new() -> Self {
        Self::with_backend(SimulatedBackend::instant())
    }

    pub fn with_backend(backend: SimulatedBackend) -> Self {
        let journal: Journal = Arc::default();
        let mut registry = ActionRegistry::with_builtins();
        let shared = journal.clone();
        registry.register("trace", ActionCategory::Leaf, move || {
            Box::new(Tracer {
                journal: shared.clone(),
                name: String::new(),
                fail_in: None,
                cancels: false,
            })
        });

        let backend = Arc::new(backend);
        let connections = ConnectionManager::new(backend.clone());
        Self {
            registry,
            journal,
            backend,
            connections,
            output_dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Context writing to `<output_dir>/test_*.csv`.
    pub fn context(&self) -> ActionContext {
        ActionContext::new(
            self.connections.clone(),
            OutputTarget::new(self.output_dir.path(), "test"),
        )
    }

    pub fn parse(&self, text: &str) -> Forest {
        parse(text, &self.registry).unwrap()
    }

    /// Parse and run `text`; returns the forest for inspection.
    pub async fn run(&self, text: &str) -> (Forest, ScanResult<RunSummary>) {
        let mut forest = self.parse(text);
        let result = RunEngine::new(self.context()).run_all(&mut forest).await;
        (forest, result)
    }

    /// Recorded calls as `phase:name`.
    pub fn calls(&self) -> Vec<String> {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// How often `name` was called in `phase`.
    pub fn count(&self, phase: Phase, name: &str) -> usize {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.phase == phase && call.name == name)
            .count()
    }
}
