//! Lifecycle driver for a parsed sequence.
//!
//! [`RunEngine::run_all`] executes a [`Forest`] in three phases:
//!
//! 1. **setup** every root in declaration order (each root sets up its subtree),
//!    stopping at the first failure;
//! 2. **run** every root once, in declaration order, if setup succeeded;
//! 3. **cleanup** every root in reverse order, always, whatever happened before.
//!
//! Only nodes whose setup completed are cleaned up, and each exactly once. A cleanup
//! failure is logged and collected; it never prevents the remaining nodes from being
//! released. The first setup/run error is returned after cleanup. With no such error,
//! collected cleanup failures are returned as [`ScanError::CleanupFailed`].
//!
//! Nothing is retried.

use crate::action::ActionContext;
use crate::error::{ScanError, ScanResult};
use crate::parser::Forest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Outcome of a successful run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// Identifier used in the run's tracing span.
    pub run_id: Uuid,
    /// Wall-clock start of setup.
    pub started_at: DateTime<Utc>,
    /// Number of nodes in the forest.
    pub nodes: usize,
    /// Wall-clock time from first setup to last cleanup.
    pub elapsed: Duration,
}

/// Drives a forest through setup → run → cleanup.
pub struct RunEngine {
    ctx: ActionContext,
}

impl RunEngine {
    pub fn new(ctx: ActionContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ActionContext {
        &self.ctx
    }

    /// Request cancellation. Takes effect at the next node boundary or delay.
    pub fn cancel(&self) {
        self.ctx.cancel.cancel();
    }

    /// Set up, run, and clean up every root of `forest`.
    pub async fn run_all(&self, forest: &mut Forest) -> ScanResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.execute(forest, run_id).instrument(span).await
    }

    async fn execute(&self, forest: &mut Forest, run_id: Uuid) -> ScanResult<RunSummary> {
        let started_at = Utc::now();
        let started = Instant::now();
        let nodes = forest.node_count();

        info!(roots = forest.len(), nodes, %started_at, "Starting setup of actions");
        let mut outcome = self.setup_roots(forest).await;

        if outcome.is_ok() {
            info!("Starting execution of actions");
            outcome = self.run_roots(forest).await;
        }

        info!("Starting cleanup of actions");
        let failures = self.cleanup_roots(forest).await;

        match outcome {
            Err(err) => {
                error!(error = %err, "Run aborted");
                if !failures.is_empty() {
                    error!(count = failures.len(), "Cleanup also reported failures");
                }
                Err(err)
            }
            Ok(()) if !failures.is_empty() => Err(ScanError::CleanupFailed(failures)),
            Ok(()) => {
                let elapsed = started.elapsed();
                info!(?elapsed, "Run completed");
                Ok(RunSummary {
                    run_id,
                    started_at,
                    nodes,
                    elapsed,
                })
            }
        }
    }

    async fn setup_roots(&self, forest: &mut Forest) -> ScanResult<()> {
        for root in forest.roots_mut() {
            root.setup(&self.ctx).await?;
        }
        Ok(())
    }

    async fn run_roots(&self, forest: &mut Forest) -> ScanResult<()> {
        for root in forest.roots_mut() {
            root.run(&self.ctx).await?;
        }
        Ok(())
    }

    async fn cleanup_roots(&self, forest: &mut Forest) -> Vec<ScanError> {
        let mut failures = Vec::new();
        for root in forest.roots_mut().iter_mut().rev() {
            failures.extend(root.cleanup(&self.ctx).await);
        }
        failures
    }
}

/// Run `forest` with `ctx`. See [`RunEngine::run_all`].
pub async fn run_all(forest: &mut Forest, ctx: ActionContext) -> ScanResult<RunSummary> {
    RunEngine::new(ctx).run_all(forest).await
}
