//! `sleep`: wait, then run the enclosed actions.
//!
//! `hours`, `minutes` and `seconds` (floats, default 0) are summed and truncated to
//! whole seconds at setup. A duration of zero or less skips the wait. The wait is
//! the traversal's only suspension point and ends early on cancellation.

use crate::action::{Action, ActionContext, Children};
use crate::error::{ActionError, ScanError, ScanResult};
use crate::parameters::ParameterStore;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Delay composite.
#[derive(Debug, Default)]
pub struct Delay {
    duration: Duration,
}

impl Delay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait performed by each run.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Whole seconds in `hours:minutes:seconds`, truncated toward zero.
pub fn whole_seconds(hours: f64, minutes: f64, seconds: f64) -> i64 {
    (hours * 3600.0 + minutes * 60.0 + seconds).trunc() as i64
}

#[async_trait]
impl Action for Delay {
    async fn setup(
        &mut self,
        params: &ParameterStore,
        _ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let hours: f64 = params.parse_or("hours", 0.0)?;
        let minutes: f64 = params.parse_or("minutes", 0.0)?;
        let seconds: f64 = params.parse_or("seconds", 0.0)?;
        if ![hours, minutes, seconds].iter().all(|v| v.is_finite()) {
            return Err(ActionError::Parameter(
                "'hours', 'minutes' and 'seconds' must be finite".to_string(),
            ));
        }

        let total = whole_seconds(hours, minutes, seconds);
        self.duration = Duration::from_secs(u64::try_from(total).unwrap_or(0));
        info!(seconds = total, "Delay configured");
        Ok(())
    }

    async fn run(&mut self, children: &mut Children<'_>, ctx: &ActionContext) -> ScanResult<()> {
        if self.duration.is_zero() {
            debug!("Zero delay; not waiting");
        } else {
            info!(duration = ?self.duration, "Waiting");
            tokio::select! {
                _ = tokio::time::sleep(self.duration) => {}
                _ = ctx.cancel.cancelled() => {
                    info!("Wait interrupted by cancellation");
                    return Err(ScanError::Cancelled);
                }
            }
        }
        children.run_all(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionNode;
    use crate::hardware::{ConnectionManager, SimulatedBackend};
    use crate::output::OutputTarget;
    use std::sync::Arc;

    fn ctx() -> ActionContext {
        ActionContext::new(
            ConnectionManager::new(Arc::new(SimulatedBackend::instant())),
            OutputTarget::new(".", "test"),
        )
    }

    fn store(lines: &[&str]) -> ParameterStore {
        let mut store = ParameterStore::new();
        for line in lines {
            let tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
            store.record(&tokens);
        }
        store
    }

    #[test]
    fn test_whole_seconds_truncates() {
        assert_eq!(whole_seconds(0.0, 0.0, 1.9), 1);
        assert_eq!(whole_seconds(1.0, 1.5, 0.0), 3690);
        assert_eq!(whole_seconds(0.0, 0.0, -0.5), 0);
        assert_eq!(whole_seconds(0.0, -1.0, 0.0), -60);
    }

    #[tokio::test]
    async fn test_negative_total_means_no_wait() {
        let mut delay = Delay::new();
        delay.setup(&store(&["minutes -1"]), &ctx()).await.unwrap();
        assert!(delay.duration().is_zero());
    }

    #[tokio::test]
    async fn test_duration_from_all_fields() {
        let mut delay = Delay::new();
        delay
            .setup(&store(&["hours 0.5", "minutes 2", "seconds 3.7"]), &ctx())
            .await
            .unwrap();
        assert_eq!(delay.duration(), Duration::from_secs(1800 + 120 + 3));
    }

    #[tokio::test]
    async fn test_non_numeric_seconds_rejected() {
        let mut delay = Delay::new();
        let err = delay.setup(&store(&["seconds soon"]), &ctx()).await.unwrap_err();
        assert!(matches!(err, ActionError::Parameter(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_then_runs_children() {
        let ctx = ctx();
        let mut delay = Delay::new();
        delay.setup(&store(&["seconds 5"]), &ctx).await.unwrap();

        let start = tokio::time::Instant::now();
        let mut none: Vec<ActionNode> = Vec::new();
        delay
            .run(&mut Children::new(&mut none), &ctx)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let ctx = ctx();
        let mut delay = Delay::new();
        delay.setup(&store(&["hours 1"]), &ctx).await.unwrap();

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            cancel.cancel();
        });

        let start = tokio::time::Instant::now();
        let mut none: Vec<ActionNode> = Vec::new();
        let err = delay
            .run(&mut Children::new(&mut none), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
