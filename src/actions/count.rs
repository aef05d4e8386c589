//! `count`: run the enclosed actions a fixed number of times.
//!
//! ```text
//! action count
//!     count 3
//!     action a2d
//!         rate 10000
//!     end
//! end
//! ```

use crate::action::{Action, ActionContext, Children};
use crate::error::{ActionError, ScanResult};
use crate::parameters::ParameterStore;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Repeat-N composite. `count` defaults to 1; 0 runs nothing.
#[derive(Debug)]
pub struct Repeat {
    count: u64,
}

impl Repeat {
    pub fn new() -> Self {
        Self { count: 1 }
    }

    /// Iterations per run, as configured at setup.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Default for Repeat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for Repeat {
    async fn setup(
        &mut self,
        params: &ParameterStore,
        _ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let raw: i64 = params.parse_or("count", 1)?;
        self.count = u64::try_from(raw).map_err(|_| {
            ActionError::Parameter(format!("'count' must be a non-negative integer, got {raw}"))
        })?;

        if self.count == 0 {
            warn!("count is 0; enclosed actions will never run");
        }
        info!(count = self.count, "Repeat configured");
        Ok(())
    }

    async fn run(&mut self, children: &mut Children<'_>, ctx: &ActionContext) -> ScanResult<()> {
        if children.is_empty() {
            debug!("Nothing to repeat");
            return Ok(());
        }
        for iteration in 1..=self.count {
            ctx.check_cancelled()?;
            debug!(iteration, of = self.count, "Repeat iteration");
            children.run_all(ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[tokio::test]
    async fn test_default_count_is_one() {
        let mut repeat = Repeat::new();
        repeat.setup(&store(&[]), &ctx()).await.unwrap();
        assert_eq!(repeat.count(), 1);
    }

    #[tokio::test]
    async fn test_zero_is_accepted() {
        let mut repeat = Repeat::new();
        repeat.setup(&store(&["count 0"]), &ctx()).await.unwrap();
        assert_eq!(repeat.count(), 0);
    }

    #[tokio::test]
    async fn test_negative_count_rejected() {
        let mut repeat = Repeat::new();
        let err = repeat.setup(&store(&["count -2"]), &ctx()).await.unwrap_err();
        assert!(matches!(err, ActionError::Parameter(_)));
        assert!(err.to_string().contains("-2"));
    }

    #[tokio::test]
    async fn test_fractional_count_rejected() {
        let mut repeat = Repeat::new();
        let err = repeat.setup(&store(&["count 2.5"]), &ctx()).await.unwrap_err();
        assert!(matches!(err, ActionError::Parameter(_)));
    }
}
