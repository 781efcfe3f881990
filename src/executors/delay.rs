//! Delay executor: a timer pause the engine resumes on its own.
//!
//! First invocation pauses with the configured duration (clamped to the
//! engine's maximum); the engine schedules the wake-up and replays the node
//! with a marker payload, at which point it completes. The executor never
//! sleeps itself, so a paused delay costs nothing but the timer task.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::node::{
    ExecContext, ExecutionError, ExecutionOutcome, NodeExecutor, PauseKind, ResolvedInput,
};

pub struct DelayExecutor {
    max_delay: Duration,
}

impl DelayExecutor {
    pub fn new(max_delay: Duration) -> Self {
        Self { max_delay }
    }
}

#[async_trait]
impl NodeExecutor for DelayExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        _ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let seconds =
            input
                .config_u64("duration_secs")
                .ok_or_else(|| ExecutionError::InvalidConfig {
                    what: "delay missing numeric `duration_secs`".to_string(),
                })?;
        let duration = Duration::from_secs(seconds).min(self.max_delay);
        if input.is_resume() {
            return Ok(ExecutionOutcome::Completed(json!({
                "waited_secs": duration.as_secs(),
            })));
        }
        Ok(ExecutionOutcome::Paused(PauseKind::Timer { duration }))
    }
}
