//! Trigger and end executors: the run's entry and exit markers.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::node::{ExecContext, ExecutionError, ExecutionOutcome, NodeExecutor, ResolvedInput};

/// Entry marker. Completes immediately; its result is the seed payload the
/// run was started with, so downstream nodes can reference the trigger's
/// fields like any other completed output.
pub struct TriggerExecutor;

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        _ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let seed = match input.supplied {
            Value::Null => json!({}),
            other => other,
        };
        Ok(ExecutionOutcome::Completed(seed))
    }
}

/// Terminal no-op. Reaching it contributes to run completion.
pub struct EndExecutor;

#[async_trait]
impl NodeExecutor for EndExecutor {
    async fn execute(
        &self,
        _input: ResolvedInput,
        _ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        Ok(ExecutionOutcome::Completed(json!({})))
    }
}
