//! Agent and prompt executors: LLM calls with incremental streaming.
//!
//! The model backend is a trait object yielding a chunk stream; each chunk
//! is relayed to the run's attached listener the moment it arrives, and the
//! concatenation becomes the node's result once the stream ends. A caller
//! that disconnects mid-stream loses only the live relay, never the result.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde_json::{Value, json};

use crate::node::{ExecContext, ExecutionError, ExecutionOutcome, NodeExecutor, ResolvedInput};

/// Streaming completion backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream_completion(
        &self,
        prompt: &str,
    ) -> Result<BoxStream<'static, Result<String, ExecutionError>>, ExecutionError>;
}

/// Backend that echoes the prompt back word by word. Default for demos and
/// tests; deployments plug in a real client through [`super::Collaborators`].
pub struct EchoModel;

#[async_trait]
impl ModelClient for EchoModel {
    async fn stream_completion(
        &self,
        prompt: &str,
    ) -> Result<BoxStream<'static, Result<String, ExecutionError>>, ExecutionError> {
        let words: Vec<String> = prompt.split_whitespace().map(str::to_string).collect();
        let stream = async_stream::stream! {
            for (i, word) in words.into_iter().enumerate() {
                if i > 0 {
                    yield Ok(" ".to_string());
                }
                yield Ok(word);
            }
        };
        Ok(stream.boxed())
    }
}

async fn run_model(
    client: &dyn ModelClient,
    prompt: &str,
    ctx: &ExecContext,
) -> Result<String, ExecutionError> {
    let mut chunks = client.stream_completion(prompt).await?;
    let mut text = String::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        ctx.emit_chunk(chunk.clone());
        text.push_str(&chunk);
    }
    Ok(text)
}

/// Instruction-following model invocation. The resolved `instructions`
/// field, if present, is prepended to the prompt.
pub struct AgentExecutor {
    client: std::sync::Arc<dyn ModelClient>,
}

impl AgentExecutor {
    pub fn new(client: std::sync::Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeExecutor for AgentExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let prompt = input.config_str("prompt")?;
        let full = match input.config_value("instructions").and_then(Value::as_str) {
            Some(instructions) => format!("{instructions}\n\n{prompt}"),
            None => prompt.to_string(),
        };
        let text = run_model(self.client.as_ref(), &full, &ctx).await?;
        Ok(ExecutionOutcome::Completed(json!({"text": text})))
    }
}

/// Single-shot prompt completion; same streaming path, no instructions.
pub struct PromptExecutor {
    client: std::sync::Arc<dyn ModelClient>,
}

impl PromptExecutor {
    pub fn new(client: std::sync::Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeExecutor for PromptExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let prompt = input.config_str("prompt")?;
        let text = run_model(self.client.as_ref(), prompt, &ctx).await?;
        Ok(ExecutionOutcome::Completed(json!({"text": text})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{StreamEvent, StreamHub};
    use std::sync::Arc;

    #[tokio::test]
    async fn prompt_streams_chunks_and_accumulates_text() {
        let hub = Arc::new(StreamHub::new());
        let listener = hub.attach("r");
        let ctx = ExecContext::new("r", "n", hub.emitter("r"));

        let exec = PromptExecutor::new(Arc::new(EchoModel));
        let input = ResolvedInput::new(json!({"prompt": "hello streaming world"}));
        let outcome = exec.execute(input, ctx).await.unwrap();

        let ExecutionOutcome::Completed(result) = outcome else {
            panic!("prompt must complete");
        };
        assert_eq!(result["text"], "hello streaming world");

        let chunks: String = listener
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk { content } => Some(content),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, "hello streaming world");
    }

    #[tokio::test]
    async fn agent_prepends_instructions() {
        let hub = Arc::new(StreamHub::new());
        let ctx = ExecContext::new("r", "n", hub.emitter("r"));
        let exec = AgentExecutor::new(Arc::new(EchoModel));
        let input = ResolvedInput::new(json!({
            "instructions": "Be brief.",
            "prompt": "Summarize.",
        }));
        let outcome = exec.execute(input, ctx).await.unwrap();
        let ExecutionOutcome::Completed(result) = outcome else {
            panic!("agent must complete");
        };
        assert_eq!(result["text"], "Be brief. Summarize.");
    }

    #[tokio::test]
    async fn generation_survives_missing_listener() {
        let hub = Arc::new(StreamHub::new());
        let ctx = ExecContext::new("r", "n", hub.emitter("r"));
        let exec = PromptExecutor::new(Arc::new(EchoModel));
        let input = ResolvedInput::new(json!({"prompt": "no one listening"}));
        let outcome = exec.execute(input, ctx).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    }
}
