//! Outbound HTTP executors: webhook (deliver) and api (fetch).
//!
//! Both share one request path. Transport failures (connect, timeout) are
//! retried a bounded number of times with a short jittered backoff; an HTTP
//! response of ANY status is a successful execution whose result records
//! the status and body, letting graph authors branch on `{{node.status}}`.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::node::{ExecContext, ExecutionError, ExecutionOutcome, NodeExecutor, ResolvedInput};

struct HttpCall {
    client: reqwest::Client,
    retries: u32,
    timeout_secs: u64,
}

impl HttpCall {
    fn new(config: &EngineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            retries: config.http_retries,
            timeout_secs: config.http_timeout.as_secs(),
        }
    }

    fn build(
        &self,
        input: &ResolvedInput,
        default_method: Method,
    ) -> Result<reqwest::RequestBuilder, ExecutionError> {
        let url = input.config_str("url")?;
        let method = match input.config_value("method").and_then(Value::as_str) {
            Some(m) => {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| {
                    ExecutionError::InvalidConfig {
                        what: format!("invalid HTTP method `{m}`"),
                    }
                })?
            }
            None => default_method,
        };
        let mut request = self.client.request(method, url);
        if let Some(headers) = input.config_value("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }
        if let (Some(header), Some(token)) = (
            input.config_value("auth_header").and_then(Value::as_str),
            input.config_value("auth_token").and_then(Value::as_str),
        ) {
            request = request.header(header, token);
        }
        if let Some(body) = input.config_value("body") {
            request = request.json(body);
        }
        Ok(request)
    }

    async fn send(
        &self,
        input: &ResolvedInput,
        default_method: Method,
        ctx: &ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let mut attempt = 0u32;
        loop {
            let request = self.build(input, default_method.clone())?;
            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    // A body that dies mid-transfer is a transport failure,
                    // not an empty completion.
                    let text = response.text().await.map_err(|err| {
                        if err.is_timeout() {
                            ExecutionError::Timeout {
                                seconds: self.timeout_secs,
                            }
                        } else {
                            ExecutionError::Network {
                                detail: err.to_string(),
                            }
                        }
                    })?;
                    let body = serde_json::from_str::<Value>(&text)
                        .unwrap_or(Value::String(text));
                    debug!(run_id = %ctx.run_id, node_id = %ctx.node_id, status, "outbound call returned");
                    return Ok(ExecutionOutcome::Completed(json!({
                        "status": status,
                        "body": body,
                    })));
                }
                Err(err) if (err.is_connect() || err.is_timeout()) && attempt < self.retries => {
                    attempt += 1;
                    let jitter: u64 = rand::rng().random_range(100..400);
                    let backoff = Duration::from_millis(u64::from(attempt) * jitter);
                    warn!(
                        run_id = %ctx.run_id,
                        node_id = %ctx.node_id,
                        attempt,
                        error = %err,
                        "transport failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) if err.is_timeout() => {
                    return Err(ExecutionError::Timeout {
                        seconds: self.timeout_secs,
                    });
                }
                Err(err) => {
                    return Err(ExecutionError::Network {
                        detail: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Delivers a payload to an external endpoint; defaults to POST.
pub struct WebhookExecutor {
    call: HttpCall,
}

impl WebhookExecutor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            call: HttpCall::new(config),
        }
    }
}

#[async_trait]
impl NodeExecutor for WebhookExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        self.call.send(&input, Method::POST, &ctx).await
    }
}

/// Fetches from an external API; defaults to GET.
pub struct ApiExecutor {
    call: HttpCall,
}

impl ApiExecutor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            call: HttpCall::new(config),
        }
    }
}

#[async_trait]
impl NodeExecutor for ApiExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        self.call.send(&input, Method::GET, &ctx).await
    }
}
