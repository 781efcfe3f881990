//! Node kinds, the executor trait, and execution outcomes.
//!
//! Every automation step kind the engine understands is a variant of the
//! closed [`NodeKind`] enum; the loosely-typed node objects authored by the
//! builder UI are parsed into it at graph-load time so unknown kinds fail
//! fast rather than at run time. Executors implement [`NodeExecutor`] and
//! are dispatched through the registry in [`crate::executors`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::stream::StreamEmitter;
use crate::vars::ResolutionError;

/// The closed set of automation step kinds.
///
/// The wire form (graph documents, persisted run snapshots) is the
/// hyphenated lowercase string returned by [`as_str`](Self::as_str).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// Entry marker; completes immediately with the run's seed payload.
    Trigger,
    /// Pauses until a caller supplies values matching the field schema.
    Form,
    /// Pauses until an authorized actor supplies an approve/reject decision.
    Approval,
    /// Approval variant operating on CRM records; same pause semantics.
    CrmApproval,
    /// Boolean comparison selecting which outgoing branch stays active.
    Condition,
    /// Record mutation against an external store; never auto-retried.
    Update,
    /// Fire-and-forget dispatch through a notification collaborator.
    Notification,
    /// Timer pause; auto-resumed when the configured duration elapses.
    Delay,
    /// Outbound HTTP call delivering a payload.
    Webhook,
    /// Outbound HTTP call fetching from an external API.
    Api,
    /// LLM invocation with incremental chunk streaming.
    Agent,
    /// Single-shot LLM prompt completion with chunk streaming.
    Prompt,
    /// Terminal no-op; the run completes once reached.
    End,
}

impl NodeKind {
    pub const ALL: [NodeKind; 13] = [
        NodeKind::Trigger,
        NodeKind::Form,
        NodeKind::Approval,
        NodeKind::CrmApproval,
        NodeKind::Condition,
        NodeKind::Update,
        NodeKind::Notification,
        NodeKind::Delay,
        NodeKind::Webhook,
        NodeKind::Api,
        NodeKind::Agent,
        NodeKind::Prompt,
        NodeKind::End,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Trigger => "trigger",
            NodeKind::Form => "form",
            NodeKind::Approval => "approval",
            NodeKind::CrmApproval => "crm-approval",
            NodeKind::Condition => "condition",
            NodeKind::Update => "update",
            NodeKind::Notification => "notification",
            NodeKind::Delay => "delay",
            NodeKind::Webhook => "webhook",
            NodeKind::Api => "api",
            NodeKind::Agent => "agent",
            NodeKind::Prompt => "prompt",
            NodeKind::End => "end",
        }
    }

    /// Parse the wire form; `None` for kinds this engine does not know.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Whether this kind selects among labeled outgoing branches.
    #[must_use]
    pub fn is_branching(&self) -> bool {
        matches!(self, NodeKind::Condition)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeKind::End)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a node suspended instead of completing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PauseKind {
    /// Waiting for a caller to supply structured input (form).
    UserInput,
    /// Waiting for an approve/reject decision (approval, crm-approval).
    Decision,
    /// Waiting for a timer; the engine schedules the resumption itself.
    Timer { duration: Duration },
}

/// Result of one executor invocation.
#[derive(Clone, Debug)]
pub enum ExecutionOutcome {
    /// Terminal success; the payload becomes the node's result, visible to
    /// downstream variable references.
    Completed(Value),
    /// The node cannot complete synchronously; the run suspends until an
    /// external resume (or the engine's timer, for [`PauseKind::Timer`]).
    Paused(PauseKind),
}

/// Execution failures recorded on the node instance and escalated to the
/// run. No implicit cross-kind retries: retry policy is an executor-level
/// concern (webhook/api retry transient transport errors a bounded number
/// of times; update/notification never retry).
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutionError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("node configuration invalid: {what}")]
    #[diagnostic(
        code(stepflow::exec::invalid_config),
        help("Check the node's configuration in the graph document.")
    )]
    InvalidConfig { what: String },

    /// Supplied resume input failed validation; the pause is not consumed.
    #[error("supplied input rejected: {0}")]
    #[diagnostic(code(stepflow::exec::validation))]
    Validation(String),

    #[error("external record write failed: {detail}")]
    #[diagnostic(code(stepflow::exec::external_write))]
    ExternalWrite { detail: String },

    #[error("outbound call transport failure: {detail}")]
    #[diagnostic(code(stepflow::exec::network))]
    Network { detail: String },

    #[error("outbound call exceeded {seconds}s timeout")]
    #[diagnostic(code(stepflow::exec::timeout))]
    Timeout { seconds: u64 },

    #[error("model backend failure: {detail}")]
    #[diagnostic(code(stepflow::exec::model))]
    Model { detail: String },

    #[error(transparent)]
    #[diagnostic(code(stepflow::exec::serde_json))]
    Serde(#[from] serde_json::Error),
}

impl ExecutionError {
    /// Short stable tag recorded on failed node instances.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Resolution(_) => "resolution",
            ExecutionError::InvalidConfig { .. } => "invalid_config",
            ExecutionError::Validation(_) => "validation",
            ExecutionError::ExternalWrite { .. } => "external_write",
            ExecutionError::Network { .. } => "network",
            ExecutionError::Timeout { .. } => "timeout",
            ExecutionError::Model { .. } => "model",
            ExecutionError::Serde(_) => "serde",
        }
    }
}

/// Input handed to an executor: the node's configuration with every
/// variable reference already resolved, plus whatever the caller supplied
/// on a resume (JSON `null` on first execution).
#[derive(Clone, Debug)]
pub struct ResolvedInput {
    pub config: Value,
    pub supplied: Value,
}

impl ResolvedInput {
    pub fn new(config: Value) -> Self {
        Self {
            config,
            supplied: Value::Null,
        }
    }

    #[must_use]
    pub fn with_supplied(mut self, supplied: Value) -> Self {
        self.supplied = supplied;
        self
    }

    /// Whether this invocation is a replay carrying resume input.
    pub fn is_resume(&self) -> bool {
        !self.supplied.is_null()
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Required string configuration field.
    pub fn config_str(&self, key: &str) -> Result<&str, ExecutionError> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutionError::InvalidConfig {
                what: format!("missing string field `{key}`"),
            })
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }
}

/// Context passed to executors: run/node identity plus the streaming
/// emitter for incremental output.
#[derive(Clone)]
pub struct ExecContext {
    pub run_id: String,
    pub node_id: String,
    emitter: StreamEmitter,
}

impl ExecContext {
    pub fn new(run_id: impl Into<String>, node_id: impl Into<String>, emitter: StreamEmitter) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
            emitter,
        }
    }

    /// Relay a partial output fragment to the run's attached listener.
    pub fn emit_chunk(&self, content: impl Into<String>) {
        self.emitter.chunk(content);
    }
}

/// One strategy per node kind.
///
/// Executors are stateless with respect to runs: everything they need
/// arrives through the resolved input and context, and everything they
/// produce leaves through the outcome. Pausable kinds are replayed with
/// the caller-supplied input merged in when the run resumes.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        input: ResolvedInput,
        ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_wire_form() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn unknown_kind_fails_parse() {
        assert_eq!(NodeKind::parse("pdfNode"), None);
        assert_eq!(NodeKind::parse(""), None);
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&NodeKind::CrmApproval).unwrap();
        assert_eq!(json, "\"crm-approval\"");
    }

    #[test]
    fn resume_detection() {
        let first = ResolvedInput::new(serde_json::json!({}));
        assert!(!first.is_resume());
        let resumed = first.with_supplied(serde_json::json!({"age": 20}));
        assert!(resumed.is_resume());
    }
}
