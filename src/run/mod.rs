//! Per-run state: node instances, statuses, and the transition rules.
//!
//! A [`Run`] is the mutable record of one execution of a loaded graph. The
//! graph itself stays immutable; everything that changes as execution
//! proceeds lives here. All transitions on a run happen under its store
//! lock, so the methods on [`Run`] take `&mut self` and enforce only the
//! legality of each transition, not concurrency.

mod store;

pub use store::{RunStore, StoreError};

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::Value;

use crate::graph::Graph;
use crate::node::PauseKind;
use crate::vars::OutputSource;

/// Lifecycle of a whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// At least one node is paused and nothing else can make progress.
    WaitingUserInput,
    Completed,
    /// Terminal; covers node failures and explicit cancellation (the
    /// failure record's kind distinguishes them).
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Lifecycle of one node within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    WaitingUserInput,
    Completed,
    Failed,
    /// On a pruned branch or stranded by a failure; will never execute.
    Skipped,
}

/// Error record kept on a failed node and on the run itself. Run-level
/// failures with no single culprit node (cancellation) carry no node id.
#[derive(Clone, Debug, Serialize)]
pub struct FailureRecord {
    pub node_id: Option<String>,
    /// Stable machine tag, see [`crate::node::ExecutionError::kind`].
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Mutable execution record of one node.
#[derive(Clone, Debug, Serialize)]
pub struct NodeInstance {
    pub status: NodeStatus,
    /// Snapshot of the fully resolved configuration, for audit.
    pub resolved_config: Option<Value>,
    /// Result payload once Completed; what downstream references read.
    pub result: Option<Value>,
    pub error: Option<FailureRecord>,
    #[serde(skip)]
    pub pause: Option<PauseKind>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeInstance {
    fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            resolved_config: None,
            result: None,
            error: None,
            pause: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// One line of the run's append-only activity log.
#[derive(Clone, Debug, Serialize)]
pub struct RunLogEntry {
    pub at: DateTime<Utc>,
    pub node_id: Option<String>,
    pub message: String,
}

/// Illegal transition attempts; callers treat these as bugs or races made
/// visible, never silently absorbed.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum TransitionError {
    #[error("node `{node_id}` is not part of this run")]
    #[diagnostic(code(stepflow::run::unknown_node))]
    UnknownNode { node_id: String },

    #[error("node `{node_id}` already completed; results are write-once")]
    #[diagnostic(code(stepflow::run::already_completed))]
    AlreadyCompleted { node_id: String },

    #[error("node `{node_id}` is {status:?}, expected {expected:?}")]
    #[diagnostic(code(stepflow::run::wrong_status))]
    WrongStatus {
        node_id: String,
        status: NodeStatus,
        expected: NodeStatus,
    },
}

/// Mutable state of one run.
#[derive(Debug)]
pub struct Run {
    pub run_id: String,
    pub status: RunStatus,
    nodes: FxHashMap<String, NodeInstance>,
    /// Graph edge indices disabled by condition branch selection.
    pruned_edges: FxHashSet<usize>,
    pub failure: Option<FailureRecord>,
    pub log: Vec<RunLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Fresh run with every node Pending.
    pub fn new(run_id: impl Into<String>, graph: &Graph) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            status: RunStatus::Running,
            nodes: graph
                .nodes()
                .map(|node| (node.id.clone(), NodeInstance::pending()))
                .collect(),
            pruned_edges: FxHashSet::default(),
            failure: None,
            log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeInstance> {
        self.nodes.get(node_id)
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.nodes.get(node_id).map(|n| n.status)
    }

    fn node_mut(&mut self, node_id: &str) -> Result<&mut NodeInstance, TransitionError> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| TransitionError::UnknownNode {
                node_id: node_id.to_string(),
            })
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn record(&mut self, node_id: Option<&str>, message: impl Into<String>) {
        self.log.push(RunLogEntry {
            at: Utc::now(),
            node_id: node_id.map(str::to_string),
            message: message.into(),
        });
    }

    /// Pending -> Running, capturing the resolved configuration snapshot.
    /// Also replays paused nodes (WaitingUserInput -> Running) on resume.
    pub fn mark_running(
        &mut self,
        node_id: &str,
        resolved_config: Value,
    ) -> Result<(), TransitionError> {
        let instance = self.node_mut(node_id)?;
        match instance.status {
            NodeStatus::Pending | NodeStatus::WaitingUserInput => {
                instance.status = NodeStatus::Running;
                instance.resolved_config = Some(resolved_config);
                if instance.started_at.is_none() {
                    instance.started_at = Some(Utc::now());
                }
                self.touch();
                Ok(())
            }
            NodeStatus::Completed => Err(TransitionError::AlreadyCompleted {
                node_id: node_id.to_string(),
            }),
            status => Err(TransitionError::WrongStatus {
                node_id: node_id.to_string(),
                status,
                expected: NodeStatus::Pending,
            }),
        }
    }

    /// Running -> Completed; write-once.
    pub fn complete_node(&mut self, node_id: &str, result: Value) -> Result<(), TransitionError> {
        let instance = self.node_mut(node_id)?;
        match instance.status {
            NodeStatus::Running => {
                instance.status = NodeStatus::Completed;
                instance.result = Some(result);
                instance.pause = None;
                instance.completed_at = Some(Utc::now());
                self.touch();
                Ok(())
            }
            NodeStatus::Completed => Err(TransitionError::AlreadyCompleted {
                node_id: node_id.to_string(),
            }),
            status => Err(TransitionError::WrongStatus {
                node_id: node_id.to_string(),
                status,
                expected: NodeStatus::Running,
            }),
        }
    }

    /// Running -> WaitingUserInput, remembering why it paused.
    pub fn pause_node(&mut self, node_id: &str, pause: PauseKind) -> Result<(), TransitionError> {
        let instance = self.node_mut(node_id)?;
        match instance.status {
            NodeStatus::Running => {
                instance.status = NodeStatus::WaitingUserInput;
                instance.pause = Some(pause);
                self.touch();
                Ok(())
            }
            status => Err(TransitionError::WrongStatus {
                node_id: node_id.to_string(),
                status,
                expected: NodeStatus::Running,
            }),
        }
    }

    /// Running -> Failed; the failure record is mirrored onto the run.
    pub fn fail_node(
        &mut self,
        node_id: &str,
        kind: &str,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let record = FailureRecord {
            node_id: Some(node_id.to_string()),
            kind: kind.to_string(),
            message: message.into(),
            at: Utc::now(),
        };
        let instance = self.node_mut(node_id)?;
        instance.status = NodeStatus::Failed;
        instance.error = Some(record.clone());
        instance.pause = None;
        instance.completed_at = Some(record.at);
        self.failure = Some(record);
        self.touch();
        Ok(())
    }

    /// Explicit caller-driven abort: terminal Failed with a `cancelled`
    /// failure kind attributed to no single node.
    pub fn mark_cancelled(&mut self) {
        self.status = RunStatus::Failed;
        self.failure = Some(FailureRecord {
            node_id: None,
            kind: "cancelled".to_string(),
            message: "run cancelled".to_string(),
            at: Utc::now(),
        });
        self.touch();
    }

    /// Undo a Pending -> Running flip for a node whose work was discarded
    /// before it executed.
    pub fn revert_to_pending(&mut self, node_id: &str) {
        if let Some(instance) = self.nodes.get_mut(node_id)
            && instance.status == NodeStatus::Running
        {
            instance.status = NodeStatus::Pending;
            instance.resolved_config = None;
            instance.started_at = None;
            self.touch();
        }
    }

    /// A resume attempt whose input was rejected; the pause stays armed.
    pub fn revert_to_waiting(&mut self, node_id: &str, pause: PauseKind) {
        if let Some(instance) = self.nodes.get_mut(node_id)
            && instance.status == NodeStatus::Running
        {
            instance.status = NodeStatus::WaitingUserInput;
            instance.pause = Some(pause);
            self.touch();
        }
    }

    /// Pending or WaitingUserInput -> Skipped, for pruned branches,
    /// stranded nodes, and cancellation.
    pub fn skip_node(&mut self, node_id: &str) -> Result<(), TransitionError> {
        let instance = self.node_mut(node_id)?;
        match instance.status {
            NodeStatus::Pending | NodeStatus::WaitingUserInput => {
                instance.status = NodeStatus::Skipped;
                instance.pause = None;
                self.touch();
                Ok(())
            }
            // Skipping twice is a no-op, not an error.
            NodeStatus::Skipped => Ok(()),
            status => Err(TransitionError::WrongStatus {
                node_id: node_id.to_string(),
                status,
                expected: NodeStatus::Pending,
            }),
        }
    }

    pub fn prune_edge(&mut self, edge_idx: usize) {
        self.pruned_edges.insert(edge_idx);
        self.touch();
    }

    pub fn is_edge_pruned(&self, edge_idx: usize) -> bool {
        self.pruned_edges.contains(&edge_idx)
    }

    /// Node ids currently paused for caller input, in the order given.
    /// Timer pauses wake on their own and are never offered as targets.
    pub fn waiting_nodes<'a>(
        &self,
        order: impl Iterator<Item = &'a str>,
    ) -> Vec<String> {
        order
            .filter(|id| {
                self.nodes.get(*id).is_some_and(|instance| {
                    instance.status == NodeStatus::WaitingUserInput
                        && !matches!(instance.pause, Some(PauseKind::Timer { .. }))
                })
            })
            .map(str::to_string)
            .collect()
    }

    /// Serializable view for status queries.
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            status: self.status,
            nodes: self
                .nodes
                .iter()
                .map(|(id, instance)| (id.clone(), instance.clone()))
                .collect(),
            failure: self.failure.clone(),
            log: self.log.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl OutputSource for Run {
    fn knows_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    fn completed_output(&self, node_id: &str) -> Option<&serde_json::Value> {
        self.nodes
            .get(node_id)
            .filter(|n| n.status == NodeStatus::Completed)
            .and_then(|n| n.result.as_ref())
    }
}

/// Point-in-time view of a run, safe to serialize outside the lock.
#[derive(Clone, Debug, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub nodes: std::collections::BTreeMap<String, NodeInstance>,
    pub failure: Option<FailureRecord>,
    pub log: Vec<RunLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
