//! Frontier scheduler: drives runs from trigger to completion.
//!
//! The engine alternates two phases per pass. Under the run's lock it scans
//! nodes in declaration order, skipping pruned branches and collecting every
//! node whose dependencies are all satisfied into a batch with its resolved
//! input. Outside the lock the batch executes concurrently; outcomes are
//! then applied serially, again in declaration order. Parallel execution,
//! serialized state transition.
//!
//! A pass ends when no batch can be formed: the run is then completed,
//! failed, or parked as waiting depending on what remains. Paused timers
//! re-enter through a spawned wake-up task; human pauses re-enter through
//! [`Engine::resume_node`].

use std::sync::Arc;

use futures_util::future::join_all;
use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::executors::ExecutorRegistry;
use crate::graph::Graph;
use crate::node::{ExecContext, ExecutionError, ExecutionOutcome, PauseKind, ResolvedInput};
use crate::run::{NodeStatus, Run, RunSnapshot, RunStatus, RunStore, StoreError};
use crate::stream::{StreamEvent, StreamHub};
use crate::vars::resolve_value;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("run `{run_id}` is {status:?}; no further transitions accepted")]
    #[diagnostic(code(stepflow::engine::run_finished))]
    RunFinished { run_id: String, status: RunStatus },

    #[error("node `{node_id}` in run `{run_id}` cannot be resumed: {reason}")]
    #[diagnostic(
        code(stepflow::engine::invalid_resume_target),
        help("Only nodes currently waiting for input accept a resume.")
    )]
    InvalidResumeTarget {
        run_id: String,
        node_id: String,
        reason: String,
    },

    /// Supplied input was rejected by the node; the pause stays armed and
    /// the caller may retry with corrected input.
    #[error("resume of `{node_id}` rejected: {reason}")]
    #[diagnostic(code(stepflow::engine::resume_rejected))]
    ResumeRejected { node_id: String, reason: String },
}

/// One unit of work collected from the frontier.
struct Dispatch {
    node_id: String,
    executor: Arc<dyn crate::node::NodeExecutor>,
    input: ResolvedInput,
}

#[derive(Clone)]
pub struct Engine {
    graph: Arc<Graph>,
    registry: Arc<ExecutorRegistry>,
    store: Arc<RunStore>,
    streams: Arc<StreamHub>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        graph: Arc<Graph>,
        registry: Arc<ExecutorRegistry>,
        store: Arc<RunStore>,
        streams: Arc<StreamHub>,
        config: EngineConfig,
    ) -> Self {
        Self {
            graph,
            registry,
            store,
            streams,
            config,
        }
    }

    pub fn streams(&self) -> &Arc<StreamHub> {
        &self.streams
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Create a run and drive it as far as it will go.
    ///
    /// The seed payload becomes the entry node's supplied input, so its
    /// fields are visible downstream as `{{<entryId>.<field>}}`.
    #[instrument(skip(self, seed))]
    pub async fn start_run(&self, run_id: &str, seed: Value) -> Result<RunSnapshot, EngineError> {
        let run = self.store.create(run_id, &self.graph)?;
        let emitter = self.streams.emitter(run_id);
        emitter.emit(StreamEvent::Start);
        info!(run_id, "run started");

        {
            let mut guard = run.lock().await;
            guard.record(None, "run created");
        }
        self.advance(run_id, &run, Some(seed)).await;
        self.finish_attempt(run_id, &run).await
    }

    /// Deliver input to a waiting node and drive the run forward.
    #[instrument(skip(self, supplied))]
    pub async fn resume_node(
        &self,
        run_id: &str,
        node_id: &str,
        supplied: Value,
    ) -> Result<RunSnapshot, EngineError> {
        self.resume_inner(run_id, node_id, supplied, false).await
    }

    async fn resume_inner(
        &self,
        run_id: &str,
        node_id: &str,
        supplied: Value,
        from_timer: bool,
    ) -> Result<RunSnapshot, EngineError> {
        let run = self.store.get(run_id)?;
        let emitter = self.streams.emitter(run_id);

        // Validate the target and flip it to Running under the lock.
        let (executor, input, pause) = {
            let mut guard = run.lock().await;
            if guard.status.is_terminal() {
                return Err(EngineError::RunFinished {
                    run_id: run_id.to_string(),
                    status: guard.status,
                });
            }
            let node = self.graph.node(node_id).ok_or_else(|| {
                EngineError::InvalidResumeTarget {
                    run_id: run_id.to_string(),
                    node_id: node_id.to_string(),
                    reason: "no such node in this graph".to_string(),
                }
            })?;
            let instance = guard.node(node_id).ok_or_else(|| {
                EngineError::InvalidResumeTarget {
                    run_id: run_id.to_string(),
                    node_id: node_id.to_string(),
                    reason: "no such node in this run".to_string(),
                }
            })?;
            if instance.status != NodeStatus::WaitingUserInput {
                return Err(EngineError::InvalidResumeTarget {
                    run_id: run_id.to_string(),
                    node_id: node_id.to_string(),
                    reason: format!("node is {:?}, not waiting", instance.status),
                });
            }
            let pause = instance.pause.clone().unwrap_or(PauseKind::UserInput);
            if matches!(pause, PauseKind::Timer { .. }) && !from_timer {
                return Err(EngineError::InvalidResumeTarget {
                    run_id: run_id.to_string(),
                    node_id: node_id.to_string(),
                    reason: "delay nodes resume on their own timer".to_string(),
                });
            }
            let resolved = match resolve_value(&node.config, &*guard) {
                Ok(resolved) => resolved,
                Err(err) => {
                    return Err(EngineError::ResumeRejected {
                        node_id: node_id.to_string(),
                        reason: err.to_string(),
                    });
                }
            };
            let executor = self
                .registry
                .get(node.kind)
                .ok_or_else(|| EngineError::InvalidResumeTarget {
                    run_id: run_id.to_string(),
                    node_id: node_id.to_string(),
                    reason: format!("no executor for kind `{}`", node.kind),
                })?;
            if guard.mark_running(node_id, resolved.clone()).is_err() {
                return Err(EngineError::InvalidResumeTarget {
                    run_id: run_id.to_string(),
                    node_id: node_id.to_string(),
                    reason: "node raced into another state".to_string(),
                });
            }
            guard.record(Some(node_id), "resume input received");
            (
                executor,
                ResolvedInput::new(resolved).with_supplied(supplied),
                pause,
            )
        };

        emitter.emit(StreamEvent::Start);
        let ctx = ExecContext::new(run_id, node_id, emitter.clone());
        let result = executor.execute(input, ctx).await;

        {
            let mut guard = run.lock().await;
            match result {
                Err(ExecutionError::Validation(reason)) => {
                    // Rejected input does not consume the pause.
                    guard.revert_to_waiting(node_id, pause);
                    guard.record(Some(node_id), format!("resume rejected: {reason}"));
                    drop(guard);
                    emitter.emit(StreamEvent::Error {
                        error: format!("resume rejected: {reason}"),
                    });
                    return Err(EngineError::ResumeRejected {
                        node_id: node_id.to_string(),
                        reason,
                    });
                }
                other => self.apply_outcome(&mut guard, run_id, node_id, other),
            }
        }

        self.advance(run_id, &run, None).await;
        self.finish_attempt(run_id, &run).await
    }

    /// Abort a run: waiting and pending nodes become Skipped, the run
    /// fails with a `cancelled` kind, and any attached stream is closed
    /// with a terminal error event.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: &str) -> Result<RunSnapshot, EngineError> {
        let run = self.store.get(run_id)?;
        let mut guard = run.lock().await;
        if guard.status.is_terminal() {
            return Err(EngineError::RunFinished {
                run_id: run_id.to_string(),
                status: guard.status,
            });
        }
        for node in self.graph.nodes() {
            if matches!(
                guard.node_status(&node.id),
                Some(NodeStatus::Pending | NodeStatus::WaitingUserInput)
            ) {
                let _ = guard.skip_node(&node.id);
            }
        }
        guard.mark_cancelled();
        guard.record(None, "run cancelled");
        info!(run_id, "run cancelled");
        let snapshot = guard.snapshot();
        drop(guard);
        self.streams.emitter(run_id).emit(StreamEvent::Error {
            error: "run cancelled".to_string(),
        });
        Ok(snapshot)
    }

    pub async fn run_snapshot(&self, run_id: &str) -> Result<RunSnapshot, EngineError> {
        let run = self.store.get(run_id)?;
        let guard = run.lock().await;
        Ok(guard.snapshot())
    }

    /// First node waiting on caller input, in declaration order. Timer
    /// pauses are not offered; they wake on their own.
    pub async fn first_waiting(&self, run_id: &str) -> Result<Option<String>, EngineError> {
        let run = self.store.get(run_id)?;
        let guard = run.lock().await;
        Ok(guard
            .waiting_nodes(self.graph.nodes().map(|n| n.id.as_str()))
            .into_iter()
            .next())
    }

    /// Repeatedly collect and execute frontier batches until none forms.
    async fn advance(&self, run_id: &str, run: &Arc<AsyncMutex<Run>>, mut seed: Option<Value>) {
        loop {
            let batch = {
                let mut guard = run.lock().await;
                if guard.status.is_terminal() {
                    return;
                }
                self.collect_frontier(&mut guard, run_id, seed.take())
            };
            let Some(batch) = batch else {
                return;
            };
            if batch.is_empty() {
                self.settle(run_id, run).await;
                return;
            }

            let results = join_all(batch.into_iter().map(|dispatch| {
                let emitter = self.streams.emitter(run_id);
                async move {
                    let ctx = ExecContext::new(run_id, &dispatch.node_id, emitter);
                    let result = dispatch.executor.execute(dispatch.input, ctx).await;
                    (dispatch.node_id, result)
                }
            }))
            .await;

            let mut guard = run.lock().await;
            for (node_id, result) in results {
                self.apply_outcome(&mut guard, run_id, &node_id, result);
            }
        }
    }

    /// Collect every ready Pending node, flipping each to Running with its
    /// resolved input. Returns `None` when a resolution failure already
    /// terminated the run.
    fn collect_frontier(
        &self,
        guard: &mut Run,
        run_id: &str,
        mut seed: Option<Value>,
    ) -> Option<Vec<Dispatch>> {
        let mut batch: Vec<Dispatch> = Vec::new();
        // Skip propagation can unblock later nodes in the same scan, so
        // loop until a scan makes no skip.
        loop {
            let mut skipped = false;
            for node in self.graph.nodes() {
                if guard.node_status(&node.id) != Some(NodeStatus::Pending) {
                    continue;
                }
                let incoming = self.graph.incoming(&node.id);
                let all_pruned =
                    !incoming.is_empty() && incoming.iter().all(|&e| guard.is_edge_pruned(e));
                if all_pruned {
                    let _ = guard.skip_node(&node.id);
                    for &edge_idx in self.graph.outgoing(&node.id) {
                        guard.prune_edge(edge_idx);
                    }
                    guard.record(Some(&node.id), "skipped: branch not taken");
                    skipped = true;
                    continue;
                }
                let ready = incoming.iter().all(|&e| {
                    guard.is_edge_pruned(e)
                        || guard.node_status(self.graph.node_id_of(self.graph.edge(e).source))
                            == Some(NodeStatus::Completed)
                });
                if !ready {
                    continue;
                }
                let resolved = match resolve_value(&node.config, &*guard) {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        let message = err.to_string();
                        let _ = guard.mark_running(&node.id, node.config.clone());
                        let _ = guard.fail_node(&node.id, "resolution", &message);
                        guard.status = RunStatus::Failed;
                        guard.record(Some(&node.id), format!("failed: {message}"));
                        warn!(run_id, node_id = %node.id, %message, "resolution failed");
                        // Siblings already collected this scan never ran.
                        for dispatch in &batch {
                            guard.revert_to_pending(&dispatch.node_id);
                        }
                        return None;
                    }
                };
                if guard.mark_running(&node.id, resolved.clone()).is_err() {
                    continue;
                }
                let Some(executor) = self.registry.get(node.kind) else {
                    continue;
                };
                let mut input = ResolvedInput::new(resolved);
                if node.id == self.graph.entry().id
                    && let Some(seed) = seed.take()
                {
                    input = input.with_supplied(seed);
                }
                batch.push(Dispatch {
                    node_id: node.id.clone(),
                    executor,
                    input,
                });
            }
            if !skipped {
                break;
            }
        }
        Some(batch)
    }

    /// Apply one executor result under the run lock.
    fn apply_outcome(
        &self,
        guard: &mut Run,
        run_id: &str,
        node_id: &str,
        result: Result<ExecutionOutcome, ExecutionError>,
    ) {
        match result {
            Ok(ExecutionOutcome::Completed(value)) => {
                self.apply_branching(guard, node_id, &value);
                if guard.complete_node(node_id, value).is_ok() {
                    guard.record(Some(node_id), "completed");
                    info!(run_id, node_id, "node completed");
                }
            }
            Ok(ExecutionOutcome::Paused(pause)) => {
                if let PauseKind::Timer { duration } = &pause {
                    let duration = (*duration).min(self.config.max_delay);
                    self.spawn_timer(run_id, node_id, duration);
                }
                if guard.pause_node(node_id, pause).is_ok() {
                    guard.record(Some(node_id), "waiting for input");
                    info!(run_id, node_id, "node paused");
                }
            }
            Err(err) => {
                let message = err.to_string();
                let _ = guard.fail_node(node_id, err.kind(), &message);
                guard.status = RunStatus::Failed;
                guard.record(Some(node_id), format!("failed: {message}"));
                warn!(run_id, node_id, %message, "node failed");
            }
        }
    }

    /// Prune outgoing edges disagreeing with a condition's chosen branch.
    /// Unlabeled edges survive either verdict.
    fn apply_branching(&self, guard: &mut Run, node_id: &str, result: &Value) {
        let Some(node) = self.graph.node(node_id) else {
            return;
        };
        if !node.kind.is_branching() {
            return;
        }
        let Some(chosen) = result.get("branch").and_then(Value::as_str) else {
            return;
        };
        for &edge_idx in self.graph.outgoing(node_id) {
            if let Some(label) = &self.graph.edge(edge_idx).branch
                && label != chosen
            {
                guard.prune_edge(edge_idx);
            }
        }
    }

    /// Decide the run's resting state once no frontier batch forms.
    async fn settle(&self, run_id: &str, run: &Arc<AsyncMutex<Run>>) {
        let mut guard = run.lock().await;
        if guard.status.is_terminal() {
            return;
        }
        let mut any_waiting = false;
        let mut stranded = Vec::new();
        for node in self.graph.nodes() {
            match guard.node_status(&node.id) {
                Some(NodeStatus::WaitingUserInput) => any_waiting = true,
                Some(NodeStatus::Pending) => stranded.push(node.id.clone()),
                _ => {}
            }
        }
        if any_waiting {
            guard.status = RunStatus::WaitingUserInput;
            info!(run_id, "run waiting for input");
            return;
        }
        // Pendings that can never become ready (e.g. downstream of a failed
        // sibling path) are closed out before completion.
        for node_id in stranded {
            let _ = guard.skip_node(&node_id);
            guard.record(Some(&node_id), "skipped: unreachable");
        }
        guard.status = RunStatus::Completed;
        guard.record(None, "run completed");
        info!(run_id, "run completed");
    }

    /// Emit the attempt's terminal stream event and report the snapshot.
    async fn finish_attempt(
        &self,
        run_id: &str,
        run: &Arc<AsyncMutex<Run>>,
    ) -> Result<RunSnapshot, EngineError> {
        let guard = run.lock().await;
        let snapshot = guard.snapshot();
        drop(guard);
        let emitter = self.streams.emitter(run_id);
        match snapshot.status {
            RunStatus::Failed => {
                let error = snapshot
                    .failure
                    .as_ref()
                    .map(|f| f.message.clone())
                    .unwrap_or_else(|| "run failed".to_string());
                emitter.emit(StreamEvent::Error { error });
            }
            _ => emitter.emit(StreamEvent::End),
        }
        Ok(snapshot)
    }

    /// Wake a delay node after its duration elapses.
    fn spawn_timer(&self, run_id: &str, node_id: &str, duration: std::time::Duration) {
        let engine = self.clone();
        let run_id = run_id.to_string();
        let node_id = node_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Err(err) = engine
                .resume_inner(&run_id, &node_id, json!({"elapsed": true}), true)
                .await
            {
                // The run may have been cancelled or purged in the interim.
                warn!(%run_id, %node_id, error = %err, "timer resume not applied");
            }
        });
    }
}
