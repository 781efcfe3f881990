//! # Stepflow: Typed Workflow Orchestration Engine
//!
//! Stepflow executes directed graphs of heterogeneous automation steps —
//! forms, approvals, conditionals, record updates, webhooks, API calls,
//! delays, and LLM steps — in dependency order, with durable per-run state
//! keyed by a caller-supplied run id.
//!
//! ## Core Concepts
//!
//! - **Graph**: immutable, validated definition of nodes and edges, loaded
//!   from a `{nodes, edges}` document authored by a builder UI
//! - **Node executors**: one strategy per node kind behind a common async
//!   trait, resolved at graph-load time so unknown kinds fail fast
//! - **Runs**: pausable execution instances that survive arbitrary waits
//!   for human input and resume on an external signal
//! - **Variable references**: `{{nodeId.field}}` placeholders resolved
//!   strictly against upstream node outputs
//! - **Streaming**: per-run `start → chunk* → end | error` event channel,
//!   independent of the persisted run state
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use stepflow::config::EngineConfig;
//! use stepflow::engine::Engine;
//! use stepflow::executors::{Collaborators, ExecutorRegistry};
//! use stepflow::graph::{Graph, GraphDefinition};
//! use stepflow::run::RunStore;
//! use stepflow::stream::StreamHub;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let definition: GraphDefinition = serde_json::from_value(json!({
//!     "nodes": [
//!         {"id": "trigger1", "type": "trigger", "label": "Start"},
//!         {"id": "end1", "type": "end", "label": "Done"},
//!     ],
//!     "edges": [{"source": "trigger1", "target": "end1"}],
//! }))?;
//!
//! let config = EngineConfig::default();
//! let registry = Arc::new(ExecutorRegistry::standard(
//!     Collaborators::in_memory(),
//!     &config,
//! ));
//! let graph = Arc::new(Graph::load(definition, &registry)?);
//!
//! let engine = Arc::new(Engine::new(
//!     graph,
//!     registry,
//!     Arc::new(RunStore::new()),
//!     Arc::new(StreamHub::new()),
//!     config,
//! ));
//! engine.start_run("run-1", json!({"email": "ada@example.com"})).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`graph`] - Graph document model, load-time validation
//! - [`node`] - Node kinds, executor trait, execution outcomes and errors
//! - [`vars`] - Strict `{{nodeId.field}}` variable resolution
//! - [`executors`] - Per-kind executor implementations and the registry
//! - [`run`] - Run records and the keyed run-state arena
//! - [`engine`] - Frontier scheduler, pause/resume, cancellation
//! - [`stream`] - Per-run streaming session gateway
//! - [`server`] - Axum SSE adapter exposing runs over HTTP
//! - [`config`] - Environment-driven engine and server configuration

pub mod config;
pub mod engine;
pub mod executors;
pub mod graph;
pub mod node;
pub mod run;
pub mod server;
pub mod stream;
pub mod vars;
