//! Serde document types for graph definitions.
//!
//! `{ nodes: [...], edges: [...] }` is the only persisted/exchanged
//! artifact format; it is what the builder UI authors and what
//! [`Graph::load`](super::Graph::load) validates. The node `type` field is
//! an open string here and only becomes a [`crate::node::NodeKind`] during
//! load, so unknown kinds surface as a load error rather than a serde one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw graph document as exchanged with the builder UI.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub nodes: Vec<NodeDef>,
    pub edges: Vec<EdgeDef>,
}

/// One authored node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDef {
    /// Unique within the graph, stable, referenced by downstream
    /// `{{id.field}}` variables.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub label: String,
    /// Kind-specific configuration; values may embed variable references.
    #[serde(default = "empty_config")]
    pub config: Value,
    /// Canvas placement; presentational only, never semantically load-bearing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

fn empty_config() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Directed relation between two nodes.
///
/// `branch` distinguishes condition-node outgoing edges (`"true"`/`"false"`)
/// from default sequencing edges. Declaration order is load-bearing: it is
/// the engine's deterministic frontier evaluation order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeDef {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}
