//! Graph model: validated, immutable workflow definitions.
//!
//! [`Graph::load`] turns the raw `{nodes, edges}` document into an
//! immutable graph after checking node-id uniqueness, edge referential
//! integrity, a single entry point, acyclicity from the entry, and that
//! every declared node kind has a registered executor. Loaded graphs are
//! shared read-only across all runs; a run mutates only its own node
//! instances, never the graph.

mod definition;

pub use definition::{EdgeDef, GraphDefinition, NodeDef, Position};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::executors::ExecutorRegistry;
use crate::node::NodeKind;

/// Load-time validation failures; any one rejects the whole graph.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("duplicate node id `{id}`")]
    #[diagnostic(code(stepflow::graph::duplicate_node_id))]
    DuplicateNodeId { id: String },

    #[error("edge references missing node: `{source_id}` -> `{target_id}`")]
    #[diagnostic(code(stepflow::graph::dangling_edge))]
    DanglingEdge {
        source_id: String,
        target_id: String,
    },

    #[error("graph must have exactly one entry point, found {candidates}")]
    #[diagnostic(
        code(stepflow::graph::no_entry_point),
        help("Exactly one node may have no incoming edges.")
    )]
    NoEntryPoint { candidates: usize },

    #[error("cycle detected through node `{node_id}`")]
    #[diagnostic(code(stepflow::graph::cycle_detected))]
    CycleDetected { node_id: String },

    #[error("node `{id}` declares unknown type `{kind}`")]
    #[diagnostic(
        code(stepflow::graph::unknown_node_type),
        help("The type must be registered with the executor registry.")
    )]
    UnknownNodeType { id: String, kind: String },
}

/// A validated node with its kind parsed into the closed enum.
#[derive(Clone, Debug)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub config: Value,
}

/// A validated directed edge, indices into the node table.
#[derive(Clone, Debug)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub branch: Option<String>,
}

/// Immutable, validated workflow graph.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    index: FxHashMap<String, usize>,
    edges: Vec<Edge>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    entry: usize,
}

impl Graph {
    /// Validate a raw definition against the executor registry.
    pub fn load(
        definition: GraphDefinition,
        registry: &ExecutorRegistry,
    ) -> Result<Self, GraphError> {
        let mut index = FxHashMap::default();
        let mut nodes = Vec::with_capacity(definition.nodes.len());
        for def in &definition.nodes {
            let kind = NodeKind::parse(&def.kind).ok_or_else(|| GraphError::UnknownNodeType {
                id: def.id.clone(),
                kind: def.kind.clone(),
            })?;
            if !registry.supports(kind) {
                return Err(GraphError::UnknownNodeType {
                    id: def.id.clone(),
                    kind: def.kind.clone(),
                });
            }
            if index.insert(def.id.clone(), nodes.len()).is_some() {
                return Err(GraphError::DuplicateNodeId { id: def.id.clone() });
            }
            nodes.push(GraphNode {
                id: def.id.clone(),
                kind,
                label: def.label.clone(),
                config: def.config.clone(),
            });
        }

        let mut edges = Vec::with_capacity(definition.edges.len());
        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut incoming = vec![Vec::new(); nodes.len()];
        for def in &definition.edges {
            let (Some(&source), Some(&target)) = (index.get(&def.source), index.get(&def.target))
            else {
                return Err(GraphError::DanglingEdge {
                    source_id: def.source.clone(),
                    target_id: def.target.clone(),
                });
            };
            let edge_idx = edges.len();
            edges.push(Edge {
                source,
                target,
                branch: def.branch.clone(),
            });
            outgoing[source].push(edge_idx);
            incoming[target].push(edge_idx);
        }

        let entries: Vec<usize> = (0..nodes.len())
            .filter(|&idx| incoming[idx].is_empty())
            .collect();
        let [entry] = entries.as_slice() else {
            return Err(GraphError::NoEntryPoint {
                candidates: entries.len(),
            });
        };
        let entry = *entry;

        let graph = Self {
            nodes,
            index,
            edges,
            outgoing,
            incoming,
            entry,
        };
        graph.check_acyclic_from_entry()?;
        Ok(graph)
    }

    /// Reject any cycle reachable from the entry point.
    ///
    /// The builder UI does not prevent authoring one, so this is the load
    /// boundary's job. Iterative DFS with a three-color marking.
    fn check_acyclic_from_entry(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let mut marks = vec![Mark::White; self.nodes.len()];
        // Stack entries: (node, next outgoing-edge position to try).
        let mut stack = vec![(self.entry, 0usize)];
        marks[self.entry] = Mark::Grey;
        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            if let Some(&edge_idx) = self.outgoing[node].get(frame.1) {
                frame.1 += 1;
                let next = self.edges[edge_idx].target;
                match marks[next] {
                    Mark::Grey => {
                        return Err(GraphError::CycleDetected {
                            node_id: self.nodes[next].id.clone(),
                        });
                    }
                    Mark::White => {
                        marks[next] = Mark::Grey;
                        stack.push((next, 0));
                    }
                    Mark::Black => {}
                }
            } else {
                marks[node] = Mark::Black;
                stack.pop();
            }
        }
        Ok(())
    }

    /// The single node with no incoming edges.
    pub fn entry(&self) -> &GraphNode {
        &self.nodes[self.entry]
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.index.get(node_id).map(|&idx| &self.nodes[idx])
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge(&self, edge_idx: usize) -> &Edge {
        &self.edges[edge_idx]
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_id_of(&self, node_idx: usize) -> &str {
        &self.nodes[node_idx].id
    }

    /// Outgoing edge indices of a node, in declaration order.
    pub fn outgoing(&self, node_id: &str) -> &[usize] {
        self.index
            .get(node_id)
            .map(|&idx| self.outgoing[idx].as_slice())
            .unwrap_or(&[])
    }

    /// Incoming edge indices of a node, in declaration order.
    pub fn incoming(&self, node_id: &str) -> &[usize] {
        self.index
            .get(node_id)
            .map(|&idx| self.incoming[idx].as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::executors::Collaborators;
    use serde_json::json;

    fn registry() -> ExecutorRegistry {
        ExecutorRegistry::standard(Collaborators::in_memory(), &EngineConfig::default())
    }

    fn load(doc: serde_json::Value) -> Result<Graph, GraphError> {
        let definition: GraphDefinition = serde_json::from_value(doc).unwrap();
        Graph::load(definition, &registry())
    }

    #[test]
    fn linear_graph_loads() {
        let graph = load(json!({
            "nodes": [
                {"id": "t", "type": "trigger", "label": "Start"},
                {"id": "e", "type": "end", "label": "Done"},
            ],
            "edges": [{"source": "t", "target": "e"}],
        }))
        .unwrap();
        assert_eq!(graph.entry().id, "t");
        assert_eq!(graph.outgoing("t").len(), 1);
        assert_eq!(graph.incoming("e").len(), 1);
    }

    #[test]
    fn duplicate_node_id_rejected() {
        let err = load(json!({
            "nodes": [
                {"id": "t", "type": "trigger"},
                {"id": "t", "type": "end"},
            ],
            "edges": [],
        }))
        .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNodeId { .. }));
    }

    #[test]
    fn dangling_edge_rejected() {
        let err = load(json!({
            "nodes": [{"id": "t", "type": "trigger"}],
            "edges": [{"source": "t", "target": "ghost"}],
        }))
        .unwrap_err();
        // The endpoint ids are plain fields of the variant, not a wrapped
        // error source.
        assert!(std::error::Error::source(&err).is_none());
        match err {
            GraphError::DanglingEdge {
                source_id,
                target_id,
            } => {
                assert_eq!(source_id, "t");
                assert_eq!(target_id, "ghost");
            }
            other => panic!("expected DanglingEdge, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_rejected_at_load() {
        let err = load(json!({
            "nodes": [{"id": "p", "type": "pdf"}],
            "edges": [],
        }))
        .unwrap_err();
        assert!(matches!(err, GraphError::UnknownNodeType { .. }));
    }

    #[test]
    fn multiple_entry_candidates_rejected() {
        let err = load(json!({
            "nodes": [
                {"id": "a", "type": "trigger"},
                {"id": "b", "type": "trigger"},
                {"id": "e", "type": "end"},
            ],
            "edges": [
                {"source": "a", "target": "e"},
                {"source": "b", "target": "e"},
            ],
        }))
        .unwrap_err();
        assert!(matches!(err, GraphError::NoEntryPoint { candidates: 2 }));
    }

    #[test]
    fn cycle_reachable_from_entry_rejected() {
        let err = load(json!({
            "nodes": [
                {"id": "t", "type": "trigger"},
                {"id": "a", "type": "notification"},
                {"id": "b", "type": "notification"},
            ],
            "edges": [
                {"source": "t", "target": "a"},
                {"source": "a", "target": "b"},
                {"source": "b", "target": "a"},
            ],
        }))
        .unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn edge_declaration_order_preserved() {
        let graph = load(json!({
            "nodes": [
                {"id": "t", "type": "trigger"},
                {"id": "c", "type": "condition", "config": {"left": "1", "operator": "eq", "right": "1"}},
                {"id": "yes", "type": "end"},
                {"id": "no", "type": "end"},
            ],
            "edges": [
                {"source": "t", "target": "c"},
                {"source": "c", "target": "yes", "branch": "true"},
                {"source": "c", "target": "no", "branch": "false"},
            ],
        }))
        .unwrap();
        let out = graph.outgoing("c");
        assert_eq!(graph.edge(out[0]).branch.as_deref(), Some("true"));
        assert_eq!(graph.edge(out[1]).branch.as_deref(), Some("false"));
    }

    #[test]
    fn position_is_ignored_but_round_trips() {
        let doc = json!({
            "nodes": [
                {"id": "t", "type": "trigger", "position": {"x": 10.0, "y": 20.0}},
                {"id": "e", "type": "end"},
            ],
            "edges": [{"source": "t", "target": "e"}],
        });
        let definition: GraphDefinition = serde_json::from_value(doc).unwrap();
        let serialized = serde_json::to_value(&definition).unwrap();
        assert_eq!(serialized["nodes"][0]["position"]["x"], 10.0);
        assert!(Graph::load(definition, &registry()).is_ok());
    }
}
