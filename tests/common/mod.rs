#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use stepflow::config::EngineConfig;
use stepflow::engine::Engine;
use stepflow::executors::{Collaborators, ExecutorRegistry};
use stepflow::graph::{Graph, GraphDefinition};
use stepflow::run::RunStore;
use stepflow::stream::StreamHub;

pub fn engine_for(doc: Value) -> Arc<Engine> {
    engine_with(doc, Collaborators::in_memory(), EngineConfig::default())
}

pub fn engine_with(
    doc: Value,
    collaborators: Collaborators,
    config: EngineConfig,
) -> Arc<Engine> {
    let definition: GraphDefinition = serde_json::from_value(doc).expect("valid graph document");
    let registry = Arc::new(ExecutorRegistry::standard(collaborators, &config));
    let graph = Arc::new(Graph::load(definition, &registry).expect("valid graph"));
    Arc::new(Engine::new(
        graph,
        registry,
        Arc::new(RunStore::new()),
        Arc::new(StreamHub::new()),
        config,
    ))
}

/// Signup flow: form feeds a condition that either qualifies the contact
/// (record update) or notifies the owner, each branch ending separately.
pub fn onboarding_graph() -> Value {
    json!({
        "nodes": [
            {"id": "trigger1", "type": "trigger", "label": "Signup received"},
            {"id": "form1", "type": "form", "label": "Profile", "config": {
                "fields": [
                    {"name": "email", "type": "text", "required": true},
                    {"name": "age", "type": "number", "required": true},
                ],
            }},
            {"id": "cond1", "type": "condition", "label": "Adult?", "config": {
                "left": "{{form1.age}}", "operator": "gte", "right": 18,
            }},
            {"id": "update1", "type": "update", "label": "Qualify", "config": {
                "object": "contact",
                "record_id": "c-1",
                "fields": {"status": "qualified", "email": "{{form1.email}}"},
            }},
            {"id": "notify1", "type": "notification", "label": "Flag minor", "config": {
                "recipient": "ops@example.com",
                "message": "Underage signup: {{form1.email}}",
            }},
            {"id": "end_yes", "type": "end"},
            {"id": "end_no", "type": "end"},
        ],
        "edges": [
            {"source": "trigger1", "target": "form1"},
            {"source": "form1", "target": "cond1"},
            {"source": "cond1", "target": "update1", "branch": "true"},
            {"source": "cond1", "target": "notify1", "branch": "false"},
            {"source": "update1", "target": "end_yes"},
            {"source": "notify1", "target": "end_no"},
        ],
    })
}

pub fn linear_graph() -> Value {
    json!({
        "nodes": [
            {"id": "trigger1", "type": "trigger"},
            {"id": "notify1", "type": "notification", "config": {
                "recipient": "ops@example.com",
                "message": "started by {{trigger1.email}}",
            }},
            {"id": "end1", "type": "end"},
        ],
        "edges": [
            {"source": "trigger1", "target": "notify1"},
            {"source": "notify1", "target": "end1"},
        ],
    })
}
