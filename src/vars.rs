//! Strict resolution of `{{nodeId.field}}` variable references.
//!
//! Node configurations reference upstream outputs with the pattern
//! `{{<nodeId>.<field.path>}}`. Resolution is a two-phase protocol: parse
//! every reference out of the text, then look each up against the producing
//! node's completed result payload. The whole call fails on any single
//! unresolved reference — an automation step half-filled with literal
//! `{{...}}` text is worse than an explicit failure.
//!
//! Resolution is side-effect free and safely repeatable against the same
//! run state.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// Source of completed node outputs a resolution call reads from.
///
/// Implemented by the run record; tests can implement it over plain maps.
pub trait OutputSource {
    /// Whether a node with this id exists in the graph at all.
    fn knows_node(&self, node_id: &str) -> bool;

    /// The completed result payload for a node, if it has completed.
    fn completed_output(&self, node_id: &str) -> Option<&Value>;
}

/// A single parsed `{{nodeId.field.path}}` reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarRef {
    /// Byte range of the full `{{...}}` pattern in the source text.
    pub span: (usize, usize),
    pub node_id: String,
    pub field_path: String,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ResolutionError {
    #[error("malformed variable reference `{{{{{text}}}}}`")]
    #[diagnostic(
        code(stepflow::vars::malformed),
        help("References use the form {{nodeId.field}}.")
    )]
    Malformed { text: String },

    #[error("variable references unknown node `{node_id}`")]
    #[diagnostic(code(stepflow::vars::unknown_node))]
    UnknownNode { node_id: String },

    #[error("node `{node_id}` has not completed; its outputs are not yet visible")]
    #[diagnostic(
        code(stepflow::vars::not_completed),
        help("Only Completed nodes expose outputs to downstream references.")
    )]
    NodeNotCompleted { node_id: String },

    #[error("field `{field_path}` not found in output of node `{node_id}`")]
    #[diagnostic(code(stepflow::vars::missing_field))]
    MissingField {
        node_id: String,
        field_path: String,
    },
}

/// Parse every variable reference in `text`, in order of appearance.
pub fn parse_refs(text: &str) -> Result<Vec<VarRef>, ResolutionError> {
    let bytes = text.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if &bytes[i..i + 2] != b"{{" {
            i += 1;
            continue;
        }
        let Some(rel_end) = text[i + 2..].find("}}") else {
            break;
        };
        let inner = &text[i + 2..i + 2 + rel_end];
        let end = i + 2 + rel_end + 2;
        let Some((node_id, field_path)) = inner.split_once('.') else {
            return Err(ResolutionError::Malformed {
                text: inner.to_string(),
            });
        };
        if node_id.trim().is_empty() || field_path.trim().is_empty() {
            return Err(ResolutionError::Malformed {
                text: inner.to_string(),
            });
        }
        refs.push(VarRef {
            span: (i, end),
            node_id: node_id.trim().to_string(),
            field_path: field_path.trim().to_string(),
        });
        i = end;
    }
    Ok(refs)
}

/// Resolve every reference in `text`, substituting canonical string forms.
///
/// Numbers and booleans use their JSON display form, strings substitute
/// raw, objects and arrays serialize as compact JSON.
pub fn resolve_text(text: &str, source: &dyn OutputSource) -> Result<String, ResolutionError> {
    let refs = parse_refs(text)?;
    if refs.is_empty() {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for var in &refs {
        let value = lookup(var, source)?;
        out.push_str(&text[cursor..var.span.0]);
        out.push_str(&stringify(value));
        cursor = var.span.1;
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}

/// Resolve references structurally through a configuration value.
///
/// A string consisting of exactly one reference substitutes the referenced
/// value itself, preserving its structure; any other string goes through
/// [`resolve_text`]. Objects and arrays are walked recursively.
pub fn resolve_value(value: &Value, source: &dyn OutputSource) -> Result<Value, ResolutionError> {
    match value {
        Value::String(text) => {
            let refs = parse_refs(text)?;
            if let [only] = refs.as_slice()
                && only.span == (0, text.len())
            {
                return Ok(lookup(only, source)?.clone());
            }
            Ok(Value::String(resolve_text(text, source)?))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, source))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), resolve_value(item, source)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn lookup<'a>(var: &VarRef, source: &'a dyn OutputSource) -> Result<&'a Value, ResolutionError> {
    if !source.knows_node(&var.node_id) {
        return Err(ResolutionError::UnknownNode {
            node_id: var.node_id.clone(),
        });
    }
    let output = source.completed_output(&var.node_id).ok_or_else(|| {
        ResolutionError::NodeNotCompleted {
            node_id: var.node_id.clone(),
        }
    })?;
    let mut current = output;
    for key in var.field_path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key).ok_or_else(|| ResolutionError::MissingField {
                node_id: var.node_id.clone(),
                field_path: var.field_path.clone(),
            })?,
            _ => {
                return Err(ResolutionError::MissingField {
                    node_id: var.node_id.clone(),
                    field_path: var.field_path.clone(),
                });
            }
        };
    }
    Ok(current)
}

/// Canonical string form used when a value lands inside a string field.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // Compact JSON for structured values embedded in text.
        other => other.to_string(),
    }
}
