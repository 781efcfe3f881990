//! Human-in-the-loop executors: form and the two approval variants.
//!
//! All three follow the same two-phase shape: the first invocation pauses
//! the run, the replay validates whatever the caller supplied and either
//! completes with it or rejects it (leaving the pause armed, handled by the
//! engine on a Validation error).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::node::{
    ExecContext, ExecutionError, ExecutionOutcome, NodeExecutor, PauseKind, ResolvedInput,
};

#[derive(Debug)]
struct FieldSpec {
    name: String,
    field_type: Option<String>,
    required: bool,
}

// Graph documents write {"name", "type", "required"}.
impl FieldSpec {
    fn from_config(value: &Value) -> Result<Vec<FieldSpec>, ExecutionError> {
        let Some(items) = value.as_array() else {
            return Err(ExecutionError::InvalidConfig {
                what: "`fields` must be an array of field specs".to_string(),
            });
        };
        items
            .iter()
            .map(|item| {
                Ok(FieldSpec {
                    name: item
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ExecutionError::InvalidConfig {
                            what: "field spec missing `name`".to_string(),
                        })?
                        .to_string(),
                    field_type: item
                        .get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    required: item
                        .get("required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                })
            })
            .collect()
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.field_type.as_deref() {
            Some("number") => {
                value.is_number()
                    || value
                        .as_str()
                        .is_some_and(|s| s.parse::<f64>().is_ok())
            }
            Some("boolean") => value.is_boolean(),
            // text and unspecified accept any scalar
            _ => !value.is_null(),
        }
    }
}

/// Pauses until a caller submits values matching the configured field
/// schema; the validated submission becomes the node's result.
pub struct FormExecutor;

#[async_trait]
impl NodeExecutor for FormExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        _ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if !input.is_resume() {
            return Ok(ExecutionOutcome::Paused(PauseKind::UserInput));
        }
        let specs = match input.config_value("fields") {
            Some(value) => FieldSpec::from_config(value)?,
            None => Vec::new(),
        };
        let Some(submission) = input.supplied.as_object() else {
            return Err(ExecutionError::Validation(
                "form submission must be a JSON object".to_string(),
            ));
        };
        for spec in &specs {
            match submission.get(&spec.name) {
                Some(value) if spec.accepts(value) => {}
                Some(_) => {
                    return Err(ExecutionError::Validation(format!(
                        "field `{}` has wrong type",
                        spec.name
                    )));
                }
                None if spec.required => {
                    return Err(ExecutionError::Validation(format!(
                        "required field `{}` missing",
                        spec.name
                    )));
                }
                None => {}
            }
        }
        Ok(ExecutionOutcome::Completed(input.supplied))
    }
}

fn decide(input: &ResolvedInput, extra: Value) -> Result<ExecutionOutcome, ExecutionError> {
    if !input.is_resume() {
        return Ok(ExecutionOutcome::Paused(PauseKind::Decision));
    }
    let decision = input
        .supplied
        .get("decision")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ExecutionError::Validation("decision payload must carry `decision`".to_string())
        })?;
    if decision != "approved" && decision != "rejected" {
        return Err(ExecutionError::Validation(format!(
            "decision must be `approved` or `rejected`, got `{decision}`"
        )));
    }
    let actor = input
        .supplied
        .get("actor")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let mut result = json!({
        "decision": decision,
        "actor": actor,
        "decided_at": Utc::now().to_rfc3339(),
    });
    if let (Some(out), Some(extra)) = (result.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            out.insert(key.clone(), value.clone());
        }
    }
    if let (Some(out), Some(comment)) = (
        result.as_object_mut(),
        input.supplied.get("comment").cloned(),
    ) {
        out.insert("comment".to_string(), comment);
    }
    Ok(ExecutionOutcome::Completed(result))
}

/// Pauses until an actor approves or rejects. A rejection is a normal
/// completion carrying `"decision": "rejected"`; branching on it is the
/// graph author's job via a condition node.
pub struct ApprovalExecutor;

#[async_trait]
impl NodeExecutor for ApprovalExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        _ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        decide(&input, json!({}))
    }
}

/// Approval tied to a CRM record; identical decision semantics, with the
/// record coordinates echoed into the result for downstream references.
pub struct CrmApprovalExecutor;

#[async_trait]
impl NodeExecutor for CrmApprovalExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        _ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let mut record = serde_json::Map::new();
        for key in ["object", "record_id"] {
            if let Some(value) = input.config_value(key) {
                record.insert(key.to_string(), value.clone());
            }
        }
        decide(&input, Value::Object(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamHub;
    use std::sync::Arc;

    fn ctx() -> ExecContext {
        let hub = Arc::new(StreamHub::new());
        ExecContext::new("r", "n", hub.emitter("r"))
    }

    fn form_config() -> Value {
        json!({"fields": [
            {"name": "email", "type": "text", "required": true},
            {"name": "age", "type": "number", "required": false},
        ]})
    }

    #[tokio::test]
    async fn form_pauses_first_then_accepts_valid_submission() {
        let first = FormExecutor
            .execute(ResolvedInput::new(form_config()), ctx())
            .await
            .unwrap();
        assert!(matches!(
            first,
            ExecutionOutcome::Paused(PauseKind::UserInput)
        ));

        let replay = ResolvedInput::new(form_config())
            .with_supplied(json!({"email": "a@b.c", "age": 20}));
        let outcome = FormExecutor.execute(replay, ctx()).await.unwrap();
        let ExecutionOutcome::Completed(result) = outcome else {
            panic!("valid submission must complete");
        };
        assert_eq!(result["email"], "a@b.c");
    }

    #[tokio::test]
    async fn form_rejects_missing_required_field() {
        let replay = ResolvedInput::new(form_config()).with_supplied(json!({"age": 20}));
        let err = FormExecutor.execute(replay, ctx()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)));
    }

    #[tokio::test]
    async fn form_rejects_type_mismatch() {
        let replay = ResolvedInput::new(form_config())
            .with_supplied(json!({"email": "a@b.c", "age": "not a number"}));
        let err = FormExecutor.execute(replay, ctx()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)));
    }

    #[tokio::test]
    async fn approval_rejection_is_normal_completion() {
        let replay = ResolvedInput::new(json!({}))
            .with_supplied(json!({"decision": "rejected", "actor": "ops@corp"}));
        let outcome = ApprovalExecutor.execute(replay, ctx()).await.unwrap();
        let ExecutionOutcome::Completed(result) = outcome else {
            panic!("decision must complete");
        };
        assert_eq!(result["decision"], "rejected");
        assert_eq!(result["actor"], "ops@corp");
    }

    #[tokio::test]
    async fn approval_rejects_unknown_verdict() {
        let replay = ResolvedInput::new(json!({})).with_supplied(json!({"decision": "maybe"}));
        let err = ApprovalExecutor.execute(replay, ctx()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)));
    }

    #[tokio::test]
    async fn crm_approval_echoes_record_coordinates() {
        let replay = ResolvedInput::new(json!({"object": "deal", "record_id": "d-42"}))
            .with_supplied(json!({"decision": "approved"}));
        let outcome = CrmApprovalExecutor.execute(replay, ctx()).await.unwrap();
        let ExecutionOutcome::Completed(result) = outcome else {
            panic!("decision must complete");
        };
        assert_eq!(result["object"], "deal");
        assert_eq!(result["record_id"], "d-42");
        assert_eq!(result["decision"], "approved");
    }
}
