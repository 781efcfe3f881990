//! Condition executor: a single comparison selecting a branch.
//!
//! The result records `"branch": "true"` or `"branch": "false"`; the engine
//! prunes outgoing edges whose label disagrees. Comparison is numeric when
//! both operands parse as numbers, lexicographic otherwise; `contains` is
//! always a substring test.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::node::{ExecContext, ExecutionError, ExecutionOutcome, NodeExecutor, ResolvedInput};
use crate::vars::stringify;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl Operator {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" | "==" | "=" => Operator::Eq,
            "ne" | "!=" => Operator::Ne,
            "gt" | ">" => Operator::Gt,
            "gte" | ">=" => Operator::Gte,
            "lt" | "<" => Operator::Lt,
            "lte" | "<=" => Operator::Lte,
            "contains" => Operator::Contains,
            _ => return None,
        })
    }

    fn apply(&self, left: &Value, right: &Value) -> bool {
        if let Operator::Contains = self {
            return stringify(left).contains(&stringify(right));
        }
        match (as_number(left), as_number(right)) {
            (Some(l), Some(r)) => self.compare(l.partial_cmp(&r)),
            _ => self.compare(Some(stringify(left).cmp(&stringify(right)))),
        }
    }

    fn compare(&self, ordering: Option<std::cmp::Ordering>) -> bool {
        use std::cmp::Ordering::*;
        match (self, ordering) {
            (Operator::Eq, Some(Equal)) => true,
            (Operator::Ne, Some(Less | Greater)) => true,
            (Operator::Gt, Some(Greater)) => true,
            (Operator::Gte, Some(Greater | Equal)) => true,
            (Operator::Lt, Some(Less)) => true,
            (Operator::Lte, Some(Less | Equal)) => true,
            _ => false,
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Evaluates `left <operator> right` over the resolved configuration.
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        _ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let left = input
            .config_value("left")
            .cloned()
            .ok_or_else(|| ExecutionError::InvalidConfig {
                what: "condition missing `left` operand".to_string(),
            })?;
        let right = input
            .config_value("right")
            .cloned()
            .ok_or_else(|| ExecutionError::InvalidConfig {
                what: "condition missing `right` operand".to_string(),
            })?;
        let op_str = input.config_str("operator")?;
        let operator = Operator::parse(op_str).ok_or_else(|| ExecutionError::InvalidConfig {
            what: format!("unknown operator `{op_str}`"),
        })?;

        let verdict = operator.apply(&left, &right);
        Ok(ExecutionOutcome::Completed(json!({
            "branch": if verdict { "true" } else { "false" },
            "left": left,
            "operator": op_str,
            "right": right,
        })))
    }
}
