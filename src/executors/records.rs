//! Record update and notification executors, plus the collaborator traits
//! they write through.
//!
//! Both kinds delegate the actual side effect to a trait object so the
//! engine stays independent of any particular CRM or messaging backend.
//! Neither retries: a record write or a notification dispatch is not safely
//! repeatable without cooperation from the backend.

use std::sync::Mutex;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::info;

use crate::node::{ExecContext, ExecutionError, ExecutionOutcome, NodeExecutor, ResolvedInput};

/// Backend that persists record mutations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn update_record(
        &self,
        object: &str,
        record_id: &str,
        fields: &Value,
    ) -> Result<(), ExecutionError>;
}

/// Backend that delivers notifications.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        channel: &str,
        recipient: &str,
        message: &str,
    ) -> Result<(), ExecutionError>;
}

/// Record store over a process-local map; the default for tests and demos.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<FxHashMap<(String, String), Value>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, object: &str, record_id: &str) -> Option<Value> {
        self.records
            .lock()
            .expect("record store poisoned")
            .get(&(object.to_string(), record_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn update_record(
        &self,
        object: &str,
        record_id: &str,
        fields: &Value,
    ) -> Result<(), ExecutionError> {
        let Some(incoming) = fields.as_object() else {
            return Err(ExecutionError::ExternalWrite {
                detail: "update fields must be a JSON object".to_string(),
            });
        };
        let mut records = self.records.lock().expect("record store poisoned");
        let entry = records
            .entry((object.to_string(), record_id.to_string()))
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(existing) = entry.as_object_mut() {
            for (key, value) in incoming {
                existing.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}

/// Notifier that only logs; the default when no real channel is wired.
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn dispatch(
        &self,
        channel: &str,
        recipient: &str,
        message: &str,
    ) -> Result<(), ExecutionError> {
        info!(channel, recipient, message, "notification dispatched");
        Ok(())
    }
}

/// Mutates one record in the configured external store. Failures are
/// surfaced as-is; no automatic retry.
pub struct UpdateExecutor {
    store: std::sync::Arc<dyn RecordStore>,
}

impl UpdateExecutor {
    pub fn new(store: std::sync::Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NodeExecutor for UpdateExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        _ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let object = input.config_str("object")?;
        let record_id = input.config_str("record_id")?;
        let fields = input
            .config_value("fields")
            .cloned()
            .unwrap_or_else(|| json!({}));
        self.store.update_record(object, record_id, &fields).await?;
        Ok(ExecutionOutcome::Completed(json!({
            "object": object,
            "record_id": record_id,
            "updated": fields,
        })))
    }
}

/// Delivers one message through the notification collaborator.
pub struct NotificationExecutor {
    dispatcher: std::sync::Arc<dyn NotificationDispatcher>,
}

impl NotificationExecutor {
    pub fn new(dispatcher: std::sync::Arc<dyn NotificationDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl NodeExecutor for NotificationExecutor {
    async fn execute(
        &self,
        input: ResolvedInput,
        _ctx: ExecContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let channel = input
            .config_value("channel")
            .and_then(Value::as_str)
            .unwrap_or("log");
        let recipient = input.config_str("recipient")?;
        let message = input.config_str("message")?;
        self.dispatcher.dispatch(channel, recipient, message).await?;
        Ok(ExecutionOutcome::Completed(json!({
            "delivered": true,
            "channel": channel,
            "recipient": recipient,
            "message": message,
        })))
    }
}
