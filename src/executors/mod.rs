//! Node executors and the registry that dispatches them.
//!
//! One executor per [`NodeKind`], registered once at startup. External side
//! effects (record writes, notifications, model calls) go through the
//! [`Collaborators`] trait objects so the engine can run fully in-process
//! for tests and demos, or against real backends in deployment.

mod basic;
mod condition;
mod delay;
mod external;
mod interactive;
mod model;
mod records;

pub use basic::{EndExecutor, TriggerExecutor};
pub use condition::ConditionExecutor;
pub use delay::DelayExecutor;
pub use external::{ApiExecutor, WebhookExecutor};
pub use interactive::{ApprovalExecutor, CrmApprovalExecutor, FormExecutor};
pub use model::{AgentExecutor, EchoModel, ModelClient, PromptExecutor};
pub use records::{
    InMemoryRecordStore, LogNotifier, NotificationDispatcher, NotificationExecutor, RecordStore,
    UpdateExecutor,
};

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::EngineConfig;
use crate::node::{NodeExecutor, NodeKind};

/// External backends the side-effecting executors write through.
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub model: Arc<dyn ModelClient>,
}

impl Collaborators {
    /// Process-local backends: map-backed records, log-only notifications,
    /// an echoing model. Enough to run any graph end to end.
    pub fn in_memory() -> Self {
        Self {
            records: Arc::new(InMemoryRecordStore::new()),
            notifier: Arc::new(LogNotifier),
            model: Arc::new(EchoModel),
        }
    }
}

/// Maps each node kind to its executor.
pub struct ExecutorRegistry {
    executors: FxHashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// The full standard set, one executor per kind.
    pub fn standard(collaborators: Collaborators, config: &EngineConfig) -> Self {
        let mut registry = Self {
            executors: FxHashMap::default(),
        };
        registry.register(NodeKind::Trigger, Arc::new(TriggerExecutor));
        registry.register(NodeKind::Form, Arc::new(FormExecutor));
        registry.register(NodeKind::Approval, Arc::new(ApprovalExecutor));
        registry.register(NodeKind::CrmApproval, Arc::new(CrmApprovalExecutor));
        registry.register(NodeKind::Condition, Arc::new(ConditionExecutor));
        registry.register(
            NodeKind::Update,
            Arc::new(UpdateExecutor::new(Arc::clone(&collaborators.records))),
        );
        registry.register(
            NodeKind::Notification,
            Arc::new(NotificationExecutor::new(Arc::clone(
                &collaborators.notifier,
            ))),
        );
        registry.register(NodeKind::Delay, Arc::new(DelayExecutor::new(config.max_delay)));
        registry.register(NodeKind::Webhook, Arc::new(WebhookExecutor::new(config)));
        registry.register(NodeKind::Api, Arc::new(ApiExecutor::new(config)));
        registry.register(
            NodeKind::Agent,
            Arc::new(AgentExecutor::new(Arc::clone(&collaborators.model))),
        );
        registry.register(
            NodeKind::Prompt,
            Arc::new(PromptExecutor::new(Arc::clone(&collaborators.model))),
        );
        registry.register(NodeKind::End, Arc::new(EndExecutor));
        registry
    }

    /// Replace or add the executor for a kind.
    pub fn register(&mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(kind, executor);
    }

    pub fn supports(&self, kind: NodeKind) -> bool {
        self.executors.contains_key(&kind)
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }
}
