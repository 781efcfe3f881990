//! Per-run streaming session gateway.
//!
//! Each run can have at most one attached listener. Node executors and the
//! engine emit [`StreamEvent`]s through a [`StreamEmitter`]; the listener
//! consumes them via [`RunStream`]. The gateway's lifetime is independent of
//! the persisted run state: losing the listener never loses run correctness,
//! chunks emitted after a disconnect are simply dropped.

use std::sync::Mutex;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Wire-level event relayed to a listening caller.
///
/// Serializes to the `{"type": ...}` shapes the streaming endpoints emit:
/// `{"type":"start"}`, `{"type":"chunk","content":...}`, `{"type":"end"}`,
/// `{"type":"error","error":...}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// The run attempt has begun; always the first event on a stream.
    Start,
    /// A partial output fragment, typically from an agent/prompt node.
    Chunk { content: String },
    /// Terminal: the run attempt finished successfully.
    End,
    /// Terminal: the run attempt failed; carries a human-readable message.
    Error { error: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End | StreamEvent::Error { .. })
    }
}

/// Registry of live per-run channels.
///
/// Attaching a listener for a run replaces any previous one: the gateway
/// relays ordered chunks to exactly one consumer.
pub struct StreamHub {
    senders: Mutex<FxHashMap<String, flume::Sender<StreamEvent>>>,
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHub {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(FxHashMap::default()),
        }
    }

    /// Open (or replace) the listening channel for a run.
    pub fn attach(&self, run_id: &str) -> RunStream {
        let (tx, rx) = flume::unbounded();
        self.senders
            .lock()
            .expect("stream hub poisoned")
            .insert(run_id.to_string(), tx);
        RunStream { receiver: rx }
    }

    /// Handle for producers to emit events for a run.
    pub fn emitter(self: &Arc<Self>, run_id: &str) -> StreamEmitter {
        StreamEmitter {
            hub: Arc::clone(self),
            run_id: run_id.to_string(),
        }
    }

    /// Drop the channel for a run, ending any attached listener's stream.
    pub fn detach(&self, run_id: &str) {
        self.senders
            .lock()
            .expect("stream hub poisoned")
            .remove(run_id);
    }

    fn send(&self, run_id: &str, event: StreamEvent) {
        let terminal = event.is_terminal();
        let sender = {
            let guard = self.senders.lock().expect("stream hub poisoned");
            guard.get(run_id).cloned()
        };
        if let Some(tx) = sender {
            // A dropped listener is not an error: generation continues
            // server-side and further chunks are discarded.
            let _ = tx.send(event);
        }
        if terminal {
            self.detach(run_id);
        }
    }
}

/// Cloneable producer handle scoped to one run.
#[derive(Clone)]
pub struct StreamEmitter {
    hub: Arc<StreamHub>,
    run_id: String,
}

impl StreamEmitter {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event: StreamEvent) {
        self.hub.send(&self.run_id, event);
    }

    pub fn chunk(&self, content: impl Into<String>) {
        self.emit(StreamEvent::Chunk {
            content: content.into(),
        });
    }
}

/// Consumer side of a run's event channel.
///
/// The stream ends when a terminal event has been delivered and the hub has
/// dropped the sender, or when the hub detaches the run.
pub struct RunStream {
    receiver: flume::Receiver<StreamEvent>,
}

impl RunStream {
    pub async fn recv(&self) -> Option<StreamEvent> {
        self.receiver.recv_async().await.ok()
    }

    /// Drain every event currently delivered, without waiting.
    pub fn drain(&self) -> Vec<StreamEvent> {
        self.receiver.try_iter().collect()
    }

    /// Adapt into an async stream suitable for SSE responses.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = StreamEvent> {
        async_stream::stream! {
            while let Ok(event) = self.receiver.recv_async().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
        }
    }
}
