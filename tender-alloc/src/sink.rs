//! Event sinks that fan allocation events out to listeners.

use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tender_core::{AgentId, AgentMessage, AllocationEvent, EventSink};
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Broadcasts every event on a tokio channel.
///
/// Sending never blocks. With no subscribers the event is dropped; a
/// subscriber whose buffer is full misses events (lagged).
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<AllocationEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AllocationEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: &AllocationEvent) {
        let event_type = event.event_name();
        match self.tx.send(event.clone()) {
            Ok(receivers) => {
                debug!(event_type, receivers, "Broadcast allocation event");
            }
            Err(_) => {
                debug!(event_type, "No receivers for allocation event");
            }
        }
    }
}

/// Renders events as protocol messages and broadcasts those.
#[derive(Debug, Clone)]
pub struct MessageBroadcastSink {
    orchestrator_id: AgentId,
    tx: broadcast::Sender<AgentMessage>,
}

impl MessageBroadcastSink {
    pub fn new(orchestrator_id: AgentId, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            orchestrator_id,
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentMessage> {
        self.tx.subscribe()
    }
}

impl EventSink for MessageBroadcastSink {
    fn emit(&self, event: &AllocationEvent) {
        let Some(message) = event.to_message(self.orchestrator_id, Utc::now()) else {
            return;
        };
        let message_type = message.message_type.as_db_str();
        if self.tx.send(message).is_err() {
            debug!(message_type, "No receivers for agent message");
        }
    }
}

/// Delivers each event to every listener in turn.
///
/// A listener that panics is logged and skipped; the remaining listeners
/// still receive the event.
#[derive(Default, Clone)]
pub struct FanoutSink {
    listeners: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventSink>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &AllocationEvent) {
        for (index, listener) in self.listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener.emit(event))).is_err() {
                error!(
                    listener = index,
                    event_type = event.event_name(),
                    "Allocation listener panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
