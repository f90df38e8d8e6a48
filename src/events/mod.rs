use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event; a closed or full channel is logged and never fails the caller's write.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            counter!("toolroom_events.dropped", 1);
            warn!(event = name, error = %e, "Event could not be delivered");
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Domain events emitted after a write has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ToolRegistered(Uuid),
    ToolUpdated(Uuid),
    ToolRetired(Uuid),
    ToolWithdrawn {
        tool_id: Uuid,
        history_id: Uuid,
        responsible_id: Uuid,
        location: String,
    },
    ToolReturned {
        tool_id: Uuid,
        history_id: Uuid,
    },
    ProfileRegistered(Uuid),
    LedgerRepaired {
        tool_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ToolRegistered(_) => "tool_registered",
            Event::ToolUpdated(_) => "tool_updated",
            Event::ToolRetired(_) => "tool_retired",
            Event::ToolWithdrawn { .. } => "tool_withdrawn",
            Event::ToolReturned { .. } => "tool_returned",
            Event::ProfileRegistered(_) => "profile_registered",
            Event::LedgerRepaired { .. } => "ledger_repaired",
        }
    }
}

/// Drains the event channel, logging each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("toolroom_events.processed", 1, "event" => event.name());

        match &event {
            Event::ToolWithdrawn {
                tool_id,
                responsible_id,
                location,
                ..
            } => {
                info!(%tool_id, %responsible_id, %location, "Tool withdrawn");
            }
            Event::ToolReturned { tool_id, .. } => {
                info!(%tool_id, "Tool returned to storage");
            }
            Event::LedgerRepaired { tool_id } => {
                warn!(%tool_id, "Ledger repaired for tool");
            }
            other => {
                info!(event = other.name(), "Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop has ended");
}
