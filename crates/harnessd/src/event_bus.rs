//! In-process fan-out of harness events to live subscribers.

use harness_core::events::{EventKind, HarnessEvent};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::event_log::JsonlEventLog;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HarnessEvent>,
    log: Option<JsonlEventLog>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, log: None }
    }

    /// Also appends every published event to `log`.
    pub fn with_log(mut self, log: JsonlEventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Publishes to current subscribers. Having none is not an error.
    pub fn publish(&self, kind: EventKind) -> HarnessEvent {
        let event = HarnessEvent::new(kind);
        debug!(event = event.kind.name(), "harness event");
        if let Some(log) = &self.log {
            if let Err(err) = log.append(&event) {
                warn!(error = %err, "failed to append event log");
            }
        }
        let _ = self.sender.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HarnessEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use harness_core::events::EventKind;
    use harness_core::state::RunStatus;
    use harness_core::types::RunId;
    use tempfile::TempDir;

    use super::EventBus;
    use crate::event_log::JsonlEventLog;

    #[tokio::test]
    async fn subscribers_receive_events_published_after_subscribing() {
        let bus = EventBus::new();
        bus.publish(EventKind::RunStarted {
            run_id: RunId::new("early"),
        });

        let mut rx = bus.subscribe();
        bus.publish(EventKind::RunFinished {
            run_id: RunId::new("late"),
            status: RunStatus::Completed,
        });
        let event = rx.recv().await.expect("event");
        assert_eq!(event.kind.name(), "run_finished");
        assert_eq!(event.kind.run_id(), Some(&RunId::new("late")));
    }

    #[test]
    fn publishing_appends_to_the_log() {
        let dir = TempDir::new().expect("tempdir");
        let log = JsonlEventLog::new(dir.path());
        let bus = EventBus::new().with_log(log.clone());
        bus.publish(EventKind::RunStarted {
            run_id: RunId::new("logged"),
        });
        assert_eq!(log.read_run(&RunId::new("logged")).expect("read").len(), 1);
    }
}
