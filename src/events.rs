//! Event surface between the core and presentation collaborators.
//!
//! The core never talks to a UI directly; it publishes `CoreEvent`s on a
//! broadcast channel that any number of collaborators may subscribe to.
//! A slow subscriber lags (dropping its oldest events) instead of blocking
//! the ingestion worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::core::capture::CaptureStatus;
use crate::core::parser::PacketRecord;

/// Alert category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    /// Per-source rate threshold exceeded
    Dos,
    /// Aggregate rate threshold exceeded
    Ddos,
    /// Informational (capture lifecycle, mitigation output)
    Info,
}

/// An alert raised by the detector or a mitigation operation.
///
/// Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert ID
    pub id: Uuid,
    /// Alert category
    pub kind: AlertKind,
    /// Human-readable message
    pub message: String,
    /// Offending source IP, when the alert concerns one
    pub source_ip: Option<String>,
    /// Alert creation timestamp
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn dos(ip: &str, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AlertKind::Dos,
            message,
            source_ip: Some(ip.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn ddos(message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AlertKind::Ddos,
            message,
            source_ip: None,
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AlertKind::Info,
            message: message.into(),
            source_ip: None,
            timestamp: Utc::now(),
        }
    }
}

/// Events published by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreEvent {
    /// A decoded packet line was appended
    PacketRow(PacketRecord),
    /// An alert was raised
    AlertRaised(Alert),
    /// The capture session changed status
    StatusChanged(CaptureStatus),
}

/// Broadcast publisher for core events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    pub fn packet(&self, record: PacketRecord) {
        self.emit(CoreEvent::PacketRow(record));
    }

    pub fn alert(&self, alert: Alert) {
        self.emit(CoreEvent::AlertRaised(alert));
    }

    pub fn status(&self, status: CaptureStatus) {
        self.emit(CoreEvent::StatusChanged(status));
    }

    fn emit(&self, event: CoreEvent) {
        // A send error only means nobody is subscribed right now.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.alert(Alert::info("hello"));
        match rx.recv().await.unwrap() {
            CoreEvent::AlertRaised(alert) => {
                assert_eq!(alert.kind, AlertKind::Info);
                assert_eq!(alert.message, "hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new(16);
        bus.alert(Alert::info("nobody listening"));
    }
}
