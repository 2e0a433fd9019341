//! Typed state-change notifications for presentation code.

use chrono::{DateTime, Local};
use tokio::sync::broadcast;
use tracing::debug;

use super::state::{Mode, SensorSample};
use crate::recipe::draft::RecipeDraft;

pub const EMERGENCY_ALERT_TEXT: &str = "ALERT: Emergency detected";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertSource {
    /// Free text sent by the device.
    Device,
    /// Raised by the console when the emergency flag goes up.
    Emergency,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Alert {
    pub raised_at: DateTime<Local>,
    pub source: AlertSource,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleEvent {
    TelemetryUpdated(SensorSample),
    AlertRaised(Alert),
    LockoutChanged(bool),
    AngleUpdated(f64),
    ModeUpdated(Mode),
    RecipeSlotUpdated(u8),
    AiDraftReady(RecipeDraft),
    AiDraftFailed(String),
}

/// Broadcast fan-out of [`ConsoleEvent`]s. Emitting with no subscribers is fine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConsoleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ConsoleEvent) {
        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    pub fn alert(&self, source: AlertSource, text: impl Into<String>) {
        self.emit(ConsoleEvent::AlertRaised(Alert {
            raised_at: Local::now(),
            source,
            text: text.into(),
        }));
    }
}

/// Drains everything currently queued on a receiver. Test helper.
#[cfg(test)]
pub fn drain(rx: &mut broadcast::Receiver<ConsoleEvent>) -> Vec<ConsoleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
