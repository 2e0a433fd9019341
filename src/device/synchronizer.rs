//! Topic synchronizer: decodes inbound traffic into [`DeviceState`].
//!
//! Dashboard topics are best effort. A payload that does not decode is
//! dropped without an event, and the next message supersedes it. The only
//! topic not applied here is the recipe draft response, which is handed back
//! to the caller for the recipe controller because it gates actuation.

use tracing::{debug, warn};

use super::events::{AlertSource, ConsoleEvent, EventBus, EMERGENCY_ALERT_TEXT};
use super::state::{is_valid_angle, is_valid_slot, DeviceState, Mode, SensorSample};
use super::topics::TopicMap;
use crate::mqtt::message_manager::BusMessage;

/// Outcome of routing one message.
#[derive(Debug, PartialEq)]
pub enum Routed {
    /// State changed and events were emitted.
    Applied,
    /// Nothing to do: unknown topic, malformed or redundant payload.
    Ignored,
    /// Payload destined for the recipe controller.
    DraftResponse(String),
}

impl Routed {
    pub fn changed(&self) -> bool {
        matches!(self, Routed::Applied)
    }
}

pub struct TopicSynchronizer {
    topics: TopicMap,
}

/// Numeric decode shared by every numeric topic. Non-finite values count
/// as undecodable.
fn parse_number(payload: &str) -> Option<f64> {
    payload
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

impl TopicSynchronizer {
    pub fn new(topics: TopicMap) -> Self {
        TopicSynchronizer { topics }
    }

    pub fn topics(&self) -> &TopicMap {
        &self.topics
    }

    pub fn apply(&self, msg: &BusMessage, state: &mut DeviceState, events: &EventBus) -> Routed {
        let topic = msg.topic.as_str();
        let payload = msg.payload.as_str();
        let t = &self.topics;

        if topic == t.telemetry {
            self.apply_telemetry(payload, state, events)
        } else if topic == t.alert_text {
            events.alert(AlertSource::Device, payload);
            Routed::Applied
        } else if topic == t.emergency {
            self.apply_emergency(payload, state, events)
        } else if topic == t.angle {
            self.apply_angle(payload, state, events)
        } else if topic == t.mode {
            let mode = if parse_number(payload) == Some(1.0) {
                Mode::Recipe
            } else {
                Mode::Manual
            };
            state.mode = mode;
            events.emit(ConsoleEvent::ModeUpdated(mode));
            Routed::Applied
        } else if topic == t.recipe {
            self.apply_recipe_slot(payload, state, events)
        } else if topic == t.draft_response {
            Routed::DraftResponse(payload.to_string())
        } else {
            debug!("No route for topic {}", topic);
            Routed::Ignored
        }
    }

    fn apply_telemetry(&self, payload: &str, state: &mut DeviceState, events: &EventBus) -> Routed {
        let decoded = serde_json::from_str::<serde_json::Value>(payload)
            .map_err(|e| e.to_string())
            .and_then(|value| {
                if value.is_object() {
                    serde_json::from_value::<SensorSample>(value).map_err(|e| e.to_string())
                } else {
                    Err("telemetry is not a JSON object".to_string())
                }
            });
        match decoded {
            Ok(sample) => {
                state.last_sensor_sample = Some(sample);
                events.emit(ConsoleEvent::TelemetryUpdated(sample));
                Routed::Applied
            }
            Err(e) => {
                debug!("Dropping malformed telemetry: {}", e);
                Routed::Ignored
            }
        }
    }

    fn apply_emergency(&self, payload: &str, state: &mut DeviceState, events: &EventBus) -> Routed {
        let lockout = match payload {
            "1" => true,
            "0" => false,
            other => {
                debug!("Ignoring emergency payload {:?}", other);
                return Routed::Ignored;
            }
        };

        if lockout {
            warn!("Emergency flag raised, outbound control locked");
            events.alert(AlertSource::Emergency, EMERGENCY_ALERT_TEXT);
        }
        if state.emergency_lockout != lockout {
            state.emergency_lockout = lockout;
            events.emit(ConsoleEvent::LockoutChanged(lockout));
        }
        Routed::Applied
    }

    fn apply_angle(&self, payload: &str, state: &mut DeviceState, events: &EventBus) -> Routed {
        match parse_number(payload).filter(|a| is_valid_angle(*a)) {
            Some(angle) => {
                state.servo_angle = angle;
                events.emit(ConsoleEvent::AngleUpdated(angle));
                Routed::Applied
            }
            None => {
                debug!("Dropping angle mirror payload {:?}", payload);
                Routed::Ignored
            }
        }
    }

    fn apply_recipe_slot(&self, payload: &str, state: &mut DeviceState, events: &EventBus) -> Routed {
        let slot = parse_number(payload)
            .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n <= u8::MAX as f64)
            .map(|n| n as u8)
            .filter(|n| is_valid_slot(*n));

        match slot {
            Some(slot) => {
                state.active_recipe_slot = Some(slot);
                events.emit(ConsoleEvent::RecipeSlotUpdated(slot));
                Routed::Applied
            }
            None => {
                debug!("Dropping recipe selection payload {:?}", payload);
                Routed::Ignored
            }
        }
    }
}
