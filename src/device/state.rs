//! Shared device state: the authoritative model of the remote mechanism.
//!
//! Only the topic synchronizer and the recipe controller write to it. Every
//! other component gets a `watch::Receiver<DeviceState>` and reads snapshots.

use serde::{Deserialize, Serialize};

use crate::recipe::draft::RecipeDraft;

/// Upper bound of the servo travel in degrees.
pub const SERVO_MAX_ANGLE: f64 = 140.0;

pub const RECIPE_SLOTS: std::ops::RangeInclusive<u8> = 1..=3;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Manual,
    Recipe,
}

impl Mode {
    pub fn wire_value(self) -> &'static str {
        match self {
            Mode::Manual => "0",
            Mode::Recipe => "1",
        }
    }
}

/// One telemetry sample. Every field is optional on the wire.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct SensorSample {
    #[serde(default)]
    pub gas: Option<f64>,
    #[serde(default)]
    pub flame: Option<f64>,
    #[serde(default)]
    pub temp: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceState {
    pub servo_angle: f64,
    pub mode: Mode,
    pub active_recipe_slot: Option<u8>,
    /// While set, every outbound control intent is suppressed.
    pub emergency_lockout: bool,
    pub last_sensor_sample: Option<SensorSample>,
    pub last_ai_recipe: Option<RecipeDraft>,
}

pub fn is_valid_slot(slot: u8) -> bool {
    RECIPE_SLOTS.contains(&slot)
}

pub fn is_valid_angle(angle: f64) -> bool {
    angle.is_finite() && (0.0..=SERVO_MAX_ANGLE).contains(&angle)
}
