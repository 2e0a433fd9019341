//! AI-assisted recipe generation over the bus.

pub mod controller;
pub mod draft;
pub mod prompt;
pub mod wire;
