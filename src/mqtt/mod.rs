//! # Bus Session Module
//!
//! Everything between the console and the MQTT broker: the operator's
//! connection profile, the transport abstraction, the `rumqttc` adapter and
//! the session state machine that owns reconnect behaviour.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - ConnectionProfile, defaults and validation
//! ├── message_manager.rs  - Inbound message representation
//! ├── transport.rs        - BusTransport trait and transport events
//! ├── mqtt_handler.rs     - rumqttc-backed transport
//! └── session.rs          - Connection state machine and reconnect slot
//! ```
//!
//! ## Design Philosophy
//!
//! - **Owned session**: the session is a plain value held by the console, so
//!   tests can run several side by side against an in-memory transport.
//! - **Stable handler table**: the transport is wired to one event channel at
//!   construction. Connection attempts never re-register callbacks.
//! - **No buffering**: publishing while not connected fails immediately and
//!   the message is gone.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod session;
pub mod transport;
