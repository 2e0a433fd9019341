//! Operator console for a networked servo device.
//!
//! The console keeps one MQTT session to the device's broker, mirrors the
//! device's reported state, gates every control output behind the device's
//! emergency flag and brokers AI-generated servo recipes.
//!
//! ```text
//! src/
//! ├── mqtt/         - profile, transport, rumqttc adapter, session
//! ├── device/       - device state, topic layout, inbound decoding, events
//! ├── recipe/       - draft requests, validation and apply
//! ├── persistence/  - profile and secret stores
//! ├── console.rs    - the synchronous core
//! ├── runtime.rs    - async loop and ConsoleHandle
//! ├── operator.rs   - terminal line commands
//! ├── config.rs     - console.toml
//! └── error.rs      - IntentError
//! ```

pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod mqtt;
pub mod operator;
pub mod persistence;
pub mod recipe;
pub mod runtime;
