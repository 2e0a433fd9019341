//! # Persistence Module
//!
//! ## Why This Module Exists
//! The console restores two things at startup: the connection profile the
//! operator last saved, and the credentials that go with it (broker secret,
//! AI-service key). Both are overwritten only on an explicit save.
//!
//! ## Key Abstractions
//! - [`ProfileStore`]: load/save of the whole [`ConnectionProfile`].
//! - [`SecretStore`]: a deliberately narrow get/set/remove by key, so a keychain
//!   or secret-manager backend can replace the file backend without touching
//!   the protocol code.
//!
//! The profile never carries its secret on disk: stores split it off into
//! the secret store on save and merge it back on load.
//!
//! ## Error Handling Strategy
//! Missing files mean "nothing stored" and load as `None`. A file that exists
//! but cannot be parsed is an error; silently replacing a corrupt profile
//! with defaults would hide it from the operator.

pub mod file_store;
pub mod memory_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::mqtt::config::ConnectionProfile;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;

/// Secret key for the broker password.
pub const MQTT_SECRET_KEY: &str = "mqtt.secret";
/// Secret key for the recipe generator credential.
pub const AI_API_KEY: &str = "ai.api_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("could not parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("could not serialize {what}: {message}")]
    Serialize { what: &'static str, message: String },
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Returns the saved profile with its secret merged back, if any.
    async fn load_profile(&self) -> Result<Option<ConnectionProfile>, StoreError>;

    async fn save_profile(&self, profile: &ConnectionProfile) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
