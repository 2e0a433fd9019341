use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{ProfileStore, SecretStore, StoreError, MQTT_SECRET_KEY};
use crate::mqtt::config::ConnectionProfile;

/// In-process store for tests and throwaway sessions. Keeps the same
/// profile/secret split as [`super::FileStore`].
#[derive(Default)]
pub struct MemoryStore {
    profile: Mutex<Option<ConnectionProfile>>,
    secrets: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(secrets.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        secrets.remove(key);
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn load_profile(&self) -> Result<Option<ConnectionProfile>, StoreError> {
        let stored = self
            .profile
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(mut profile) = stored else {
            return Ok(None);
        };
        profile.secret = self.get(MQTT_SECRET_KEY).await?;
        Ok(Some(profile))
    }

    async fn save_profile(&self, profile: &ConnectionProfile) -> Result<(), StoreError> {
        let mut stripped = profile.clone();
        match stripped.secret.take() {
            Some(secret) => self.set(MQTT_SECRET_KEY, &secret).await?,
            None => self.remove(MQTT_SECRET_KEY).await?,
        }
        *self.profile.lock().unwrap_or_else(|e| e.into_inner()) = Some(stripped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn secret_is_split_and_merged() {
        let store = MemoryStore::new();
        let profile = ConnectionProfile {
            username: Some("op".into()),
            secret: Some("pw".into()),
            ..Default::default()
        };
        store.save_profile(&profile).await.unwrap();
        assert_eq!(store.get(MQTT_SECRET_KEY).await.unwrap().as_deref(), Some("pw"));
        assert_eq!(store.load_profile().await.unwrap(), Some(profile));
    }
}
