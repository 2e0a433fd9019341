//! File-backed profile and secret store.
//!
//! ```text
//! <config dir>/servo-console/
//! ├── profile.toml   - ConnectionProfile without its secret
//! └── secrets.toml   - key → value table, owner-only permissions on Unix
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ProfileStore, SecretStore, StoreError, MQTT_SECRET_KEY};
use crate::mqtt::config::ConnectionProfile;

pub const APP_DIR: &str = "servo-console";
const PROFILE_FILE: &str = "profile.toml";
const SECRETS_FILE: &str = "secrets.toml";
const SECRETS_STAGING_FILE: &str = "secrets.toml.tmp";

/// Platform config directory for the console, e.g. `~/.config/servo-console`.
pub fn default_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub struct FileStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles on the secrets table.
    secrets_lock: Mutex<()>,
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore {
            dir: dir.into(),
            secrets_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        if !tokio::fs::try_exists(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| io_error(&self.dir, e))?;
            info!("Created config directory {}", self.dir.display());
        }
        Ok(())
    }

    async fn read_optional(&self, path: &Path) -> Result<Option<String>, StoreError> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| io_error(path, e))?
        {
            debug!("{} does not exist", path.display());
            return Ok(None);
        }
        tokio::fs::read_to_string(path)
            .await
            .map(Some)
            .map_err(|e| io_error(path, e))
    }

    async fn read_secrets(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let path = self.dir.join(SECRETS_FILE);
        match self.read_optional(&path).await? {
            Some(content) => toml::from_str(&content).map_err(|e| StoreError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn write_secrets(&self, secrets: &BTreeMap<String, String>) -> Result<(), StoreError> {
        self.ensure_dir().await?;
        let path = self.dir.join(SECRETS_FILE);
        let content = toml::to_string_pretty(secrets).map_err(|e| StoreError::Serialize {
            what: "secrets",
            message: e.to_string(),
        })?;
        // Written owner-only from the first byte, then swapped in.
        let staged = self.dir.join(SECRETS_STAGING_FILE);
        match tokio::fs::remove_file(&staged).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(io_error(&staged, e)),
            _ => {}
        }
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&staged).await.map_err(|e| io_error(&staged, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_error(&staged, e))?;
        file.sync_all().await.map_err(|e| io_error(&staged, e))?;
        drop(file);

        tokio::fs::rename(&staged, &path)
            .await
            .map_err(|e| io_error(&path, e))?;
        debug!("Secrets written to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.secrets_lock.lock().await;
        Ok(self.read_secrets().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.secrets_lock.lock().await;
        let mut secrets = self.read_secrets().await?;
        secrets.insert(key.to_string(), value.to_string());
        self.write_secrets(&secrets).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.secrets_lock.lock().await;
        let mut secrets = self.read_secrets().await?;
        if secrets.remove(key).is_some() {
            self.write_secrets(&secrets).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FileStore {
    async fn load_profile(&self) -> Result<Option<ConnectionProfile>, StoreError> {
        let path = self.dir.join(PROFILE_FILE);
        let Some(content) = self.read_optional(&path).await? else {
            return Ok(None);
        };
        let mut profile: ConnectionProfile =
            toml::from_str(&content).map_err(|e| StoreError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        profile.secret = self.get(MQTT_SECRET_KEY).await?;
        Ok(Some(profile))
    }

    async fn save_profile(&self, profile: &ConnectionProfile) -> Result<(), StoreError> {
        self.ensure_dir().await?;
        let path = self.dir.join(PROFILE_FILE);
        let content = toml::to_string_pretty(profile).map_err(|e| StoreError::Serialize {
            what: "connection profile",
            message: e.to_string(),
        })?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_error(&path, e))?;

        match profile.secret.as_deref() {
            Some(secret) => self.set(MQTT_SECRET_KEY, secret).await?,
            None => self.remove(MQTT_SECRET_KEY).await?,
        }

        info!("Connection profile saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::config::TransportSecurity;
    use crate::persistence::AI_API_KEY;

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        std::env::temp_dir().join(format!("servo-console-{}-{}", name, nanos))
    }

    fn saved_profile() -> ConnectionProfile {
        ConnectionProfile {
            host: "10.0.0.7".into(),
            port: 8884,
            path: Some("/ws".into()),
            client_id: Some("bench".into()),
            keep_alive_secs: Some(30),
            username: Some("op".into()),
            secret: Some("hunter2".into()),
            clean_session: Some(false),
            transport: TransportSecurity::Tls,
            auto_connect: true,
        }
    }

    #[tokio::test]
    async fn profile_round_trip_reproduces_connect_parameters() {
        let dir = scratch_dir("roundtrip");
        let store = FileStore::new(&dir);
        let profile = saved_profile();
        store.save_profile(&profile).await.unwrap();

        let restored = FileStore::new(&dir).load_profile().await.unwrap().unwrap();
        assert_eq!(restored, profile);
        assert_eq!(restored.resolve().unwrap(), profile.resolve().unwrap());

        let on_disk = tokio::fs::read_to_string(dir.join(PROFILE_FILE)).await.unwrap();
        assert!(!on_disk.contains("hunter2"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_files_load_as_nothing() {
        let store = FileStore::new(scratch_dir("empty"));
        assert!(store.load_profile().await.unwrap().is_none());
        assert!(store.get(AI_API_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn secrets_are_kept_per_key() {
        let dir = scratch_dir("secrets");
        let store = FileStore::new(&dir);
        store.set(AI_API_KEY, "abc").await.unwrap();
        store.set(MQTT_SECRET_KEY, "pw").await.unwrap();
        store.remove(MQTT_SECRET_KEY).await.unwrap();
        store.remove(MQTT_SECRET_KEY).await.unwrap();

        assert_eq!(store.get(AI_API_KEY).await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.get(MQTT_SECRET_KEY).await.unwrap(), None);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = tokio::fs::metadata(dir.join(SECRETS_FILE)).await.unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        }

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn readable_secrets_file_is_replaced_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = scratch_dir("perms");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(SECRETS_FILE);
        tokio::fs::write(&path, "\"ai.api_key\" = \"old\"\n").await.unwrap();
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .await
            .unwrap();

        let store = FileStore::new(&dir);
        store.set(AI_API_KEY, "new").await.unwrap();

        let meta = tokio::fs::metadata(&path).await.unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert!(!tokio::fs::try_exists(dir.join(SECRETS_STAGING_FILE)).await.unwrap());
        assert_eq!(store.get(AI_API_KEY).await.unwrap().as_deref(), Some("new"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_profile_is_an_error() {
        let dir = scratch_dir("corrupt");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(PROFILE_FILE), "port = [").await.unwrap();
        let result = FileStore::new(&dir).load_profile().await;
        assert!(matches!(result, Err(StoreError::Parse { .. })));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
