//! Connection profile and the resolved options a session is opened with.
//!
//! A [`ConnectionProfile`] is what the operator edits and what gets persisted.
//! It is never mutated by the core. At connect time it is resolved into
//! [`SessionOptions`], which applies defaults and enforces the profile
//! invariants so that an invalid profile is rejected before any session exists.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u32 = 9001;
pub const DEFAULT_PATH: &str = "/mqtt";
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

/// Wire security of the bus connection. Selected explicitly, never inferred
/// from host or port.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportSecurity {
    #[default]
    Plain,
    Tls,
}

/// Operator-editable connection settings.
///
/// Optional fields fall back to defaults during [`ConnectionProfile::resolve`].
/// `secret` is skipped by serde: it is persisted through the secret store,
/// never inside the profile file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u32,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub keep_alive_secs: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(skip)]
    pub secret: Option<String>,
    #[serde(default)]
    pub clean_session: Option<bool>,
    #[serde(default)]
    pub transport: TransportSecurity,
    #[serde(default)]
    pub auto_connect: bool,
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            path: None,
            client_id: None,
            keep_alive_secs: None,
            username: None,
            secret: None,
            clean_session: None,
            transport: TransportSecurity::Plain,
            auto_connect: false,
        }
    }
}

/// Reasons a profile is refused before a session is attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("port {0} is outside 1..=65535")]
    PortOutOfRange(u32),

    #[error("path must not be empty")]
    EmptyPath,

    #[error("keep-alive must be greater than zero")]
    ZeroKeepAlive,
}

/// Fully resolved parameters for one bus session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub credentials: Option<(String, String)>,
    pub clean_session: bool,
    pub transport: TransportSecurity,
}

impl SessionOptions {
    /// Broker URL for the WebSocket transports.
    pub fn url(&self) -> String {
        let scheme = match self.transport {
            TransportSecurity::Plain => "ws",
            TransportSecurity::Tls => "wss",
        };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

impl ConnectionProfile {
    /// Validates the profile and fills in defaults.
    ///
    /// Defaults: keep-alive 60 s, clean session on, path `/mqtt`, and a
    /// clock-derived client id. An explicitly empty path is an error, an
    /// absent one is not.
    pub fn resolve(&self) -> Result<SessionOptions, ProfileError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ProfileError::EmptyHost);
        }

        let port = u16::try_from(self.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ProfileError::PortOutOfRange(self.port))?;

        let path = match self.path.as_deref() {
            None => DEFAULT_PATH.to_string(),
            Some(p) if p.trim().is_empty() => return Err(ProfileError::EmptyPath),
            Some(p) if p.starts_with('/') => p.to_string(),
            Some(p) => format!("/{}", p),
        };

        let keep_alive_secs = self.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS);
        if keep_alive_secs == 0 {
            return Err(ProfileError::ZeroKeepAlive);
        }

        let client_id = self
            .client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_client_id);

        // An empty password is still a credential; an absent username is not.
        let credentials = self
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .map(|u| (u, self.secret.clone().unwrap_or_default()));

        Ok(SessionOptions {
            host: host.to_string(),
            port,
            path,
            client_id,
            keep_alive: Duration::from_secs(keep_alive_secs),
            credentials,
            clean_session: self.clean_session.unwrap_or(true),
            transport: self.transport,
        })
    }
}

fn generate_client_id() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("console_{:x}", nanos as u64 & 0xffff_ffff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ConnectionProfile {
        ConnectionProfile {
            host: "broker.local".into(),
            port: 9001,
            ..Default::default()
        }
    }

    #[test]
    fn resolve_applies_defaults() {
        let options = profile().resolve().unwrap();
        assert_eq!(options.path, "/mqtt");
        assert_eq!(options.keep_alive, Duration::from_secs(60));
        assert!(options.clean_session);
        assert!(options.client_id.starts_with("console_"));
        assert_eq!(options.credentials, None);
        assert_eq!(options.url(), "ws://broker.local:9001/mqtt");
    }

    #[test]
    fn port_outside_range_is_rejected() {
        for port in [0, 65536, 70000] {
            let p = ConnectionProfile { port, ..profile() };
            assert_eq!(p.resolve(), Err(ProfileError::PortOutOfRange(port)));
        }
        let edge = ConnectionProfile { port: 65535, ..profile() };
        assert_eq!(edge.resolve().unwrap().port, 65535);
    }

    #[test]
    fn empty_path_and_zero_keep_alive_are_rejected() {
        let p = ConnectionProfile {
            path: Some("  ".into()),
            ..profile()
        };
        assert_eq!(p.resolve(), Err(ProfileError::EmptyPath));

        let p = ConnectionProfile {
            keep_alive_secs: Some(0),
            ..profile()
        };
        assert_eq!(p.resolve(), Err(ProfileError::ZeroKeepAlive));

        let p = ConnectionProfile {
            host: " ".into(),
            ..profile()
        };
        assert_eq!(p.resolve(), Err(ProfileError::EmptyHost));
    }

    #[test]
    fn tls_is_taken_from_the_flag() {
        let p = ConnectionProfile {
            port: 443,
            path: Some("ws".into()),
            transport: TransportSecurity::Tls,
            username: Some("op".into()),
            secret: Some("pw".into()),
            ..profile()
        };
        let options = p.resolve().unwrap();
        assert_eq!(options.url(), "wss://broker.local:443/ws");
        assert_eq!(options.credentials, Some(("op".into(), "pw".into())));
    }
}
