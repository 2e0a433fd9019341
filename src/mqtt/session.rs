//! Connection manager: one owned bus session and its lifecycle.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!                               │                 │
//!                            failure        loss (code != 0) ──► Disconnected + reconnect
//!                               ▼           loss (code == 0) ──► Disconnected
//!                     Failed + reconnect
//! any ──disconnect──► Disconnected (reconnect cancelled)
//! ```
//!
//! The reconnect timer is a single slot holding a deadline. The runtime loop
//! sleeps until [`Session::reconnect_deadline`] and then calls
//! [`Session::fire_reconnect`]; nothing here spawns timers of its own.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::{ConnectionProfile, ProfileError};
use super::message_manager::BusMessage;
use super::transport::{BusTransport, TransportError, TransportEvent, TransportEventKind};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid connection profile: {0}")]
    Profile(#[from] ProfileError),

    #[error("session is not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// What a transport event meant for the rest of the console.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionSignal {
    /// The session just became connected; subscriptions should be declared.
    Established,
    /// The session left the connected state.
    Lost,
    Message(BusMessage),
    Nothing,
}

pub struct Session<T: BusTransport> {
    transport: T,
    state_tx: watch::Sender<SessionState>,
    profile: Option<ConnectionProfile>,
    epoch: u64,
    link_open: bool,
    reconnect_at: Option<Instant>,
    reconnect_delay: Duration,
}

impl<T: BusTransport> Session<T> {
    pub fn new(transport: T, reconnect_delay: Duration) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Session {
            transport,
            state_tx,
            profile: None,
            epoch: 0,
            link_open: false,
            reconnect_at: None,
            reconnect_delay,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Read-only view of the session state for observers.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Session state {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }

    /// Best-effort teardown; errors are logged and swallowed.
    fn teardown(&mut self) {
        if !self.link_open {
            return;
        }
        self.link_open = false;
        if let Err(e) = self.transport.close() {
            debug!("Ignoring teardown error: {}", e);
        }
    }

    /// Starts a new session from `profile`.
    ///
    /// The profile is validated first; a rejected profile leaves any existing
    /// session untouched. An explicit connect replaces a pending reconnect.
    pub fn connect(&mut self, profile: ConnectionProfile) -> Result<(), SessionError> {
        let options = profile.resolve()?;

        self.teardown();
        self.reconnect_at = None;
        self.profile = Some(profile);
        self.epoch += 1;

        info!("Connecting to {} as {}", options.url(), options.client_id);
        self.set_state(SessionState::Connecting);

        match self.transport.open(&options, self.epoch) {
            Ok(()) => {
                self.link_open = true;
                Ok(())
            }
            Err(e) => {
                warn!("Could not open bus link: {}", e);
                self.set_state(SessionState::Failed);
                self.schedule_reconnect();
                Err(e.into())
            }
        }
    }

    /// Operator-initiated disconnect. Never followed by a reconnect.
    pub fn disconnect(&mut self) {
        if self.reconnect_at.take().is_some() {
            debug!("Pending reconnect cancelled");
        }
        self.teardown();
        // Late events from the old link must not count for anything.
        self.epoch += 1;
        self.set_state(SessionState::Disconnected);
        info!("Disconnected by operator");
    }

    /// Arms the reconnect slot. A second request while armed is a no-op.
    pub fn schedule_reconnect(&mut self) -> bool {
        if self.reconnect_at.is_some() {
            debug!("Reconnect already pending");
            return false;
        }
        if self.profile.is_none() {
            return false;
        }
        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        info!("Reconnecting in {:?}", self.reconnect_delay);
        true
    }

    /// Called by the runtime when the reconnect deadline has passed.
    pub fn fire_reconnect(&mut self) {
        if self.reconnect_at.take().is_none() {
            return;
        }
        let Some(profile) = self.profile.clone() else {
            return;
        };
        if let Err(e) = self.connect(profile) {
            debug!("Reconnect attempt failed immediately: {}", e);
        }
    }

    /// Applies one transport event to the state machine.
    pub fn handle_event(&mut self, event: TransportEvent) -> SessionSignal {
        if event.epoch != self.epoch {
            debug!("Dropping event from stale epoch {}", event.epoch);
            return SessionSignal::Nothing;
        }

        match (self.state(), event.kind) {
            (SessionState::Connecting, TransportEventKind::Connected) => {
                info!("Session connected");
                self.set_state(SessionState::Connected);
                SessionSignal::Established
            }
            (SessionState::Connecting, TransportEventKind::ConnectFailed { reason }) => {
                warn!("Connection failed: {}", reason);
                self.teardown();
                self.set_state(SessionState::Failed);
                self.schedule_reconnect();
                SessionSignal::Nothing
            }
            (SessionState::Connected, TransportEventKind::ConnectionLost { error_code, reason }) => {
                self.teardown();
                self.set_state(SessionState::Disconnected);
                if error_code != 0 {
                    warn!("Connection lost ({}): {}", error_code, reason);
                    self.schedule_reconnect();
                } else {
                    info!("Connection closed cleanly");
                }
                SessionSignal::Lost
            }
            (SessionState::Connected, TransportEventKind::Message(msg)) => {
                SessionSignal::Message(msg)
            }
            (state, kind) => {
                debug!("Ignoring {:?} while {:?}", kind, state);
                SessionSignal::Nothing
            }
        }
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.transport.subscribe(topic)?;
        Ok(())
    }

    /// Sends immediately or not at all. There is no outbound buffer.
    pub fn publish(&mut self, topic: &str, payload: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            debug!("Publish to {} dropped: not connected", topic);
            return Err(SessionError::NotConnected);
        }
        self.transport.publish(topic, payload)?;
        debug!("Published {} <- {}", topic, payload);
        Ok(())
    }
}
