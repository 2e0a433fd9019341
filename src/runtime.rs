//! Cooperative event loop around a [`Console`].
//!
//! One task owns the console and handles, one at a time: transport events,
//! operator commands and the reconnect deadline. Presentation code talks to
//! it through a cloneable [`ConsoleHandle`]; each command carries a oneshot
//! for its result.
//!
//! ```text
//! transport ──TransportEvent──┐
//! ConsoleHandle ──Command─────┼──► ConsoleRuntime::run ──► Console
//! reconnect deadline ─────────┘
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::console::{Console, OperatorIntent};
use crate::device::state::Mode;
use crate::error::IntentError;
use crate::mqtt::config::ConnectionProfile;
use crate::mqtt::transport::{BusTransport, EventReceiver};
use crate::persistence::{ProfileStore, SecretStore, AI_API_KEY};

const COMMAND_CAPACITY: usize = 32;

#[derive(Debug)]
pub struct Command {
    pub intent: OperatorIntent,
    pub response_tx: oneshot::Sender<Result<(), IntentError>>,
}

/// Async front door to a running console.
#[derive(Clone)]
pub struct ConsoleHandle {
    tx: mpsc::Sender<Command>,
}

impl ConsoleHandle {
    pub async fn send(&self, intent: OperatorIntent) -> Result<(), IntentError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(Command {
                intent,
                response_tx,
            })
            .await
            .map_err(|_| IntentError::Stopped)?;
        response_rx.await.map_err(|_| IntentError::Stopped)?
    }

    pub async fn connect(&self, profile: ConnectionProfile) -> Result<(), IntentError> {
        self.send(OperatorIntent::Connect(profile)).await
    }

    pub async fn disconnect(&self) -> Result<(), IntentError> {
        self.send(OperatorIntent::Disconnect).await
    }

    pub async fn set_angle(&self, angle: f64) -> Result<(), IntentError> {
        self.send(OperatorIntent::SetAngle(angle)).await
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<(), IntentError> {
        self.send(OperatorIntent::SetMode(mode)).await
    }

    pub async fn select_recipe(&self, slot: Option<u8>) -> Result<(), IntentError> {
        self.send(OperatorIntent::SelectRecipe(slot)).await
    }

    pub async fn request_ai_draft(
        &self,
        prompt: String,
        max_angle: f64,
    ) -> Result<(), IntentError> {
        self.send(OperatorIntent::RequestAiDraft { prompt, max_angle })
            .await
    }

    pub async fn apply_ai_draft(&self, slot: Option<u8>) -> Result<(), IntentError> {
        self.send(OperatorIntent::ApplyAiDraft(slot)).await
    }
}

pub struct ConsoleRuntime<T: BusTransport, S> {
    console: Console<T>,
    store: Arc<S>,
    transport_rx: EventReceiver,
    commands: mpsc::Receiver<Command>,
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<T, S> ConsoleRuntime<T, S>
where
    T: BusTransport,
    S: ProfileStore + SecretStore,
{
    pub fn new(
        console: Console<T>,
        store: Arc<S>,
        transport_rx: EventReceiver,
    ) -> (Self, ConsoleHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        (
            ConsoleRuntime {
                console,
                store,
                transport_rx,
                commands,
            },
            ConsoleHandle { tx },
        )
    }

    pub fn console(&self) -> &Console<T> {
        &self.console
    }

    /// Runs until every [`ConsoleHandle`] is dropped, then disconnects.
    pub async fn run(mut self) {
        info!("Console runtime started");
        loop {
            let deadline = self.console.reconnect_deadline();
            tokio::select! {
                Some(event) = self.transport_rx.recv() => {
                    self.console.handle_transport_event(event);
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        Self::dispatch(&mut self.console, self.store.as_ref(), command).await
                    }
                    None => break,
                },
                _ = wait_for(deadline) => {
                    self.console.on_reconnect_timer();
                }
            }
        }
        self.console.disconnect();
        info!("Console runtime stopped");
    }

    async fn dispatch(console: &mut Console<T>, store: &S, command: Command) {
        let Command {
            intent,
            response_tx,
        } = command;
        debug!("Operator intent {:?}", intent);

        let result = match intent {
            OperatorIntent::Connect(profile) => console.connect(profile),
            OperatorIntent::Disconnect => {
                console.disconnect();
                Ok(())
            }
            OperatorIntent::SetAngle(angle) => console.set_angle(angle),
            OperatorIntent::SetMode(mode) => console.set_mode(mode),
            OperatorIntent::SelectRecipe(slot) => console.select_recipe(slot),
            OperatorIntent::RequestAiDraft { prompt, max_angle } => {
                let api_key = match store.get(AI_API_KEY).await {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("Could not read AI credential: {}", e);
                        None
                    }
                };
                console
                    .request_ai_draft(&prompt, max_angle, api_key.as_deref())
                    .map(|_| ())
            }
            OperatorIntent::ApplyAiDraft(slot) => console.apply_ai_draft(slot),
            OperatorIntent::SaveProfile(profile) => match profile.resolve() {
                Ok(_) => store
                    .save_profile(&profile)
                    .await
                    .map_err(IntentError::from),
                Err(e) => Err(e.into()),
            },
            OperatorIntent::SaveAiKey(key) => {
                let key = key.trim();
                let saved = if key.is_empty() {
                    store.remove(AI_API_KEY).await
                } else {
                    store.set(AI_API_KEY, key).await
                };
                saved.map_err(IntentError::from)
            }
        };

        if let Err(e) = &result {
            debug!("Intent rejected: {}", e);
        }
        if response_tx.send(result).is_err() {
            debug!("Intent caller went away before the result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsoleConfig;
    use crate::mqtt::session::SessionState;
    use crate::mqtt::transport::testing::RecordingTransport;
    use crate::mqtt::transport::{event_channel, EventSender, TransportEvent, TransportEventKind};
    use crate::persistence::MemoryStore;
    use std::time::Duration;

    struct Harness {
        handle: ConsoleHandle,
        events: EventSender,
        transport: RecordingTransport,
        store: Arc<MemoryStore>,
        session: tokio::sync::watch::Receiver<SessionState>,
    }

    fn start() -> Harness {
        let (events, transport_rx) = event_channel();
        let transport = RecordingTransport::new();
        let console = Console::new(transport.clone(), &ConsoleConfig::default());
        let session = console.session_state();
        let store = Arc::new(MemoryStore::new());
        let (runtime, handle) = ConsoleRuntime::new(console, store.clone(), transport_rx);
        tokio::spawn(runtime.run());
        Harness {
            handle,
            events,
            transport,
            store,
            session,
        }
    }

    fn profile() -> ConnectionProfile {
        ConnectionProfile {
            host: "pi.local".into(),
            ..Default::default()
        }
    }

    // With paused time a short sleep only returns once the runtime is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_is_retried_once_after_two_seconds() {
        let h = start();
        h.handle.connect(profile()).await.unwrap();
        h.events
            .send(TransportEvent {
                epoch: 1,
                kind: TransportEventKind::Connected,
            })
            .unwrap();
        settle().await;
        assert_eq!(*h.session.borrow(), SessionState::Connected);

        for _ in 0..2 {
            h.events
                .send(TransportEvent {
                    epoch: 1,
                    kind: TransportEventKind::ConnectionLost {
                        error_code: 8,
                        reason: "socket closed".into(),
                    },
                })
                .unwrap();
        }
        settle().await;
        assert_eq!(*h.session.borrow(), SessionState::Disconnected);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(h.transport.opens(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.transport.opens(), 2);
        assert_eq!(*h.session.borrow(), SessionState::Connecting);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.transport.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn operator_disconnect_stops_retrying() {
        let h = start();
        h.transport.fail_open(true);
        assert!(h.handle.connect(profile()).await.is_err());
        h.transport.fail_open(false);
        h.handle.disconnect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.transport.opens(), 0);
        assert_eq!(*h.session.borrow(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn invalid_profile_is_neither_connected_nor_saved() {
        let h = start();
        let bad = ConnectionProfile {
            port: 0,
            ..profile()
        };
        assert!(matches!(
            h.handle.connect(bad.clone()).await,
            Err(IntentError::InvalidProfile(_))
        ));
        assert!(matches!(
            h.handle.send(OperatorIntent::SaveProfile(bad)).await,
            Err(IntentError::InvalidProfile(_))
        ));
        assert!(h.store.load_profile().await.unwrap().is_none());
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn ai_request_forwards_stored_key() {
        let h = start();
        h.handle
            .send(OperatorIntent::SaveAiKey("  secret-key ".into()))
            .await
            .unwrap();
        h.handle.connect(profile()).await.unwrap();
        h.events
            .send(TransportEvent {
                epoch: 1,
                kind: TransportEventKind::Connected,
            })
            .unwrap();
        // Commands and events race in select!, so wait for the connection.
        let mut session = h.session.clone();
        session
            .wait_for(|s| *s == SessionState::Connected)
            .await
            .unwrap();

        h.handle
            .request_ai_draft("wiggle".into(), 90.0)
            .await
            .unwrap();
        let (topic, payload) = h.transport.publishes().pop().unwrap();
        assert_eq!(topic, "ai/recipe/request");
        let envelope: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(envelope["api_key"], "secret-key");
    }

    #[tokio::test]
    async fn handle_reports_stopped_runtime() {
        let (_events, transport_rx) = event_channel();
        let console = Console::new(RecordingTransport::new(), &ConsoleConfig::default());
        let (runtime, handle) =
            ConsoleRuntime::new(console, Arc::new(MemoryStore::new()), transport_rx);
        drop(runtime);
        assert_eq!(handle.set_angle(10.0).await, Err(IntentError::Stopped));
    }
}
