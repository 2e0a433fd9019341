//! Abstract bus transport.
//!
//! A transport is built once with an event sender and reused across every
//! connection attempt. It never calls back into the console: it only pushes
//! [`TransportEvent`]s, each tagged with the epoch of the session that
//! produced it.

use super::config::SessionOptions;
use super::message_manager::BusMessage;
use thiserror::Error;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// Handshake completed.
    Connected,
    /// Handshake refused, failed or timed out.
    ConnectFailed { reason: String },
    /// An established session went away. `error_code == 0` is a clean loss.
    ConnectionLost { error_code: i32, reason: String },
    Message(BusMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub epoch: u64,
    pub kind: TransportEventKind,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no open link")]
    NotOpen,

    #[error("failed to open link: {0}")]
    Open(String),

    #[error("request rejected by client: {0}")]
    Rejected(String),
}

/// The bus operations the session needs. All methods return immediately;
/// outcomes of `open` arrive later as events.
pub trait BusTransport {
    fn open(&mut self, options: &SessionOptions, epoch: u64) -> Result<(), TransportError>;

    /// Tears down the current link. Must not emit events for it afterwards.
    fn close(&mut self) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError>;
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
pub mod testing {
    //! In-memory transport that records every call.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Open { url: String, epoch: u64 },
        Close,
        Subscribe(String),
        Publish { topic: String, payload: String },
    }

    #[derive(Default)]
    struct Inner {
        calls: Vec<Call>,
        fail_open: bool,
        fail_publish_on: Vec<String>,
    }

    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        inner: Arc<Mutex<Inner>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<Call> {
            self.inner.lock().unwrap().calls.clone()
        }

        pub fn clear(&self) {
            self.inner.lock().unwrap().calls.clear();
        }

        pub fn publishes(&self) -> Vec<(String, String)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Publish { topic, payload } => Some((topic, payload)),
                    _ => None,
                })
                .collect()
        }

        pub fn opens(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Open { .. }))
                .count()
        }

        pub fn fail_open(&self, fail: bool) {
            self.inner.lock().unwrap().fail_open = fail;
        }

        pub fn fail_publish_on(&self, topic: &str) {
            self.inner
                .lock()
                .unwrap()
                .fail_publish_on
                .push(topic.to_string());
        }
    }

    impl BusTransport for RecordingTransport {
        fn open(&mut self, options: &SessionOptions, epoch: u64) -> Result<(), TransportError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_open {
                return Err(TransportError::Open("refused".into()));
            }
            inner.calls.push(Call::Open {
                url: options.url(),
                epoch,
            });
            Ok(())
        }

        fn close(&mut self) -> Result<(), TransportError> {
            self.inner.lock().unwrap().calls.push(Call::Close);
            Ok(())
        }

        fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
            self.inner
                .lock()
                .unwrap()
                .calls
                .push(Call::Subscribe(topic.to_string()));
            Ok(())
        }

        fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_publish_on.iter().any(|t| t == topic) {
                return Err(TransportError::Rejected("queue full".into()));
            }
            inner.calls.push(Call::Publish {
                topic: topic.to_string(),
                payload: payload.to_string(),
            });
            Ok(())
        }
    }
}
