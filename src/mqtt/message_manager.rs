use chrono::{DateTime, Local};
use std::fmt;

/// One inbound bus message, decoded to text.
///
/// Every payload on this bus is text (numeric strings, free text or minified
/// JSON), so the transport decodes once with lossy UTF-8 and the rest of the
/// console works on `&str`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

impl BusMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        BusMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    pub fn from_bytes(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self::from_topic(topic, String::from_utf8_lossy(payload).into_owned())
    }
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.payload.chars().take(32).collect();
        write!(
            f,
            "{} {} - {}",
            self.received_at.format("%H:%M:%S"),
            self.topic,
            preview
        )
    }
}
