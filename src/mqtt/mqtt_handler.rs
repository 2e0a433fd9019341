//! `rumqttc` implementation of [`BusTransport`].
//!
//! Each `open` builds a fresh client/event-loop pair and spawns a task that
//! drives the event loop and translates what it sees into
//! [`TransportEvent`]s. `close` cancels that task through a
//! [`CancellationToken`]; the task flushes the DISCONNECT packet and exits
//! without reporting anything further.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, Transport,
};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{SessionOptions, TransportSecurity};
use super::message_manager::BusMessage;
use super::transport::{BusTransport, EventSender, TransportError, TransportEvent, TransportEventKind};

const REQUEST_CAPACITY: usize = 64;
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

struct Link {
    client: AsyncClient,
    cancel: CancellationToken,
}

pub struct MqttHandler {
    events: EventSender,
    connect_timeout: Duration,
    link: Option<Link>,
}

impl MqttHandler {
    pub fn new(events: EventSender, connect_timeout: Duration) -> Self {
        MqttHandler {
            events,
            connect_timeout,
            link: None,
        }
    }
}

fn mqtt_options(options: &SessionOptions) -> MqttOptions {
    // WebSocket transports take the full URL as the broker address.
    let mut mqtt_options = MqttOptions::new(options.client_id.clone(), options.url(), options.port);
    mqtt_options
        .set_keep_alive(options.keep_alive)
        .set_clean_session(options.clean_session);

    if let Some((user, secret)) = &options.credentials {
        mqtt_options.set_credentials(user.clone(), secret.clone());
    }

    let transport = match options.transport {
        TransportSecurity::Plain => Transport::Ws,
        TransportSecurity::Tls => Transport::wss_with_default_config(),
    };
    mqtt_options.set_transport(transport);
    mqtt_options
}

impl BusTransport for MqttHandler {
    fn open(&mut self, options: &SessionOptions, epoch: u64) -> Result<(), TransportError> {
        if self.link.is_some() {
            self.close()?;
        }

        info!("Opening bus link {} (epoch {})", options.url(), epoch);
        let (client, eventloop) = AsyncClient::new(mqtt_options(options), REQUEST_CAPACITY);
        let cancel = CancellationToken::new();
        tokio::spawn(drive(
            eventloop,
            self.events.clone(),
            epoch,
            self.connect_timeout,
            cancel.clone(),
        ));

        self.link = Some(Link { client, cancel });
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let link = self.link.take().ok_or(TransportError::NotOpen)?;
        link.cancel.cancel();
        debug!("Bus link closed");
        link.client
            .try_disconnect()
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotOpen)?;
        link.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotOpen)?;
        link.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

enum Step {
    Cancelled,
    TimedOut,
    Polled(Result<Event, ConnectionError>),
}

async fn poll_step(eventloop: &mut EventLoop, deadline: Option<Instant>) -> Step {
    match deadline {
        Some(deadline) => match timeout_at(deadline, eventloop.poll()).await {
            Ok(polled) => Step::Polled(polled),
            Err(_) => Step::TimedOut,
        },
        None => Step::Polled(eventloop.poll().await),
    }
}

async fn drive(
    mut eventloop: EventLoop,
    events: EventSender,
    epoch: u64,
    connect_timeout: Duration,
    cancel: CancellationToken,
) {
    let deadline = Instant::now() + connect_timeout;
    let mut connected = false;

    let emit = |kind: TransportEventKind| {
        if events.send(TransportEvent { epoch, kind }).is_err() {
            warn!("Transport event receiver dropped");
        }
    };

    loop {
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            step = poll_step(&mut eventloop, (!connected).then_some(deadline)) => step,
        };

        if cancel.is_cancelled() {
            flush_disconnect(&mut eventloop).await;
            return;
        }

        match step {
            Step::Cancelled => return,
            Step::TimedOut => {
                emit(TransportEventKind::ConnectFailed {
                    reason: format!("connect timed out after {:?}", connect_timeout),
                });
                return;
            }
            Step::Polled(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected = true;
                    emit(TransportEventKind::Connected);
                } else {
                    emit(TransportEventKind::ConnectFailed {
                        reason: format!("broker refused connection: {:?}", ack.code),
                    });
                    return;
                }
            }
            Step::Polled(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                emit(TransportEventKind::Message(BusMessage::from_bytes(
                    publish.topic,
                    &publish.payload,
                )));
            }
            Step::Polled(Ok(Event::Outgoing(Outgoing::Disconnect))) => {
                emit(TransportEventKind::ConnectionLost {
                    error_code: 0,
                    reason: "client disconnected".to_string(),
                });
                return;
            }
            Step::Polled(Ok(_)) => {}
            Step::Polled(Err(e)) => {
                let kind = if connected {
                    TransportEventKind::ConnectionLost {
                        error_code: 1,
                        reason: e.to_string(),
                    }
                } else {
                    TransportEventKind::ConnectFailed {
                        reason: e.to_string(),
                    }
                };
                emit(kind);
                return;
            }
        }
    }
}

async fn flush_disconnect(eventloop: &mut EventLoop) {
    let flushed = timeout(DISCONNECT_FLUSH, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if flushed.is_err() {
        debug!("Disconnect not flushed within {:?}", DISCONNECT_FLUSH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::config::ConnectionProfile;
    use crate::mqtt::transport::event_channel;

    #[test]
    fn options_carry_profile_parameters() {
        let profile = ConnectionProfile {
            host: "pi.local".into(),
            port: 9001,
            client_id: Some("console_1".into()),
            keep_alive_secs: Some(30),
            clean_session: Some(false),
            ..Default::default()
        };
        let options = mqtt_options(&profile.resolve().unwrap());
        assert_eq!(options.client_id(), "console_1");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(!options.clean_session());
        assert_eq!(options.broker_address().0, "ws://pi.local:9001/mqtt");
    }

    #[tokio::test]
    async fn requests_without_a_link_are_rejected() {
        let (tx, _rx) = event_channel();
        let mut handler = MqttHandler::new(tx, Duration::from_secs(5));
        assert_eq!(handler.publish("t", "1"), Err(TransportError::NotOpen));
        assert_eq!(handler.subscribe("t"), Err(TransportError::NotOpen));
        assert_eq!(handler.close(), Err(TransportError::NotOpen));
    }

    #[tokio::test]
    async fn unreachable_broker_reports_connect_failure() {
        let (tx, mut rx) = event_channel();
        let mut handler = MqttHandler::new(tx, Duration::from_secs(2));
        let profile = ConnectionProfile {
            host: "127.0.0.1".into(),
            port: 1,
            ..Default::default()
        };
        handler.open(&profile.resolve().unwrap(), 7).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.epoch, 7);
        assert!(matches!(event.kind, TransportEventKind::ConnectFailed { .. }));
    }

    #[tokio::test]
    async fn silent_broker_hits_connect_timeout() {
        // Accepts TCP but never answers the WebSocket upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let (tx, mut rx) = event_channel();
        let mut handler = MqttHandler::new(tx, Duration::from_millis(300));
        let profile = ConnectionProfile {
            host: "127.0.0.1".into(),
            port: u32::from(port),
            ..Default::default()
        };
        handler.open(&profile.resolve().unwrap(), 4).unwrap();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event before the test deadline")
            .unwrap();
        assert_eq!(event.epoch, 4);
        match event.kind {
            TransportEventKind::ConnectFailed { reason } => {
                assert!(reason.contains("timed out"), "reason: {}", reason)
            }
            other => panic!("expected a connect failure, got {:?}", other),
        }
    }
}
