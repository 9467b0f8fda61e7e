//! MQTT publish sink
//!
//! [`MqttSink`] adapts the rumqttc synchronous client to [`PublishSink`].
//! `connect` builds the client and hands its connection to a network
//! thread that runs the event loop (TLS via our rustls [`ClientConfig`]
//! unless `tls.enabled` is false). The thread forwards the events the
//! drainer cares about over a channel; [`PublishSink::service`] applies
//! them without blocking.
//!
//! The sink is connected once the broker's CONNACK accepts the session.
//! A lost connection is not re-established: the first network error ends
//! the thread and every later call reports it.
//!
//! Publishing never blocks. Requests go into the client's bounded request
//! channel; the event loop stops taking them while `max_inflight` QoS 1
//! publishes wait for PUBACK, and once the channel is full as well a
//! publish fails with [`BridgeError::Publish`].

use crate::config::SinkConfig;
use crate::error::{BridgeError, Result, ResultExt};
use crate::sink::{tls, PublishSink};
use crate::types::ConnectionStatus;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event, Incoming, MqttOptions,
    NetworkOptions, Outgoing, QoS, TlsConfiguration, Transport,
};
use rustls::ClientConfig;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Requests the client buffers before `publish` reports the sink as full
const REQUEST_CAPACITY: usize = 64;

/// Largest packet sent or accepted
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// How long `disconnect` waits for the DISCONNECT to reach the socket
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// What the network thread reports back
#[derive(Debug)]
enum NetworkEvent {
    ConnAck(ConnectReturnCode),
    Acked,
    DisconnectSent,
    Refused(ConnectReturnCode),
    Closed(String),
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Run the event loop until the first error, forwarding events to `tx`
fn run_network(mut connection: Connection, tx: Sender<NetworkEvent>) {
    for notification in connection.iter() {
        let event = match notification {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => NetworkEvent::ConnAck(ack.code),
            Ok(Event::Incoming(Incoming::PubAck(_) | Incoming::PubComp(_))) => NetworkEvent::Acked,
            Ok(Event::Outgoing(Outgoing::Disconnect)) => NetworkEvent::DisconnectSent,
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                let _ = tx.send(NetworkEvent::Refused(code));
                break;
            }
            Err(e) => {
                let _ = tx.send(NetworkEvent::Closed(e.to_string()));
                break;
            }
        };
        if tx.send(event).is_err() {
            break;
        }
    }
    tracing::debug!("MQTT network thread stopped");
}

/// Client, event channel and network thread of one connection
struct Session {
    client: Client,
    events: Receiver<NetworkEvent>,
    network: JoinHandle<()>,
}

/// MQTT 3.1.1 publisher
pub struct MqttSink {
    config: SinkConfig,
    tls_config: Option<Arc<ClientConfig>>,
    session: Option<Session>,
    status: ConnectionStatus,
    in_flight: usize,
}

impl MqttSink {
    /// Create a sink; client id, host and TLS options are checked here,
    /// the broker is not contacted until [`connect`](PublishSink::connect)
    pub fn new(config: SinkConfig) -> Result<Self> {
        if config.client_id.is_empty() || config.client_id.starts_with(' ') {
            return Err(BridgeError::Config(format!(
                "invalid MQTT client id '{}'",
                config.client_id
            )));
        }
        let tls_config = if config.tls.enabled {
            tls::server_name(&config.host)?;
            Some(tls::client_config(&config.tls)?)
        } else {
            None
        };
        Ok(Self {
            config,
            tls_config,
            session: None,
            status: ConnectionStatus::Disconnected,
            in_flight: 0,
        })
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Acknowledged-QoS publishes still waiting for the broker
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn options(&self) -> MqttOptions {
        let config = &self.config;
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options
            .set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)))
            .set_clean_session(config.clean_session)
            .set_inflight(config.max_inflight.max(1))
            .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }
        if let Some(tls_config) = &self.tls_config {
            options.set_transport(Transport::Tls(TlsConfiguration::Rustls(Arc::clone(
                tls_config,
            ))));
        }
        options
    }

    fn handle(&mut self, event: NetworkEvent) -> Result<()> {
        match event {
            NetworkEvent::ConnAck(ConnectReturnCode::Success) => {
                self.status = ConnectionStatus::Connected;
                tracing::info!(broker = %self.config.address(), "Broker accepted session");
                Ok(())
            }
            NetworkEvent::ConnAck(code) | NetworkEvent::Refused(code) => {
                self.status = ConnectionStatus::Error;
                Err(BridgeError::SinkConnect(format!(
                    "broker {} refused connection: {:?}",
                    self.config.address(),
                    code
                )))
            }
            NetworkEvent::Acked => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Ok(())
            }
            NetworkEvent::DisconnectSent => Ok(()),
            NetworkEvent::Closed(reason) => {
                let was_connecting = self.status == ConnectionStatus::Connecting;
                self.status = ConnectionStatus::Error;
                Err(BridgeError::SinkConnect(if was_connecting {
                    format!("cannot connect to {}: {}", self.config.address(), reason)
                } else {
                    format!("connection to {} lost: {}", self.config.address(), reason)
                }))
            }
        }
    }

    fn events(&self) -> Result<Receiver<NetworkEvent>> {
        self.session
            .as_ref()
            .map(|session| session.events.clone())
            .ok_or(BridgeError::NotConnected)
    }
}

impl PublishSink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn connect(&mut self) -> Result<()> {
        self.disconnect()?;
        tracing::info!(
            broker = %self.config.address(),
            client_id = %self.config.client_id,
            tls = self.tls_config.is_some(),
            "Connecting to broker"
        );

        let (client, mut connection) = Client::new(self.options(), REQUEST_CAPACITY);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(self.config.connect_timeout_secs());
        connection.eventloop.set_network_options(network_options);

        let (tx, events) = unbounded();
        let network = std::thread::Builder::new()
            .name("mqtt-network".to_string())
            .spawn(move || run_network(connection, tx))
            .context("Failed to spawn MQTT network thread")?;

        self.session = Some(Session {
            client,
            events,
            network,
        });
        self.status = ConnectionStatus::Connecting;
        self.in_flight = 0;
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn service(&mut self) -> Result<()> {
        let events = self.events()?;
        if self.status == ConnectionStatus::Error {
            return Err(BridgeError::NotConnected);
        }
        loop {
            match events.try_recv() {
                Ok(event) => self.handle(event)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    self.status = ConnectionStatus::Error;
                    return Err(BridgeError::SinkConnect(
                        "MQTT network thread exited".to_string(),
                    ));
                }
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        let session = self.session.as_ref().ok_or(BridgeError::NotConnected)?;
        if self.status != ConnectionStatus::Connected {
            return Err(BridgeError::NotConnected);
        }

        let qos = qos_level(self.config.qos);
        session
            .client
            .try_publish(topic, qos, false, payload.as_bytes().to_vec())
            .map_err(|e| BridgeError::publish(topic, e.to_string()))?;
        if qos != QoS::AtMostOnce {
            self.in_flight += 1;
        }
        tracing::trace!(topic, ?qos, bytes = payload.len(), "PUBLISH queued");
        Ok(())
    }

    fn flush(&mut self, timeout: Duration) -> Result<()> {
        if self.status != ConnectionStatus::Connected {
            return Ok(());
        }
        let events = self.events()?;
        let deadline = Instant::now() + timeout;
        while self.in_flight > 0 {
            match events.recv_deadline(deadline) {
                Ok(event) => self.handle(event)?,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(BridgeError::Timeout(format!(
                        "{} publish(es) still unacknowledged",
                        self.in_flight
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.status = ConnectionStatus::Error;
                    return Err(BridgeError::SinkConnect(
                        "MQTT network thread exited".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let was_connected = self.status == ConnectionStatus::Connected;
        self.status = ConnectionStatus::Disconnected;
        self.in_flight = 0;

        if was_connected && session.client.try_disconnect().is_ok() {
            let deadline = Instant::now() + DISCONNECT_TIMEOUT;
            loop {
                match session.events.recv_deadline(deadline) {
                    Ok(NetworkEvent::DisconnectSent | NetworkEvent::Closed(_)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        }

        // Dropping the client ends the event loop; a thread still inside a
        // connect attempt is left to time out on its own.
        drop(session.client);
        if session.network.is_finished() {
            let _ = session.network.join();
        }
        tracing::info!(broker = %self.config.address(), "Disconnected from broker");
        Ok(())
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsOptions;

    fn plain_config(port: u16) -> SinkConfig {
        SinkConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout_ms: 500,
            tls: TlsOptions {
                enabled: false,
                ..TlsOptions::default()
            },
            ..SinkConfig::default()
        }
    }

    #[test]
    fn test_new_checks_tls_options() {
        let mut config = SinkConfig::default();
        config.tls.cipher_suite = Some("NOT-A-SUITE".to_string());
        assert!(matches!(MqttSink::new(config), Err(BridgeError::Config(_))));
        assert!(MqttSink::new(SinkConfig::default()).is_ok());
    }

    #[test]
    fn test_new_rejects_bad_client_id() {
        let mut config = plain_config(1883);
        config.client_id = String::new();
        assert!(matches!(MqttSink::new(config), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_level(0), QoS::AtMostOnce);
        assert_eq!(qos_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_level(2), QoS::ExactlyOnce);
    }

    #[test]
    fn test_unconnected_sink() {
        let mut sink = MqttSink::new(plain_config(1)).unwrap();
        assert_eq!(sink.status(), ConnectionStatus::Disconnected);
        assert!(matches!(sink.publish("t", "x"), Err(BridgeError::NotConnected)));
        assert!(matches!(sink.service(), Err(BridgeError::NotConnected)));
        assert!(sink.flush(Duration::from_millis(1)).is_ok());
        assert!(sink.disconnect().is_ok());
    }

    #[test]
    fn test_refused_tcp_connection() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut sink = MqttSink::new(plain_config(port)).unwrap();
        sink.connect().unwrap();
        assert_eq!(sink.status(), ConnectionStatus::Connecting);

        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            match sink.service() {
                Err(e) => break e,
                Ok(()) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                Ok(()) => panic!("refused connection never reported"),
            }
        };
        assert!(matches!(err, BridgeError::SinkConnect(_)));
        assert_eq!(sink.status(), ConnectionStatus::Error);
        assert!(matches!(sink.publish("t", "x"), Err(BridgeError::NotConnected)));
    }
}
