//! Mock construction helpers

use mockall::mock;
use packet_bridge::pipeline::ShutdownTrigger;
use packet_bridge::sink::PublishSink;
use packet_bridge::types::ConnectionStatus;
use packet_bridge::Result;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread::JoinHandle;
use std::time::Duration;

mock! {
    pub Sink {}

    impl PublishSink for Sink {
        fn connect(&mut self) -> Result<()>;
        fn status(&self) -> ConnectionStatus;
        fn service(&mut self) -> Result<()>;
        fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;
        fn flush(&mut self, timeout: Duration) -> Result<()>;
        fn disconnect(&mut self) -> Result<()>;
    }
}

/// A mock sink that connects at once and accepts housekeeping calls;
/// publish/flush/disconnect expectations are left to the test
pub fn connected_mock_sink() -> MockSink {
    let mut sink = MockSink::new();
    sink.expect_connect().times(1).returning(|| Ok(()));
    sink.expect_status().return_const(ConnectionStatus::Connected);
    sink.expect_service().returning(|| Ok(()));
    sink
}

/// Fire `trigger` after `delay` on a helper thread
pub fn interrupt_after(trigger: ShutdownTrigger, delay: Duration) -> JoinHandle<()> {
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        trigger.trigger();
    })
}

/// What a [`FakeBroker`] saw from its client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connect,
    Publish { topic: String, payload: String },
    PingReq,
    Disconnect,
}

/// Single-connection MQTT broker on localhost, without TLS
///
/// Answers CONNECT with the configured CONNACK code, acknowledges QoS 1
/// publishes (unless started with [`without_acks`](Self::without_acks))
/// and PINGREQs, and stops at DISCONNECT or EOF.
pub struct FakeBroker {
    addr: SocketAddr,
    handle: JoinHandle<Vec<BrokerEvent>>,
}

impl FakeBroker {
    pub fn start(connack_code: u8) -> Self {
        Self::spawn(connack_code, true)
    }

    /// Accept the session but never send PUBACK
    pub fn without_acks() -> Self {
        Self::spawn(0, false)
    }

    fn spawn(connack_code: u8, ack_publishes: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake broker");
        let addr = listener.local_addr().expect("local addr");
        let handle = std::thread::spawn(move || serve(listener, connack_code, ack_publishes));
        Self { addr, handle }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the client to leave and return everything it sent
    pub fn finish(self) -> Vec<BrokerEvent> {
        self.handle.join().expect("fake broker panicked")
    }
}

/// Split one control packet (first header byte, body) off the front of `buf`
fn next_packet(buf: &mut Vec<u8>) -> Option<(u8, Vec<u8>)> {
    let mut remaining = 0usize;
    let mut offset = 1;
    for shift in [0, 7, 14, 21] {
        let byte = *buf.get(offset)?;
        remaining |= usize::from(byte & 0x7F) << shift;
        offset += 1;
        if byte & 0x80 == 0 {
            break;
        }
        assert!(shift < 21, "client sent a malformed remaining length");
    }
    if buf.len() < offset + remaining {
        return None;
    }
    let header = buf[0];
    let body = buf[offset..offset + remaining].to_vec();
    buf.drain(..offset + remaining);
    Some((header, body))
}

/// Topic, packet id and payload of a PUBLISH body
fn parse_publish(header: u8, body: &[u8]) -> (String, Option<[u8; 2]>, String) {
    let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
    let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).into_owned();
    let mut rest = &body[2 + topic_len..];
    let packet_id = if (header >> 1) & 0x03 > 0 {
        let id = [rest[0], rest[1]];
        rest = &rest[2..];
        Some(id)
    } else {
        None
    };
    (topic, packet_id, String::from_utf8_lossy(rest).into_owned())
}

fn serve(listener: TcpListener, connack_code: u8, ack_publishes: bool) -> Vec<BrokerEvent> {
    let mut events = Vec::new();
    let Ok((mut stream, _)) = listener.accept() else {
        return events;
    };
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return events,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return events,
        }

        while let Some((header, body)) = next_packet(&mut buf) {
            match header >> 4 {
                // CONNECT
                1 => {
                    events.push(BrokerEvent::Connect);
                    let _ = stream.write_all(&[0x20, 0x02, 0x00, connack_code]);
                    if connack_code != 0 {
                        return events;
                    }
                }
                // PUBLISH
                3 => {
                    let (topic, packet_id, payload) = parse_publish(header, &body);
                    events.push(BrokerEvent::Publish { topic, payload });
                    if let (Some([hi, lo]), true) = (packet_id, ack_publishes) {
                        let _ = stream.write_all(&[0x40, 0x02, hi, lo]);
                    }
                }
                // PINGREQ
                12 => {
                    events.push(BrokerEvent::PingReq);
                    let _ = stream.write_all(&[0xD0, 0x00]);
                }
                // DISCONNECT
                14 => {
                    events.push(BrokerEvent::Disconnect);
                    return events;
                }
                _ => {}
            }
        }
    }
}
