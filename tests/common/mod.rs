#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mqttlink::network::application::mqtt::codec::encode_remaining_length;
use mqttlink::network::application::mqtt::{Client, Options};
use mqttlink::network::error::Error;
use mqttlink::network::*;
use mqttlink::session::Delay;

/// Both directions of a mock socket, shared by the connection, its watcher
/// and the test.
#[derive(Debug, Default)]
pub struct Wire {
    /// Bytes the "broker" has sent and the client has not read yet
    pub inbound: VecDeque<u8>,
    /// Everything the client wrote, across all sessions
    pub outbound: Vec<u8>,
    pub is_open: bool,
    /// Reads fail and the watcher reports ERR
    pub fail_reads: bool,
    /// The peer has closed: reads past the inbound data return 0
    pub eof: bool,
    pub connects: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SharedWire(Arc<Mutex<Wire>>);

impl SharedWire {
    pub fn lock(&self) -> MutexGuard<'_, Wire> {
        self.0.lock().unwrap()
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.lock().inbound.extend(bytes.iter().copied());
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().outbound)
    }

    pub fn written_packets(&self) -> Vec<(u8, Vec<u8>)> {
        split_packets(&self.take_written())
    }

    pub fn unread(&self) -> usize {
        self.lock().inbound.len()
    }
}

#[derive(Debug)]
pub struct MockConnection {
    wire: SharedWire,
}

impl Read for MockConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut wire = self.wire.lock();
        if !wire.is_open {
            return Err(Error::NotOpen);
        }
        if wire.fail_reads {
            return Err(Error::ReadError);
        }
        if wire.inbound.is_empty() {
            return if wire.eof { Ok(0) } else { Err(Error::Timeout) };
        }
        let len = buf.len().min(wire.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

impl Write for MockConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut wire = self.wire.lock();
        if !wire.is_open {
            return Err(Error::NotOpen);
        }
        wire.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if !self.wire.lock().is_open {
            return Err(Error::NotOpen);
        }
        Ok(())
    }
}

impl Close for MockConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        self.wire.lock().is_open = false;
        Ok(())
    }
}

impl Connection for MockConnection {}

impl Watch for MockConnection {
    type Watcher = MockWatcher;
    type Error = Error;

    fn watcher(&self) -> Result<Self::Watcher, Self::Error> {
        Ok(MockWatcher {
            wire: self.wire.clone(),
        })
    }
}

/// Reports readiness from the wire state without ever blocking.
#[derive(Debug)]
pub struct MockWatcher {
    wire: SharedWire,
}

impl Poll for MockWatcher {
    type Error = Error;

    fn poll(
        &mut self,
        interest: PollFlags,
        _timeout: Option<Duration>,
    ) -> Result<PollFlags, Self::Error> {
        let wire = self.wire.lock();
        if !wire.is_open {
            return Ok(PollFlags::NVAL);
        }
        if wire.fail_reads {
            return Ok(PollFlags::ERR);
        }
        let mut revents = PollFlags::empty();
        if !wire.inbound.is_empty() {
            revents |= PollFlags::IN;
        }
        if wire.eof {
            revents |= PollFlags::IN | PollFlags::HUP;
        }
        Ok(revents & (interest | PollFlags::ERR | PollFlags::HUP | PollFlags::NVAL))
    }
}

/// Connector whose connect results can be scripted; unscripted attempts
/// succeed.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    pub wire: SharedWire,
    script: Arc<Mutex<VecDeque<Result<(), Error>>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, results: impl IntoIterator<Item = Result<(), Error>>) {
        self.script.lock().unwrap().extend(results);
    }
}

impl Connect for MockNetwork {
    type Connection = MockConnection;
    type Error = Error;

    fn connect(&mut self, _remote: &str) -> Result<Self::Connection, Self::Error> {
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        let mut wire = self.wire.lock();
        wire.connects += 1;
        next?;
        wire.is_open = true;
        wire.fail_reads = false;
        wire.eof = false;
        Ok(MockConnection {
            wire: self.wire.clone(),
        })
    }
}

pub fn broker_addr() -> SocketAddr {
    "127.0.0.1:1883".parse().unwrap()
}

pub fn mock_client(keep_alive_seconds: u16) -> (Client<MockNetwork>, SharedWire) {
    let network = MockNetwork::new();
    let wire = network.wire.clone();
    let mut options = Options::new("dev-352656100000000").unwrap();
    options.keep_alive_seconds = keep_alive_seconds;
    let client = Client::new(network, broker_addr(), options, 128, 128).unwrap();
    (client, wire)
}

/// A client that has already been through `connect()`, with the CONNECT
/// bytes cleared from the wire.
pub fn connected_client() -> (Client<MockNetwork>, SharedWire) {
    let (client, wire) = mock_client(60);
    client.connect().unwrap();
    wire.take_written();
    (client, wire)
}

/// Records every requested sleep and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    pub sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingDelay {
    pub fn recorded(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Delay for RecordingDelay {
    fn sleep(&mut self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

// Broker-side packets

pub fn connack(return_code: u8) -> Vec<u8> {
    vec![0x20, 0x02, 0x00, return_code]
}

pub fn suback(message_id: u16, return_code: u8) -> Vec<u8> {
    let [hi, lo] = message_id.to_be_bytes();
    vec![0x90, 0x03, hi, lo, return_code]
}

pub fn puback(message_id: u16) -> Vec<u8> {
    let [hi, lo] = message_id.to_be_bytes();
    vec![0x40, 0x02, hi, lo]
}

pub fn pingresp() -> Vec<u8> {
    vec![0xD0, 0x00]
}

pub fn publish(topic: &str, qos: u8, message_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    if qos > 0 {
        body.extend_from_slice(&message_id.to_be_bytes());
    }
    body.extend_from_slice(payload);

    let mut packet = vec![0x30 | (qos << 1)];
    packet.extend_from_slice(&encode_remaining_length(body.len()).unwrap());
    packet.extend_from_slice(&body);
    packet
}

/// Split client output into `(first byte, body)` pairs.
pub fn split_packets(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut packets = Vec::new();
    while !bytes.is_empty() {
        let header = bytes[0];
        let mut len = 0usize;
        let mut multiplier = 1usize;
        let mut i = 1;
        loop {
            let byte = bytes[i];
            len += (byte & 0x7F) as usize * multiplier;
            multiplier *= 128;
            i += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }
        packets.push((header, bytes[i..i + len].to_vec()));
        bytes = &bytes[i + len..];
    }
    packets
}

pub fn packet_types(packets: &[(u8, Vec<u8>)]) -> Vec<u8> {
    packets.iter().map(|(header, _)| header & 0xF0).collect()
}
