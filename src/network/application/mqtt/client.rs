//! MQTT 3.1.1 session client for long-lived, reconnecting device links.
//!
//! The client owns the broker address, the client identity, and a pair of
//! fixed-size transmit/receive buffers that survive reconnects. The transport
//! itself is recreated on every [`Client::connect`].
//!
//! Unlike a request/response client, nothing here waits for an answer from
//! the broker. CONNACK, SUBACK, PUBACK and PINGRESP arrive later through
//! [`Client::input`] and are handed to an [`EventHandler`] synchronously.
//!
//! # Sharing
//!
//! A `Client` is meant to sit in an `Arc`: the supervisor thread drives
//! `connect`/`poll`/`live`/`input`, while a producer thread calls
//! [`Client::publish`]. All mutable state lives behind one internal mutex.
//! That mutex is released before blocking in [`Client::poll`] and before any
//! event handler runs, so a handler may call back into the client.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mqttlink::network::application::mqtt::{Client, Event, Options};
//! use mqttlink::network::tcp::{resolve, TcpConnector};
//!
//! let broker = resolve("test.mosquitto.org", 1883).unwrap();
//! let connector = TcpConnector::new(Duration::from_secs(10), Duration::from_secs(5));
//! let client = Client::new(connector, broker, Options::new("dev-1").unwrap(), 128, 128).unwrap();
//!
//! client.connect().unwrap();
//! let mut fds = client.poll_descriptor().unwrap();
//! client.poll(&mut fds).unwrap();
//! client
//!     .input(&mut |_: &Client<TcpConnector>, event: Event| println!("{event:?}"))
//!     .unwrap();
//! ```

use core::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use heapless::String;
use rand::Rng;
use tracing::{debug, error, info};

use super::codec::{
    self, CONNACK, ConnectPacket, PINGRESP, PUBACK, PUBLISH, ProtocolVersion, QoS, SUBACK,
};
use super::event::{Event, EventHandler, MAX_TOPIC_LEN, PublishHeader};
use super::payload::display_payload;
use crate::network::error::Error;
use crate::network::{Close, Connect, Connection, PollDescriptor, PollFlags, Read, Watch};

/// Longest client identifier accepted.
pub const MAX_CLIENT_ID_LEN: usize = 64;
/// Longest username or password accepted.
pub const MAX_CREDENTIAL_LEN: usize = 64;
/// Packet identifier used for the single always-on subscription.
pub const SUBSCRIBE_MESSAGE_ID: u16 = 1234;
/// Smallest receive buffer that can hold any fixed-size acknowledgment body.
pub const MIN_RX_BUFFER: usize = 4;

type Watcher<N> = <<N as Connect>::Connection as Watch>::Watcher;

/// Session parameters sent in CONNECT.
#[derive(Debug, Clone)]
pub struct Options {
    /// The client identifier, unique within the broker.
    ///
    /// May be empty: with a clean session the broker assigns one.
    pub client_id: String<MAX_CLIENT_ID_LEN>,
    /// The keep-alive interval in seconds; 0 disables liveness pings.
    pub keep_alive_seconds: u16,
    /// Whether the broker discards prior session state on connect.
    pub clean_session: bool,
    /// Protocol revision for the handshake.
    pub protocol_version: ProtocolVersion,
    /// Optional username.
    pub username: Option<String<MAX_CREDENTIAL_LEN>>,
    /// Optional password.
    pub password: Option<String<MAX_CREDENTIAL_LEN>>,
}

impl Options {
    /// Options for a clean MQTT 3.1.1 session with a 60 second keepalive
    /// and no credentials.
    pub fn new(client_id: &str) -> Result<Self, Error> {
        Ok(Self {
            client_id: String::try_from(client_id).map_err(|_| Error::BufferTooSmall)?,
            keep_alive_seconds: 60,
            clean_session: true,
            protocol_version: ProtocolVersion::V3_1_1,
            username: None,
            password: None,
        })
    }

    fn connect_packet(&self) -> ConnectPacket<'_> {
        ConnectPacket {
            client_id: &self.client_id,
            keep_alive_seconds: self.keep_alive_seconds,
            clean_session: self.clean_session,
            version: self.protocol_version,
            username: self.username.as_deref(),
            password: self.password.as_deref().map(str::as_bytes),
        }
    }
}

/// Mutable session state, guarded by the client mutex.
struct Inner<N: Connect> {
    connector: N,
    connection: Option<N::Connection>,
    rx: Box<[u8]>,
    tx: Box<[u8]>,
    /// Time of the last packet written; keepalive is measured from here.
    last_activity: Instant,
    ping_outstanding: bool,
    /// Bytes of the current PUBLISH body still on the wire.
    payload_remaining: usize,
}

/// An MQTT session client over any [`Connect`]or.
pub struct Client<N: Connect> {
    options: Options,
    broker: String<64>,
    inner: Mutex<Inner<N>>,
}

impl<N: Connect> core::fmt::Debug for Client<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.options.client_id)
            .field("broker", &self.broker)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<N: Connect> Client<N> {
    /// Create a client for a resolved broker address.
    ///
    /// The buffers are allocated once here and reused for every session.
    pub fn new(
        connector: N,
        broker: SocketAddr,
        options: Options,
        rx_buffer_size: usize,
        tx_buffer_size: usize,
    ) -> Result<Self, Error> {
        if rx_buffer_size < MIN_RX_BUFFER || tx_buffer_size == 0 {
            return Err(Error::BufferTooSmall);
        }
        let mut address = String::new();
        write!(address, "{broker}").map_err(|_| Error::InvalidAddress)?;

        Ok(Self {
            options,
            broker: address,
            inner: Mutex::new(Inner {
                connector,
                connection: None,
                rx: vec![0u8; rx_buffer_size].into_boxed_slice(),
                tx: vec![0u8; tx_buffer_size].into_boxed_slice(),
                last_activity: Instant::now(),
                ping_outstanding: false,
                payload_remaining: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<N>> {
        // Everything behind the lock is reset on the next connect.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The broker address as `ip:port`.
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Whether a transport is currently open.
    ///
    /// This lags the protocol handshake: a transport is open as soon as
    /// CONNECT is written, long before CONNACK arrives.
    pub fn is_open(&self) -> bool {
        self.lock().connection.is_some()
    }

    /// Open a new transport and send CONNECT.
    ///
    /// Returns once the packet is written; the broker's answer arrives later
    /// as [`Event::ConnAck`]. Any previous transport is dropped first.
    pub fn connect(&self) -> Result<(), Error> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(stale) = inner.connection.take() {
            let _ = stale.close();
        }
        inner.payload_remaining = 0;
        inner.ping_outstanding = false;

        let mut connection = inner.connector.connect(&self.broker).map_err(|e| {
            debug!(broker = %self.broker, error = ?e, "Transport connect failed");
            Error::NotOpen
        })?;

        let len = codec::encode_connect(&mut inner.tx, &self.options.connect_packet())?;
        if let Err(e) = write_all(&mut connection, &inner.tx[..len]) {
            let _ = connection.close();
            return Err(e);
        }

        inner.connection = Some(connection);
        inner.last_activity = Instant::now();
        info!(
            broker = %self.broker,
            client_id = %self.options.client_id,
            "MQTT CONNECT sent"
        );
        Ok(())
    }

    /// Build a poll entry for the current transport, watching for input.
    pub fn poll_descriptor(&self) -> Result<PollDescriptor<Watcher<N>>, Error> {
        let inner = self.lock();
        let connection = inner.connection.as_ref().ok_or(Error::NotOpen)?;
        let watcher = connection.watcher().map_err(|e| {
            debug!(error = ?e, "Could not create poll handle");
            Error::NotOpen
        })?;
        Ok(PollDescriptor::new(watcher, PollFlags::IN))
    }

    /// Time left until the next liveness ping is due.
    ///
    /// `None` when keepalive is disabled.
    pub fn keepalive_time_left(&self) -> Option<Duration> {
        if self.options.keep_alive_seconds == 0 {
            return None;
        }
        let interval = Duration::from_secs(u64::from(self.options.keep_alive_seconds));
        let elapsed = self.lock().last_activity.elapsed();
        Some(interval.saturating_sub(elapsed))
    }

    /// Block until the transport is readable, reports an error, or the next
    /// liveness ping falls due.
    pub fn poll(&self, fds: &mut PollDescriptor<Watcher<N>>) -> Result<PollFlags, Error> {
        let timeout = self.keepalive_time_left();
        fds.poll(timeout).map_err(|e| {
            debug!(error = ?e, "Poll failed");
            Error::ReadError
        })
    }

    /// Send a liveness ping if one is due.
    ///
    /// Returns [`Error::WouldBlock`] when nothing needed sending. A ping that
    /// is still unanswered when the next one falls due yields
    /// [`Error::Timeout`].
    pub fn live(&self) -> Result<(), Error> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.connection.is_none() {
            return Err(Error::NotOpen);
        }
        if self.options.keep_alive_seconds == 0 {
            return Err(Error::WouldBlock);
        }
        let interval = Duration::from_secs(u64::from(self.options.keep_alive_seconds));
        if inner.last_activity.elapsed() < interval {
            return Err(Error::WouldBlock);
        }
        if inner.ping_outstanding {
            error!("No PINGRESP within the keepalive interval");
            return Err(Error::Timeout);
        }

        let len = codec::encode_pingreq(&mut inner.tx)?;
        inner.send(len)?;
        inner.ping_outstanding = true;
        debug!("PINGREQ sent");
        Ok(())
    }

    /// Read one packet from the transport and dispatch it.
    ///
    /// Call this when [`Client::poll`] reports [`PollFlags::IN`]. A further
    /// packet already buffered by the transport surfaces on the next poll
    /// without waiting.
    ///
    /// A transport failure closes the connection and dispatches
    /// [`Event::Disconnect`] before the error is returned. A refused CONNACK
    /// is dispatched and then reported as [`Error::ConnectionRefused`].
    pub fn input<H: EventHandler<N>>(&self, handler: &mut H) -> Result<(), Error> {
        let read = {
            let mut guard = self.lock();
            if guard.connection.is_none() {
                return Err(Error::NotOpen);
            }
            let read = guard.read_packet();
            if read.is_err() {
                guard.close_transport();
            }
            read
        };

        let event = match read {
            Ok(event) => event,
            Err(e) => {
                handler.on_event(self, Event::Disconnect { result: Err(e) });
                return Err(e);
            }
        };

        let refused = match event {
            Event::ConnAck { return_code, .. } if return_code != 0 => Some(return_code),
            _ => None,
        };
        handler.on_event(self, event);

        match refused {
            Some(code) => Err(Error::ConnectionRefused(code)),
            None => Ok(()),
        }
    }

    /// A reader over the body of the PUBLISH currently being dispatched.
    ///
    /// Reads stop at the declared body length; anything left unread is
    /// discarded before the next packet is parsed.
    pub fn payload_reader(&self) -> PayloadReader<'_, N> {
        PayloadReader { client: self }
    }

    fn read_payload(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let want = buf.len().min(inner.payload_remaining);
        if want == 0 {
            return Ok(0);
        }
        let connection = inner.connection.as_mut().ok_or(Error::NotOpen)?;
        let n = connection
            .read(&mut buf[..want])
            .map_err(|_| Error::ReadError)?;
        inner.payload_remaining -= n;
        Ok(n)
    }

    /// Subscribe to `topic`, tagged with [`SUBSCRIBE_MESSAGE_ID`].
    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Error> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let len = codec::encode_subscribe(&mut inner.tx, SUBSCRIBE_MESSAGE_ID, topic, qos)?;
        inner.send(len)?;
        info!(topic, "Subscribing");
        Ok(())
    }

    /// Publish `payload` on `topic`.
    ///
    /// QoS 1 and 2 messages get a random non-zero packet identifier, which is
    /// returned so that the matching [`Event::PubAck`] can be correlated.
    /// Returns as soon as the packet is written.
    pub fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> Result<u16, Error> {
        let message_id = match qos {
            QoS::AtMostOnce => 0,
            _ => rand::thread_rng().gen_range(1..=u16::MAX),
        };

        let mut guard = self.lock();
        let inner = &mut *guard;
        let len =
            codec::encode_publish_header(&mut inner.tx, topic, qos, message_id, payload.len())?;
        let connection = inner.connection.as_mut().ok_or(Error::NotOpen)?;
        write_all(connection, &inner.tx[..len])?;
        write_all(connection, payload)?;
        inner.last_activity = Instant::now();

        info!(topic, message_id, "Publishing \"{}\"", display_payload(payload));
        Ok(message_id)
    }

    /// Acknowledge an inbound QoS 1 message.
    pub fn ack(&self, message_id: u16) -> Result<(), Error> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let len = codec::encode_puback(&mut inner.tx, message_id)?;
        inner.send(len)
    }

    /// Send DISCONNECT and close the transport.
    ///
    /// Calling this without an open transport returns [`Error::NotOpen`] and
    /// changes nothing. Otherwise [`Event::Disconnect`] is dispatched with the
    /// outcome of the teardown.
    pub fn disconnect<H: EventHandler<N>>(&self, handler: &mut H) -> Result<(), Error> {
        let result = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let Some(mut connection) = inner.connection.take() else {
                return Err(Error::NotOpen);
            };
            inner.payload_remaining = 0;
            inner.ping_outstanding = false;

            let sent = codec::encode_disconnect(&mut inner.tx)
                .and_then(|len| write_all(&mut connection, &inner.tx[..len]));
            let closed = connection.close().map_err(|_| Error::NotOpen);
            sent.and(closed)
        };

        handler.on_event(self, Event::Disconnect { result });
        result
    }
}

impl<N: Connect> Inner<N> {
    /// Write the first `len` bytes of the transmit buffer.
    fn send(&mut self, len: usize) -> Result<(), Error> {
        let connection = self.connection.as_mut().ok_or(Error::NotOpen)?;
        write_all(connection, &self.tx[..len])?;
        self.last_activity = Instant::now();
        Ok(())
    }

    fn close_transport(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.close();
        }
        self.payload_remaining = 0;
        self.ping_outstanding = false;
    }

    /// Read exactly one packet header (and, except for PUBLISH, its body).
    fn read_packet(&mut self) -> Result<Event, Error> {
        let Inner {
            connection,
            rx,
            ping_outstanding,
            payload_remaining,
            ..
        } = self;
        let connection = connection.as_mut().ok_or(Error::NotOpen)?;

        if *payload_remaining > 0 {
            debug!(bytes = *payload_remaining, "Discarding unread payload");
            discard(connection, rx, *payload_remaining)?;
            *payload_remaining = 0;
        }

        let mut header = [0u8; 1];
        read_exact(connection, &mut header)?;
        let remaining = codec::decode_remaining_length(|| {
            let mut byte = [0u8; 1];
            read_exact(connection, &mut byte)?;
            Ok(byte[0])
        })?;

        match header[0] & 0xF0 {
            CONNACK => {
                let body = read_body(connection, rx, remaining)?;
                let (session_present, return_code) = codec::decode_connack(body)?;
                Ok(Event::ConnAck {
                    session_present,
                    return_code,
                })
            }
            PUBLISH => {
                let publish = read_publish_header(connection, rx, header[0], remaining)?;
                *payload_remaining = publish.payload_len;
                Ok(Event::Publish(publish))
            }
            PUBACK => {
                let body = read_body(connection, rx, remaining)?;
                Ok(Event::PubAck {
                    message_id: codec::decode_packet_id(body)?,
                })
            }
            SUBACK => {
                let body = read_body(connection, rx, remaining)?;
                let (message_id, return_code) = codec::decode_suback(body)?;
                Ok(Event::SubAck {
                    message_id,
                    return_code,
                })
            }
            PINGRESP => {
                discard(connection, rx, remaining)?;
                *ping_outstanding = false;
                Ok(Event::PingResp)
            }
            other => {
                discard(connection, rx, remaining)?;
                Ok(Event::Other {
                    packet_type: other >> 4,
                })
            }
        }
    }
}

/// Reads the body of the PUBLISH currently being dispatched.
#[derive(Debug)]
pub struct PayloadReader<'a, N: Connect> {
    client: &'a Client<N>,
}

impl<N: Connect> Read for PayloadReader<'_, N> {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.client.read_payload(buf)
    }
}

fn write_all<C: Connection>(connection: &mut C, mut bytes: &[u8]) -> Result<(), Error> {
    while !bytes.is_empty() {
        match connection.write(bytes) {
            Ok(0) => return Err(Error::WriteError),
            Ok(n) => bytes = &bytes[n..],
            Err(_) => return Err(Error::WriteError),
        }
    }
    connection.flush().map_err(|_| Error::WriteError)
}

fn read_exact<C: Connection>(connection: &mut C, buf: &mut [u8]) -> Result<(), Error> {
    let mut total_read = 0;
    while total_read < buf.len() {
        match connection.read(&mut buf[total_read..]) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => total_read += n,
            Err(_) => return Err(Error::ReadError),
        }
    }
    Ok(())
}

fn read_body<'b, C: Connection>(
    connection: &mut C,
    rx: &'b mut [u8],
    len: usize,
) -> Result<&'b [u8], Error> {
    if len > rx.len() {
        return Err(Error::BufferTooSmall);
    }
    read_exact(connection, &mut rx[..len])?;
    Ok(&rx[..len])
}

/// Consume and drop `len` bytes, using `scratch` as the landing area.
fn discard<C: Connection>(
    connection: &mut C,
    scratch: &mut [u8],
    mut len: usize,
) -> Result<(), Error> {
    while len > 0 {
        let chunk = len.min(scratch.len());
        read_exact(connection, &mut scratch[..chunk])?;
        len -= chunk;
    }
    Ok(())
}

fn read_publish_header<C: Connection>(
    connection: &mut C,
    rx: &mut [u8],
    header: u8,
    remaining: usize,
) -> Result<PublishHeader, Error> {
    let (dup, qos, retain) = codec::decode_publish_flags(header)?;
    if remaining < 2 {
        return Err(Error::ProtocolError);
    }

    let mut topic_len = [0u8; 2];
    read_exact(connection, &mut topic_len)?;
    let topic_len = u16::from_be_bytes(topic_len) as usize;
    let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };

    let header_len = 2 + topic_len + id_len;
    if header_len > remaining {
        return Err(Error::ProtocolError);
    }
    if topic_len > MAX_TOPIC_LEN {
        return Err(Error::BufferTooSmall);
    }

    let body = read_body(connection, rx, topic_len + id_len)?;
    let topic = core::str::from_utf8(&body[..topic_len]).map_err(|_| Error::ProtocolError)?;
    let topic = String::try_from(topic).map_err(|_| Error::BufferTooSmall)?;
    let message_id = if id_len > 0 {
        codec::decode_packet_id(&body[topic_len..])?
    } else {
        0
    };

    Ok(PublishHeader {
        topic,
        qos,
        message_id,
        dup,
        retain,
        payload_len: remaining - header_len,
    })
}
