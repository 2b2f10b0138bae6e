//! Protocol events surfaced by the session client.

use super::client::Client;
use super::codec::{QoS, SUBACK_FAILURE};
use crate::network::Connect;
use crate::network::error::Error;
use heapless::String;

/// Longest topic name accepted on an inbound PUBLISH.
pub const MAX_TOPIC_LEN: usize = 256;

/// Variable header of an inbound PUBLISH.
///
/// The body is still on the wire when this is delivered; `payload_len` says
/// how many bytes the handler may pull through
/// [`Client::payload_reader`](super::client::Client::payload_reader).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublishHeader {
    /// The topic on which the message was published.
    pub topic: String<MAX_TOPIC_LEN>,
    /// Delivery guarantee requested by the sender.
    pub qos: QoS,
    /// Packet identifier; zero for QoS 0.
    pub message_id: u16,
    /// Redelivery flag.
    pub dup: bool,
    /// Retained message flag.
    pub retain: bool,
    /// Declared length of the body that follows on the wire.
    pub payload_len: usize,
}

/// A protocol event, delivered synchronously on the thread that drives input.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    /// CONNACK received; a non-zero `return_code` means the broker refused.
    ConnAck {
        session_present: bool,
        return_code: u8,
    },
    /// The transport was torn down, gracefully (`Ok`) or by an error.
    Disconnect { result: Result<(), Error> },
    /// An application message arrived.
    Publish(PublishHeader),
    /// The broker acknowledged one of our QoS 1 publishes.
    PubAck { message_id: u16 },
    /// The broker answered a SUBSCRIBE; `0x80` means the filter was rejected.
    SubAck { message_id: u16, return_code: u8 },
    /// The broker answered a liveness ping.
    PingResp,
    /// A packet this client does not act on; its body has been skipped.
    Other { packet_type: u8 },
}

impl Event {
    /// Whether the event reports a failure that should be logged as an error.
    pub fn is_failure(&self) -> bool {
        match self {
            Event::ConnAck { return_code, .. } => *return_code != 0,
            Event::Disconnect { result } => result.is_err(),
            Event::SubAck { return_code, .. } => *return_code == SUBACK_FAILURE,
            _ => false,
        }
    }
}

/// Receives events from a [`Client`].
///
/// The handler gets the client back so it can answer (subscribe, acknowledge,
/// read a payload, disconnect) from inside the callback. The client's
/// internal lock is never held while a handler runs.
pub trait EventHandler<N: Connect> {
    /// Handle one event.
    fn on_event(&mut self, client: &Client<N>, event: Event);
}

impl<N, F> EventHandler<N> for F
where
    N: Connect,
    F: FnMut(&Client<N>, Event),
{
    fn on_event(&mut self, client: &Client<N>, event: Event) {
        self(client, event)
    }
}
