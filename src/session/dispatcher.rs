//! Protocol event handling for the session.
//!
//! Runs on the supervisor thread, inside [`Client::input`] and
//! [`Client::disconnect`]. It owns the payload buffer and is the only writer
//! of the [`ConnectionState`] flag.

use tracing::{debug, error, info};

use super::state::ConnectionState;
use crate::network::Connect;
use crate::network::application::mqtt::event::MAX_TOPIC_LEN;
use crate::network::application::mqtt::payload::display_payload;
use crate::network::application::mqtt::{
    AcquireError, Client, Event, EventHandler, PayloadBuffer, PublishHeader, QoS,
};
use crate::network::error::Error;

/// Receives each inbound message whose body was acquired in full.
pub trait MessageSink: Send {
    /// Handle one message.
    fn on_message(&mut self, topic: &str, payload: &[u8]);
}

impl<F> MessageSink for F
where
    F: FnMut(&str, &[u8]) + Send,
{
    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}

/// What happened to the body of one inbound PUBLISH.
enum Body {
    /// Declared empty; nothing was read.
    Empty,
    Acquired,
    Oversized { declared: usize, capacity: usize },
}

/// Event dispatcher for one always-on subscription.
pub struct Dispatcher {
    state: ConnectionState,
    subscribe_topic: String,
    payload: PayloadBuffer,
    sink: Option<Box<dyn MessageSink>>,
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("subscribe_topic", &self.subscribe_topic)
            .field("payload_capacity", &self.payload.capacity())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher that subscribes to `subscribe_topic` on every
    /// accepted CONNACK and reads bodies into a `payload_capacity` buffer.
    pub fn new(
        state: ConnectionState,
        subscribe_topic: &str,
        payload_capacity: usize,
    ) -> Result<Self, Error> {
        if subscribe_topic.is_empty() || subscribe_topic.len() > MAX_TOPIC_LEN {
            return Err(Error::ProtocolError);
        }
        Ok(Self {
            state,
            subscribe_topic: subscribe_topic.to_string(),
            payload: PayloadBuffer::new(payload_capacity),
            sink: None,
        })
    }

    /// Forward complete inbound messages to `sink`.
    pub fn with_sink(mut self, sink: impl MessageSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// The payload buffer; holds the last message that was acquired in full.
    pub fn payload(&self) -> &PayloadBuffer {
        &self.payload
    }

    fn on_publish<N: Connect>(&mut self, client: &Client<N>, publish: PublishHeader) {
        info!(
            topic = %publish.topic,
            qos = ?publish.qos,
            message_id = publish.message_id,
            len = publish.payload_len,
            "MQTT PUBLISH received"
        );

        let body = if publish.payload_len == 0 {
            Body::Empty
        } else {
            let mut reader = client.payload_reader();
            match self.payload.acquire(&mut reader, publish.payload_len) {
                Ok(_) => Body::Acquired,
                Err(AcquireError::Oversized { declared, capacity }) => {
                    Body::Oversized { declared, capacity }
                }
                Err(AcquireError::Io(e)) => {
                    // Framing is lost; no acknowledgment, drop the session.
                    error!(error = %e, "Reading the received payload failed");
                    info!("Disconnecting MQTT client...");
                    if let Err(e) = client.disconnect(self) {
                        error!(error = %e, "Could not disconnect");
                    }
                    return;
                }
            }
        };

        if publish.qos == QoS::AtLeastOnce {
            if let Err(e) = client.ack(publish.message_id) {
                error!(message_id = publish.message_id, error = %e, "Sending PUBACK failed");
            }
        }

        match body {
            Body::Empty => self.deliver(&publish.topic, &[]),
            Body::Acquired => {
                let contents = self.payload.contents().unwrap_or_default();
                info!(topic = %publish.topic, "Received: \"{}\"", display_payload(contents));
                if let Some(sink) = self.sink.as_mut() {
                    sink.on_message(&publish.topic, contents);
                }
            }
            Body::Oversized { declared, capacity } => {
                error!(
                    declared,
                    capacity,
                    "Received payload is larger than the payload buffer, message dropped"
                );
            }
        }
    }

    fn deliver(&mut self, topic: &str, payload: &[u8]) {
        info!(topic, "Received: \"{}\"", display_payload(payload));
        if let Some(sink) = self.sink.as_mut() {
            sink.on_message(topic, payload);
        }
    }
}

impl<N: Connect> EventHandler<N> for Dispatcher {
    fn on_event(&mut self, client: &Client<N>, event: Event) {
        let failed = event.is_failure();
        match event {
            Event::ConnAck {
                session_present,
                return_code: 0,
            } => {
                info!(session_present, "MQTT client connected");
                self.state.set_connected(true);
                if let Err(e) = client.subscribe(&self.subscribe_topic, QoS::AtLeastOnce) {
                    error!(topic = %self.subscribe_topic, error = %e, "Subscribe request failed");
                }
            }
            Event::ConnAck { return_code, .. } => {
                error!(return_code, "MQTT connect failed");
            }
            Event::Disconnect { result } => {
                match result {
                    Ok(()) => info!("MQTT client disconnected"),
                    Err(e) => info!(error = %e, "MQTT client disconnected"),
                }
                self.state.set_connected(false);
            }
            Event::Publish(publish) => self.on_publish(client, publish),
            Event::PubAck { message_id } => {
                debug!(message_id, "PUBACK received");
            }
            Event::SubAck {
                message_id,
                return_code,
            } => {
                if failed {
                    error!(message_id, "MQTT SUBACK error: subscription rejected");
                } else {
                    info!(message_id, granted_qos = return_code, "SUBACK received");
                }
            }
            Event::PingResp => debug!("PINGRESP received"),
            Event::Other { packet_type } => {
                info!(packet_type, "Unhandled MQTT event type");
            }
        }
    }
}
