//! MQTT 3.1.1 protocol implementation for always-on device sessions.
//!
//! MQTT (Message Queuing Telemetry Transport) is a lightweight publish-subscribe
//! messaging protocol. This module splits it into:
//!
//! - [`codec`]: packet encoders and decoders over fixed buffers
//! - [`client`]: the session client (connect, poll, liveness, input, publish)
//! - [`event`]: the events a session produces and the handler trait
//! - [`payload`]: reading inbound bodies into a bounded buffer
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mqttlink::network::application::mqtt::{Client, Options, QoS};
//! use mqttlink::network::tcp::{resolve, TcpConnector};
//!
//! let broker = resolve("test.mosquitto.org", 1883).unwrap();
//! let connector = TcpConnector::new(Duration::from_secs(10), Duration::from_secs(5));
//! let options = Options::new("iot_device_123").unwrap();
//! let client = Client::new(connector, broker, options, 256, 256).unwrap();
//!
//! client.connect().unwrap();
//! // client.subscribe("commands/+", QoS::AtLeastOnce)?;  // after CONNACK
//! client.publish("status", QoS::AtLeastOnce, b"online").unwrap();
//! ```

/// MQTT session client and supporting types.
pub mod client;

/// Packet framing.
pub mod codec;

/// Protocol events.
pub mod event;

/// Inbound payload acquisition.
pub mod payload;

pub use client::{Client, Options, PayloadReader};
pub use codec::{ProtocolVersion, QoS};
pub use event::{Event, EventHandler, PublishHeader};
pub use payload::{AcquireError, PayloadBuffer};
