//! # mqttlink - self-healing MQTT sessions for IoT devices
//!
//! Keeps one MQTT 3.1.1 broker session alive on a device whose network link
//! drops, roams and comes back at will. A single supervisor thread owns the
//! connect/keepalive/input loop and retries forever; a producer thread
//! publishes a status message on a fixed period whenever the session is up.
//!
//! ## Layers
//!
//! - [`network`]: connection-agnostic `Read`/`Write`/`Close`/`Poll` traits, a
//!   TCP transport, and the MQTT session client built on them
//! - [`session`]: the event dispatcher, the reconnect supervisor and the
//!   periodic producer, plus the `connected` flag they share
//! - [`config`], [`identity`], [`bearer`], [`logging`]: what the binary needs
//!   to bring a device up
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use mqttlink::network::application::mqtt::{Client, Options};
//! use mqttlink::network::tcp::{resolve, TcpConnector};
//! use mqttlink::session::{ConnectionState, Dispatcher, Supervisor, ThreadDelay};
//!
//! let broker = resolve("test.mosquitto.org", 1883).unwrap();
//! let connector = TcpConnector::new(Duration::from_secs(10), Duration::from_secs(5));
//! let options = Options::new("dev-352656100000000").unwrap();
//! let client = Arc::new(Client::new(connector, broker, options, 128, 128).unwrap());
//!
//! let state = ConnectionState::new();
//! let dispatcher = Dispatcher::new(state.clone(), "my/subscribe/topic", 128).unwrap();
//! let supervisor = Supervisor::new(client, dispatcher, Duration::from_secs(60), ThreadDelay);
//! supervisor.run();
//! ```
//!
//! ## Platform Support
//!
//! The session layer only needs `std` threads and a transport implementing
//! the [`network`] traits. The bundled transport is `std::net` TCP; a modem
//! socket layer slots in by implementing `Connect`, `Connection` and `Watch`.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Network abstraction layer and the MQTT session client.
///
/// The transport traits are deliberately small so that a device can back
/// them with `std::net`, a modem's socket API, or an in-memory mock.
pub mod network;

/// Session supervision: dispatcher, reconnect supervisor and producer.
pub mod session;

/// TOML deployment configuration.
pub mod config;

/// Client identifier derivation.
pub mod identity;

/// Network bearer bring-up.
pub mod bearer;

/// Log subscriber setup.
pub mod logging;
