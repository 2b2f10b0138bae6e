//! # Application Layer Network Protocols
//!
//! Application layer (OSI Layer 7) protocols built on the core network traits.
//! Each protocol works with any type implementing
//! [`Connection`](crate::network::Connection), so the same code runs over a
//! TCP socket, a modem's socket API, or an in-memory mock.
//!
//! ## Available Protocols
//!
//! - **[`mqtt`]**: MQTT 3.1.1 session client for long-lived publish-subscribe links
//!
//! ## Design Principles
//!
//! - **Connection Agnostic**: transports are injected through [`Connect`](crate::network::Connect)
//! - **Resource Conscious**: fixed-size buffers allocated once and reused
//! - **Error Handling**: errors are returned to the immediate caller, never panicked

/// MQTT client implementation.
///
/// Provides an MQTT 3.1.1 session client, its wire codec, protocol events and
/// the inbound payload acquirer.
pub mod mqtt;
