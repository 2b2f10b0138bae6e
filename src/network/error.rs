//! Common error types for network operations

use thiserror::Error;

/// A common error type for network and session operations.
///
/// This enum defines a set of common errors that can occur when working with
/// a broker connection. It stays `Copy` so it can be carried inside events
/// and logged from any thread without allocation.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// An operation was attempted on a connection that is not open.
    #[error("connection is not open")]
    NotOpen,
    /// An error occurred during a write operation.
    #[error("write failed")]
    WriteError,
    /// An error occurred during a read operation.
    #[error("read failed")]
    ReadError,
    /// The broker refused the session, carrying the CONNACK return code.
    #[error("connection refused by broker (return code {0})")]
    ConnectionRefused(u8),
    /// A timeout occurred.
    #[error("operation timed out")]
    Timeout,
    /// The connection was closed.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// An invalid address was provided.
    #[error("invalid or unresolvable address")]
    InvalidAddress,
    /// A protocol-specific error occurred.
    #[error("protocol violation")]
    ProtocolError,
    /// A packet did not fit in the fixed transmit or receive buffer.
    #[error("packet does not fit in the buffer")]
    BufferTooSmall,
    /// Nothing to do yet; try again later.
    #[error("operation would block")]
    WouldBlock,
}
