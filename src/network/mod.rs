//! A network abstraction layer for long-lived device sessions
//!
//! This module provides the small set of traits the session layer is written
//! against. A transport only has to move bytes, close itself, and report
//! readiness; everything protocol-specific lives in [`application`].
//!

#![allow(missing_docs)]
#![deny(unsafe_code)]

use core::time::Duration;

use bitflags::bitflags;

/// Common error types for network operations
pub mod error;

/// Application protocols built on the core traits
pub mod application;

/// TCP transport over `std::net`
pub mod tcp;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, Poll, Read, Watch, Write};
}

// Core synchronous traits
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read data from the connection
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection + Watch;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}

bitflags! {
    /// Readiness conditions reported by [`Poll::poll`], modelled on poll(2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PollFlags: u8 {
        /// Data (or an orderly end of stream) is ready to be read.
        const IN = 1 << 0;
        /// The transport reported an error condition.
        const ERR = 1 << 1;
        /// The peer hung up.
        const HUP = 1 << 2;
        /// The handle no longer refers to an open transport.
        const NVAL = 1 << 3;
    }
}

/// Blocks until a handle becomes ready or a timeout elapses.
pub trait Poll {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Wait for any of `interest` (error conditions are always reported).
    ///
    /// `None` waits without a deadline. An empty set means the timeout elapsed.
    fn poll(
        &mut self,
        interest: PollFlags,
        timeout: Option<Duration>,
    ) -> Result<PollFlags, Self::Error>;
}

/// A connection that can hand out an independent readiness handle.
///
/// The handle refers to the same underlying socket, so waiting on it does not
/// require exclusive access to the connection itself.
pub trait Watch {
    /// Handle type used for readiness polling
    type Watcher: Poll + Send;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Create a readiness handle for this connection
    fn watcher(&self) -> Result<Self::Watcher, Self::Error>;
}

/// One poll entry: the handle, the events of interest, and the last result.
///
/// Rebuilt after every successful connect because the handle changes with
/// each new transport.
#[derive(Debug)]
pub struct PollDescriptor<P: Poll> {
    handle: P,
    /// Requested events
    pub events: PollFlags,
    /// Events returned by the last [`PollDescriptor::poll`]
    pub revents: PollFlags,
}

impl<P: Poll> PollDescriptor<P> {
    /// Create a descriptor watching `handle` for `events`.
    pub fn new(handle: P, events: PollFlags) -> Self {
        Self {
            handle,
            events,
            revents: PollFlags::empty(),
        }
    }

    /// Poll the handle and record the returned events in `revents`.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<PollFlags, P::Error> {
        self.revents = PollFlags::empty();
        self.revents = self.handle.poll(self.events, timeout)?;
        Ok(self.revents)
    }
}
