//! Session supervision: keeping one broker session alive for the life of the
//! process.
//!
//! - [`state`]: the `connected` flag shared between threads
//! - [`dispatcher`]: reacts to protocol events on the I/O thread
//! - [`supervisor`]: the reconnect/keepalive control loop
//! - [`producer`]: the periodic status publisher
//!
//! The supervisor and the producer each own a thread. They share the session
//! client (through an `Arc`) and the connection flag, and nothing else.

use std::time::Duration;

/// Shared connection flag.
pub mod state;

/// Protocol event handling.
pub mod dispatcher;

/// Reconnect supervisor.
pub mod supervisor;

/// Periodic status producer.
pub mod producer;

pub use dispatcher::{Dispatcher, MessageSink};
pub use producer::{Producer, Publisher};
pub use state::ConnectionState;
pub use supervisor::{Phase, Supervisor};

/// Puts the calling thread to sleep.
///
/// The control loops sleep only through this trait, so a test can record or
/// skip the waits.
pub trait Delay {
    /// Sleep for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// [`Delay`] backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
