//! The periodic status publisher.
//!
//! Every period the producer checks the shared flag and, if the session is
//! up, publishes the status payload at QoS 1. The flag lock is held across the
//! publish call, so the supervisor cannot mark the session down halfway
//! through a send.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::state::ConnectionState;
use super::{Delay, ThreadDelay};
use crate::network::Connect;
use crate::network::application::mqtt::{Client, QoS};
use crate::network::error::Error;

/// Something that can put a message on the wire.
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`, returning the packet identifier used.
    fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> Result<u16, Error>;
}

impl<N> Publisher for Client<N>
where
    N: Connect + Send,
    N::Connection: Send,
{
    fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> Result<u16, Error> {
        Client::publish(self, topic, qos, payload)
    }
}

/// Publishes a fixed status message on a fixed period.
pub struct Producer<P: Publisher, D: Delay = ThreadDelay> {
    publisher: Arc<P>,
    state: ConnectionState,
    topic: String,
    payload: Vec<u8>,
    period: Duration,
    delay: D,
}

impl<P: Publisher, D: Delay> core::fmt::Debug for Producer<P, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Producer")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("period", &self.period)
            .finish()
    }
}

impl<P: Publisher, D: Delay> Producer<P, D> {
    /// Create a producer. Nothing is published until [`Producer::cycle`] or
    /// [`Producer::run`].
    pub fn new(
        publisher: Arc<P>,
        state: ConnectionState,
        topic: &str,
        payload: &[u8],
        period: Duration,
        delay: D,
    ) -> Self {
        Self {
            publisher,
            state,
            topic: topic.to_string(),
            payload: payload.to_vec(),
            period,
            delay,
        }
    }

    /// Sleep one period, then tick.
    pub fn cycle(&mut self) -> Option<Result<u16, Error>> {
        self.delay.sleep(self.period);
        self.tick()
    }

    /// Publish once if connected.
    ///
    /// Returns `None` when the session is down and nothing was attempted.
    pub fn tick(&self) -> Option<Result<u16, Error>> {
        self.state.with_connected(|connected| {
            if !connected {
                debug!(topic = %self.topic, "Not connected, skipping publish");
                return None;
            }
            let result = self
                .publisher
                .publish(&self.topic, QoS::AtLeastOnce, &self.payload);
            if let Err(e) = &result {
                error!(topic = %self.topic, error = %e, "Publish failed");
            }
            Some(result)
        })
    }

    /// Publish forever, one tick per period.
    pub fn run(mut self) -> ! {
        info!(
            topic = %self.topic,
            period_secs = self.period.as_secs(),
            "Status producer started"
        );
        loop {
            let _ = self.cycle();
        }
    }
}
