//! The reconnect/keepalive control loop.
//!
//! ```text
//!   Disconnected ──▶ Connecting ──connect() ok──▶ Connected
//!        ▲              │  ▲                          │
//!        │              └──┘ connect() failed         │ poll / live / input /
//!        │                   (sleep, retry)           │ POLLERR / POLLNVAL
//!        └──── disconnect(), 50 ms pause ◀────────────┘
//! ```
//!
//! There is no terminal state. A broker that never comes back means retrying
//! forever, one attempt per reconnect delay.
//!
//! `Connected` here only means a transport is up and CONNECT was sent. The
//! shared `connected` flag is raised later by the dispatcher, when CONNACK
//! arrives inside the service loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use super::dispatcher::Dispatcher;
use super::{Delay, ThreadDelay};
use crate::network::application::mqtt::Client;
use crate::network::error::Error;
use crate::network::{Connect, PollDescriptor, PollFlags, Watch};

/// Pause between tearing a session down and the next connect attempt.
pub const DISCONNECT_PAUSE: Duration = Duration::from_millis(50);

type Watcher<N> = <<N as Connect>::Connection as Watch>::Watcher;

/// Supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No transport; the next step starts a connect attempt.
    Disconnected,
    /// The last connect attempt failed; the next step retries.
    Connecting,
    /// Transport up, servicing it.
    Connected,
}

/// Keeps one broker session alive.
pub struct Supervisor<N: Connect, D: Delay = ThreadDelay> {
    client: Arc<Client<N>>,
    dispatcher: Dispatcher,
    delay: D,
    reconnect_delay: Duration,
    phase: Phase,
    attempts: u32,
    fds: Option<PollDescriptor<Watcher<N>>>,
}

impl<N: Connect, D: Delay> core::fmt::Debug for Supervisor<N, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Supervisor")
            .field("client", &self.client)
            .field("phase", &self.phase)
            .field("attempts", &self.attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

impl<N: Connect, D: Delay> Supervisor<N, D> {
    /// Create a supervisor; nothing happens until [`Supervisor::step`] or
    /// [`Supervisor::run`].
    pub fn new(
        client: Arc<Client<N>>,
        dispatcher: Dispatcher,
        reconnect_delay: Duration,
        delay: D,
    ) -> Self {
        Self {
            client,
            dispatcher,
            delay,
            reconnect_delay,
            phase: Phase::Disconnected,
            attempts: 0,
            fds: None,
        }
    }

    /// Current state.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Connect attempts made so far. Never reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The supervised client.
    pub fn client(&self) -> &Arc<Client<N>> {
        &self.client
    }

    /// Drive the session for the rest of the process lifetime.
    pub fn run(mut self) -> ! {
        info!(broker = %self.client.broker(), "MQTT supervisor started");
        loop {
            self.step();
        }
    }

    /// Perform one connect attempt or one service iteration.
    pub fn step(&mut self) {
        match self.phase {
            Phase::Disconnected | Phase::Connecting => self.try_connect(),
            Phase::Connected => {
                if let Err(reason) = self.service() {
                    self.teardown(reason);
                }
            }
        }
    }

    fn try_connect(&mut self) {
        self.phase = Phase::Connecting;
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > 1 {
            info!(
                delay_secs = self.reconnect_delay.as_secs(),
                "Reconnecting in {} seconds...",
                self.reconnect_delay.as_secs()
            );
            self.delay.sleep(self.reconnect_delay);
        }

        info!(attempt = self.attempts, "Connecting to broker");
        if let Err(e) = self.client.connect() {
            error!(attempt = self.attempts, error = %e, "Error in connect");
            return;
        }

        match self.client.poll_descriptor() {
            Ok(fds) => {
                self.fds = Some(fds);
                self.phase = Phase::Connected;
            }
            Err(e) => {
                error!(error = %e, "Could not set up polling for the new connection");
                if let Err(e) = self.client.disconnect(&mut self.dispatcher) {
                    error!(error = %e, "Could not disconnect MQTT client");
                }
            }
        }
    }

    /// One pass of poll, liveness, input and error checks.
    fn service(&mut self) -> Result<(), Error> {
        let fds = self.fds.as_mut().ok_or(Error::NotOpen)?;
        let revents = self.client.poll(fds).inspect_err(|e| {
            error!(error = %e, "Error in poll");
        })?;

        match self.client.live() {
            Ok(()) | Err(Error::WouldBlock) => {}
            Err(e) => {
                error!(error = %e, "Error in live");
                return Err(e);
            }
        }

        if revents.contains(PollFlags::IN) {
            self.client.input(&mut self.dispatcher).inspect_err(|e| {
                error!(error = %e, "Error in input");
            })?;
        }

        if revents.contains(PollFlags::ERR) {
            error!("POLLERR");
            return Err(Error::ReadError);
        }

        if revents.contains(PollFlags::NVAL) {
            error!("POLLNVAL");
            return Err(Error::NotOpen);
        }

        Ok(())
    }

    fn teardown(&mut self, reason: Error) {
        info!(reason = %reason, "Disconnecting MQTT client");
        self.fds = None;
        if let Err(e) = self.client.disconnect(&mut self.dispatcher) {
            error!(error = %e, "Could not disconnect MQTT client");
        }
        self.phase = Phase::Disconnected;
        self.delay.sleep(DISCONNECT_PAUSE);
    }
}
