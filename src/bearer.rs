//! The network bearer underneath the broker session.
//!
//! On a cellular module the bearer is the modem's packet data link, which has
//! to be attached before any socket can be opened. Startup blocks in
//! [`Bearer::wait_ready`] once; after that the link is assumed to come and go
//! on its own, and the supervisor's reconnect loop absorbs any outage.

use thiserror::Error;
use tracing::info;

/// Bearer bring-up errors. Any of these aborts startup.
#[derive(Debug, Error)]
pub enum BearerError {
    #[error("bearer failed to initialise: {0}")]
    Init(String),
    #[error("bearer did not attach: {0}")]
    Attach(String),
}

/// A link that must be up before the first connect.
pub trait Bearer {
    /// Block until the link can carry traffic.
    fn wait_ready(&mut self) -> Result<(), BearerError>;
}

/// Host networking, managed by the operating system and already up.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostBearer;

impl Bearer for HostBearer {
    fn wait_ready(&mut self) -> Result<(), BearerError> {
        info!("Using host networking");
        Ok(())
    }
}
