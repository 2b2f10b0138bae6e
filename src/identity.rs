//! Client identifier derivation.
//!
//! A device is identified to the broker as `<prefix>-<identity>`, where the
//! identity is the first 15 characters of a hardware serial (an IMEI on
//! cellular modules). A configured id replaces the derived one.

use std::path::Path;

use heapless::String;
use tracing::{error, info};

use crate::network::application::mqtt::client::MAX_CLIENT_ID_LEN;

/// Characters of the device identity kept in the client id.
pub const IDENTITY_LEN: usize = 15;

/// Identity source used when none is configured.
pub const DEFAULT_DEVICE_ID_PATH: &str = "/etc/machine-id";

/// Read a device identity from the first line of `path`.
pub fn read_device_identity(path: &Path) -> std::io::Result<std::string::String> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().next().unwrap_or_default().trim().to_string())
}

/// Pick the client id for this session.
///
/// A non-empty `configured` id wins. Otherwise the id is built from `prefix`
/// and `identity`. When the identity is unavailable the failure is logged and
/// an empty id is returned, which the broker accepts for a clean session.
pub fn derive_client_id<E: core::fmt::Display>(
    configured: Option<&str>,
    prefix: &str,
    identity: Result<std::string::String, E>,
) -> String<MAX_CLIENT_ID_LEN> {
    if let Some(id) = configured.filter(|id| !id.is_empty()) {
        if let Ok(id) = String::try_from(id) {
            info!(client_id = %id, "Using configured client id");
            return id;
        }
        error!(len = id.len(), "Configured client id is too long, deriving one");
    }

    let identity = match identity {
        Ok(identity) if !identity.is_empty() => identity,
        Ok(_) => {
            error!("Device identity is empty");
            return String::new();
        }
        Err(e) => {
            error!(error = %e, "Failed to obtain device identity");
            return String::new();
        }
    };

    let mut id = String::new();
    let short: std::string::String = identity.chars().take(IDENTITY_LEN).collect();
    for part in [prefix, "-", short.as_str()] {
        if id.push_str(part).is_err() {
            error!(prefix, "Derived client id does not fit");
            return String::new();
        }
    }
    info!(client_id = %id, "Derived client id");
    id
}
