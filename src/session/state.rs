//! The `connected` flag.
//!
//! Written by the dispatcher when CONNACK or a disconnect arrives, read by the
//! producer before each publish. Every access takes the lock; the flag is
//! never derived from whether a socket happens to be open.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cloneable handle on the shared connection flag.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    connected: Arc<Mutex<bool>>,
}

impl ConnectionState {
    /// A new flag, initially disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // A bool cannot be left half-written; a poisoned lock is still valid.
        self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value of the flag.
    pub fn is_connected(&self) -> bool {
        *self.lock()
    }

    /// Set the flag, returning the previous value.
    pub fn set_connected(&self, connected: bool) -> bool {
        core::mem::replace(&mut *self.lock(), connected)
    }

    /// Run `f` with the flag while holding the lock.
    ///
    /// No writer can change the flag until `f` returns.
    pub fn with_connected<R>(&self, f: impl FnOnce(bool) -> R) -> R {
        let guard = self.lock();
        f(*guard)
    }
}
