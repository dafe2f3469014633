//! Tri-state serving health owned by a server's meta-services.
//!
//! State only moves forward: `NotServing -> Serving -> Shutdown`, or straight
//! from `NotServing` to `Shutdown` when a server is stopped before it started.
//! Once `Shutdown` is reached the instance never reports `Serving` again.
//!
//! Transitions go through a [`tokio::sync::watch`] channel, whose internal lock
//! makes each check-and-set atomic and lets probes subscribe to changes.

use core::fmt;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HealthState {
    #[default]
    NotServing,
    Serving,
    Shutdown,
}

impl HealthState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotServing => "NOT_SERVING",
            Self::Serving => "SERVING",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    pub const fn is_serving(self) -> bool {
        matches!(self, Self::Serving)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to a server's [`HealthState`].
#[derive(Clone, Debug)]
pub struct Health {
    tx: watch::Sender<HealthState>,
}

impl Health {
    /// Starts in [`HealthState::NotServing`].
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(HealthState::NotServing),
        }
    }

    pub fn state(&self) -> HealthState {
        *self.tx.borrow()
    }

    /// Moves `NotServing -> Serving`. Returns `false` if the state did not
    /// change, which includes every call after [`Health::shutdown`].
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|state| match state {
            HealthState::NotServing => {
                *state = HealthState::Serving;
                true
            }
            HealthState::Serving | HealthState::Shutdown => false,
        })
    }

    /// Moves to `Shutdown`. Returns `false` if it was already shut down.
    pub fn shutdown(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == HealthState::Shutdown {
                return false;
            }
            *state = HealthState::Shutdown;
            true
        })
    }

    /// Watches every subsequent transition.
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.tx.subscribe()
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new()
    }
}
