/// Content locking for shared documents
/// Presence-driven owner/intruder arbitration over a WebSocket channel
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod presence;
pub use presence::*;

mod dirtiness;
pub use dirtiness::*;

mod state;
pub use state::*;

mod protocol;
pub use protocol::*;

mod channel;
pub use channel::*;

mod session;
pub use session::*;

mod client;
pub use client::*;

#[derive(Debug, Error)]
pub enum LockingError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("edit surface is locked: {0}")]
    SurfaceLocked(String),

    #[error("baseline error: {0}")]
    Baseline(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, LockingError>;

/// Identity of a connected session as reported by the server.
///
/// Only equality matters; the same user shows up once per open tab.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIdentity(pub String);

impl SessionIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionIdentity {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for SessionIdentity {
    fn from(name: String) -> Self {
        Self(name)
    }
}
