/// Wire messages exchanged with the presence server
use serde::{Deserialize, Serialize};

use crate::{LockingError, PresenceSnapshot, Result, SessionIdentity};

/// Server → client: the room's lock list, addressed to one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMessage {
    pub people_here: PresenceSnapshot,
    pub current_user: SessionIdentity,
}

impl PresenceMessage {
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LockingError::Serialization(e.to_string()))
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| LockingError::Serialization(e.to_string()))
    }
}

/// Client → server control messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    ForceUnlock,
    FormDirtyTrue,
    FormDirtyFalse,
}

impl ClientMessage {
    pub fn form_dirty(dirty: bool) -> Self {
        if dirty {
            ClientMessage::FormDirtyTrue
        } else {
            ClientMessage::FormDirtyFalse
        }
    }

    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LockingError::Serialization(e.to_string()))
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| LockingError::Serialization(e.to_string()))
    }
}
