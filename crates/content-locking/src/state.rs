/// Lock state machine
/// Derives the conflict banner shown to this session and owns the manual override slot
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ClientMessage, PresenceTracker, SessionIdentity};

/// Conflict state shown to the user. No conflict is represented by `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockUiState {
    /// Owner's state when an intruder opens the document
    OwnerConflict,

    /// Intruder's state when the document is already owned elsewhere
    IntruderConflict,

    /// Intruder asked to take over and the owner has no unsaved changes
    IntruderConflictConfirm,

    /// Intruder asked to take over and the owner has unsaved changes
    IntruderConflictConfirmDirty,

    /// Never derived; kept for a server-side "forced exit" signal
    OwnerConflictForcedExit,

    /// Owner has the document open in more than one tab
    OwnerMultipleTabs,

    /// Ownership moved away from this session without its action
    OwnerUsurped,
}

impl LockUiState {
    pub const ALL: [LockUiState; 7] = [
        LockUiState::OwnerConflict,
        LockUiState::IntruderConflict,
        LockUiState::IntruderConflictConfirm,
        LockUiState::IntruderConflictConfirmDirty,
        LockUiState::OwnerConflictForcedExit,
        LockUiState::OwnerMultipleTabs,
        LockUiState::OwnerUsurped,
    ];

    /// Banner text for the presentation layer
    pub fn message(&self) -> &'static str {
        match self {
            LockUiState::OwnerConflict => {
                "Someone else has opened this document. You still hold the lock."
            }
            LockUiState::IntruderConflict => {
                "This document is being edited by someone else and is read-only."
            }
            LockUiState::IntruderConflictConfirm => {
                "Take over editing? The current editor will be locked out."
            }
            LockUiState::IntruderConflictConfirmDirty => {
                "Take over editing? The current editor has unsaved changes that will be lost."
            }
            LockUiState::OwnerConflictForcedExit => {
                "You were forced out of this document."
            }
            LockUiState::OwnerMultipleTabs => {
                "You have this document open in more than one tab."
            }
            LockUiState::OwnerUsurped => {
                "Someone else took over this document. Your unsaved changes cannot be submitted."
            }
        }
    }
}

/// Derivation without the override: first matching rule wins
pub fn derive_state(presence: &PresenceTracker) -> Option<LockUiState> {
    let has_conflict = presence.has_conflict();
    let is_owner = presence.is_owner();

    if has_conflict && is_owner {
        Some(LockUiState::OwnerConflict)
    } else if presence.is_opened_in_multiple_tabs() {
        Some(LockUiState::OwnerMultipleTabs)
    } else if has_conflict {
        Some(LockUiState::IntruderConflict)
    } else {
        None
    }
}

/// Manual override slot layered over [`derive_state`], plus the last dirty
/// value announced to the server
#[derive(Debug, Clone, Default)]
pub struct LockStateMachine {
    manual_override: Option<LockUiState>,
    announced_dirty: bool,
}

impl LockStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manual_override(&self) -> Option<LockUiState> {
        self.manual_override
    }

    /// Current state: the override if set, otherwise the derived value
    pub fn current(&self, presence: &PresenceTracker) -> Option<LockUiState> {
        self.manual_override.or_else(|| derive_state(presence))
    }

    /// Intruder asks to take over; picks the dirty variant from the remote flag
    pub fn request_unlock(&mut self, presence: &PresenceTracker) {
        let next = if presence.remote_dirty() {
            LockUiState::IntruderConflictConfirmDirty
        } else {
            LockUiState::IntruderConflictConfirm
        };
        debug!(state = ?next, "unlock requested");
        self.manual_override = Some(next);
    }

    /// Clears the override and returns the takeover message to send
    pub fn confirm_force_unlock(&mut self) -> ClientMessage {
        debug!(previous = ?self.manual_override, "force unlock confirmed");
        self.manual_override = None;
        ClientMessage::ForceUnlock
    }

    pub fn cancel_unlock(&mut self) {
        self.manual_override = None;
    }

    /// React to the owner field changing value. Must run before the next
    /// [`current`](Self::current) for the same snapshot.
    pub fn on_owner_changed(
        &mut self,
        local: Option<&SessionIdentity>,
        previous_owner: Option<&SessionIdentity>,
        new_owner: Option<&SessionIdentity>,
    ) {
        self.manual_override = None;

        if local.is_some() && local == previous_owner && local != new_owner {
            debug!(?previous_owner, ?new_owner, "ownership taken away");
            self.manual_override = Some(LockUiState::OwnerUsurped);
        }
    }

    /// Announce local dirtiness only when it differs from what was last sent
    pub fn observe_local_dirty(&mut self, dirty: bool) -> Option<ClientMessage> {
        if dirty == self.announced_dirty {
            return None;
        }
        self.announced_dirty = dirty;
        Some(ClientMessage::form_dirty(dirty))
    }

    /// Ownership just arrived: the server's flag may be stale (it resets on
    /// takeover and ignores non-owners), so restate local dirtiness if it differs
    pub fn resync_dirty(&mut self, dirty: bool, remote_dirty: bool) -> Option<ClientMessage> {
        self.announced_dirty = dirty;
        if dirty == remote_dirty {
            return None;
        }
        debug!(dirty, remote_dirty, "restating dirtiness to the server");
        Some(ClientMessage::form_dirty(dirty))
    }
}
