/// Editing session: presence, dirtiness and lock state composed over one edit surface
///
/// Sans-IO. Every event is handled to completion before the next one and the
/// returned control messages are handed to the channel by the caller.
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    ClientMessage, DirtinessMonitor, EditSurface, LockStateMachine, LockUiState,
    PresenceMessage, PresenceTracker, Result, SessionIdentity,
};

/// State of the presence channel as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// No snapshot received yet
    Connecting,
    /// Snapshots are arriving
    Live,
    /// Channel closed; presence is unknown
    Lost,
}

/// Everything that can change the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Presence(PresenceMessage),
    ConnectionLost,
    FieldEdited { name: String, value: String },
    RequestUnlock,
    ConfirmForceUnlock,
    CancelUnlock,
}

/// Observable state for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub link: LinkStatus,
    pub state: Option<LockUiState>,
    pub locked: bool,
    pub owner: Option<SessionIdentity>,
    pub local: Option<SessionIdentity>,
    pub conflicts: Vec<SessionIdentity>,
    pub remote_dirty: bool,
    pub local_dirty: bool,
}

pub struct EditingSession<S: EditSurface> {
    presence: PresenceTracker,
    dirtiness: DirtinessMonitor,
    machine: LockStateMachine,
    surface: S,
    link: LinkStatus,
}

impl<S: EditSurface> EditingSession<S> {
    /// Capture the clean baseline of `surface` and start tracking it
    pub fn start(surface: S) -> Result<Self> {
        let mut dirtiness = DirtinessMonitor::new();
        dirtiness.capture_baseline(&surface)?;

        let mut session = Self {
            presence: PresenceTracker::new(),
            dirtiness,
            machine: LockStateMachine::new(),
            surface,
            link: LinkStatus::Connecting,
        };
        session.sync_surface();
        Ok(session)
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<ClientMessage> {
        match event {
            SessionEvent::Presence(msg) => self.on_presence(msg).into_iter().collect(),
            SessionEvent::ConnectionLost => {
                warn!("Presence channel lost, locking the edit surface");
                self.link = LinkStatus::Lost;
                self.sync_surface();
                Vec::new()
            }
            SessionEvent::FieldEdited { name, value } => {
                self.on_edit(&name, &value).into_iter().collect()
            }
            SessionEvent::RequestUnlock => {
                self.machine.request_unlock(&self.presence);
                Vec::new()
            }
            SessionEvent::ConfirmForceUnlock => vec![self.machine.confirm_force_unlock()],
            SessionEvent::CancelUnlock => {
                self.machine.cancel_unlock();
                Vec::new()
            }
        }
    }

    fn on_presence(&mut self, msg: PresenceMessage) -> Option<ClientMessage> {
        let was_live = self.link == LinkStatus::Live;
        self.link = LinkStatus::Live;
        let delta = self
            .presence
            .apply_snapshot(msg.people_here, msg.current_user);

        // Ownership reaction runs before anything reads the state again
        let mut announce = None;
        if delta.owner_changed {
            self.machine.on_owner_changed(
                self.presence.local_identity(),
                delta.previous_owner.as_ref(),
                self.presence.owner(),
            );
            if self.presence.is_owner() {
                announce = self
                    .machine
                    .resync_dirty(self.dirtiness.is_dirty(), self.presence.remote_dirty());
            }
        }

        if delta.locked_changed || !was_live {
            self.sync_surface();
        }
        announce
    }

    fn on_edit(&mut self, name: &str, value: &str) -> Option<ClientMessage> {
        if let Err(e) = self.surface.write_field(name, value) {
            warn!("Refused local edit: {}", e);
            return None;
        }
        match self.dirtiness.recompute(&self.surface) {
            Ok(dirty) => self.machine.observe_local_dirty(dirty),
            Err(e) => {
                warn!("Could not recompute dirtiness: {}", e);
                None
            }
        }
    }

    fn sync_surface(&mut self) {
        let enabled = !self.locked();
        if self.surface.is_enabled() != enabled {
            debug!(enabled, "toggling edit surface");
            self.surface.set_enabled(enabled);
        }
    }

    /// Read-only for non-owners and whenever the channel is lost
    pub fn locked(&self) -> bool {
        self.link == LinkStatus::Lost || self.presence.locked()
    }

    pub fn state(&self) -> Option<LockUiState> {
        self.machine.current(&self.presence)
    }

    pub fn link(&self) -> LinkStatus {
        self.link
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            link: self.link,
            state: self.state(),
            locked: self.locked(),
            owner: self.presence.owner().cloned(),
            local: self.presence.local_identity().cloned(),
            conflicts: self.presence.conflict_set().into_iter().cloned().collect(),
            remote_dirty: self.presence.remote_dirty(),
            local_dirty: self.dirtiness.is_dirty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FormSurface, PresenceSnapshot};

    fn presence(present: &[&str], owner: Option<&str>, dirty: bool, me: &str) -> SessionEvent {
        SessionEvent::Presence(PresenceMessage {
            people_here: PresenceSnapshot::new(
                present.iter().map(|p| SessionIdentity::from(*p)).collect(),
                owner.map(SessionIdentity::from),
            )
            .with_remote_dirty(dirty),
            current_user: SessionIdentity::from(me),
        })
    }

    fn edit(name: &str, value: &str) -> SessionEvent {
        SessionEvent::FieldEdited {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn session() -> EditingSession<FormSurface> {
        EditingSession::start(FormSurface::new().with_field("title", "Draft")).unwrap()
    }

    #[test]
    fn test_connecting_is_distinct_from_no_conflict() {
        let session = session();
        let view = session.view();

        assert_eq!(view.link, LinkStatus::Connecting);
        assert_eq!(view.state, None);
        assert!(session.surface().is_enabled());
    }

    #[test]
    fn test_intruder_surface_disabled_on_first_snapshot() {
        let mut session = session();
        session.handle(presence(&["a", "b"], Some("a"), false, "b"));

        assert!(session.locked());
        assert!(!session.surface().is_enabled());
        assert_eq!(session.state(), Some(LockUiState::IntruderConflict));

        // Edits are refused and nothing is announced
        assert!(session.handle(edit("title", "Mine")).is_empty());
        assert_eq!(session.surface().field("title"), Some("Draft"));
    }

    #[test]
    fn test_dirty_announcements_per_transition() {
        let mut session = session();
        session.handle(presence(&["a"], Some("a"), false, "a"));

        let mut sent = Vec::new();
        for value in ["Draft", "Draft 2", "Draft 23", "Draft"] {
            sent.extend(session.handle(edit("title", value)));
        }

        assert_eq!(
            sent,
            vec![ClientMessage::FormDirtyTrue, ClientMessage::FormDirtyFalse]
        );
    }

    #[test]
    fn test_usurped_owner_loses_confirm_dialog_and_surface() {
        let mut session = session();
        session.handle(presence(&["a", "b"], Some("a"), false, "a"));
        session.handle(SessionEvent::RequestUnlock);

        session.handle(presence(&["a", "b"], Some("b"), false, "a"));

        assert_eq!(session.state(), Some(LockUiState::OwnerUsurped));
        assert!(!session.surface().is_enabled());
    }

    #[test]
    fn test_regained_ownership_restates_unsaved_changes() {
        let mut session = session();
        session.handle(presence(&["a"], Some("a"), false, "a"));
        assert_eq!(
            session.handle(edit("title", "Draft 2")),
            vec![ClientMessage::FormDirtyTrue]
        );

        // Taken over: the server drops the flag with the lock
        session.handle(presence(&["a", "b"], Some("b"), false, "a"));
        assert_eq!(session.state(), Some(LockUiState::OwnerUsurped));

        // Lock comes back while the form is still dirty
        let sent = session.handle(presence(&["a"], Some("a"), false, "a"));
        assert_eq!(sent, vec![ClientMessage::FormDirtyTrue]);
        assert!(session.surface().is_enabled());

        // Server already agrees: nothing more to say
        assert!(session.handle(presence(&["a"], Some("a"), true, "a")).is_empty());
    }

    #[test]
    fn test_edit_before_first_snapshot_reaches_server_with_ownership() {
        let mut session = session();
        assert_eq!(
            session.handle(edit("title", "Early")),
            vec![ClientMessage::FormDirtyTrue]
        );

        let sent = session.handle(presence(&["a"], Some("a"), false, "a"));
        assert_eq!(sent, vec![ClientMessage::FormDirtyTrue]);
    }

    #[test]
    fn test_connection_loss_locks_surface() {
        let mut session = session();
        session.handle(presence(&["a"], Some("a"), false, "a"));
        assert!(session.surface().is_enabled());

        session.handle(SessionEvent::ConnectionLost);

        let view = session.view();
        assert_eq!(view.link, LinkStatus::Lost);
        assert!(view.locked);
        assert!(!session.surface().is_enabled());
    }

    #[test]
    fn test_force_unlock_is_sent_and_override_cleared() {
        let mut session = session();
        session.handle(presence(&["a", "b"], Some("a"), true, "b"));
        session.handle(SessionEvent::RequestUnlock);
        assert_eq!(session.state(), Some(LockUiState::IntruderConflictConfirmDirty));

        let sent = session.handle(SessionEvent::ConfirmForceUnlock);
        assert_eq!(sent, vec![ClientMessage::ForceUnlock]);
        assert_eq!(session.state(), Some(LockUiState::IntruderConflict));

        // Server grants ownership
        session.handle(presence(&["a", "b"], Some("b"), false, "b"));
        assert_eq!(session.state(), Some(LockUiState::OwnerConflict));
        assert!(session.surface().is_enabled());
    }
}
