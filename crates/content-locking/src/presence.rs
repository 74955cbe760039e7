/// Presence tracking for a locked document
/// Holds the latest server snapshot and answers who-is-where queries
use serde::{Deserialize, Serialize};

use crate::SessionIdentity;

/// Server-side view of who has the document open
///
/// Field names follow the wire format: `users_list`, `owner`, `is_dirty`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Sessions in connection order, one entry per open tab
    #[serde(rename = "users_list")]
    pub present: Vec<SessionIdentity>,

    /// Session currently allowed to edit
    pub owner: Option<SessionIdentity>,

    /// Whether the owner's copy has unsaved changes
    #[serde(rename = "is_dirty")]
    pub remote_dirty: bool,
}

impl PresenceSnapshot {
    pub fn new(present: Vec<SessionIdentity>, owner: Option<SessionIdentity>) -> Self {
        Self {
            present,
            owner,
            remote_dirty: false,
        }
    }

    pub fn with_remote_dirty(mut self, remote_dirty: bool) -> Self {
        self.remote_dirty = remote_dirty;
        self
    }
}

/// What changed when a snapshot replaced the previous one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDelta {
    pub previous_owner: Option<SessionIdentity>,
    pub owner_changed: bool,
    pub locked_changed: bool,
}

/// Latest presence snapshot plus the local identity it was addressed to
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    snapshot: PresenceSnapshot,
    local: Option<SessionIdentity>,
    received_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace snapshot and local identity in one step
    pub fn apply_snapshot(
        &mut self,
        snapshot: PresenceSnapshot,
        local: SessionIdentity,
    ) -> SnapshotDelta {
        let was_locked = self.locked();
        let previous = std::mem::replace(&mut self.snapshot, snapshot);
        let previous_owner = previous.owner;

        self.local = Some(local);
        self.received_at = Some(chrono::Utc::now());

        SnapshotDelta {
            owner_changed: previous_owner != self.snapshot.owner,
            previous_owner,
            locked_changed: was_locked != self.locked(),
        }
    }

    pub fn snapshot(&self) -> &PresenceSnapshot {
        &self.snapshot
    }

    pub fn local_identity(&self) -> Option<&SessionIdentity> {
        self.local.as_ref()
    }

    pub fn owner(&self) -> Option<&SessionIdentity> {
        self.snapshot.owner.as_ref()
    }

    pub fn remote_dirty(&self) -> bool {
        self.snapshot.remote_dirty
    }

    /// When the current snapshot arrived, `None` before the first one
    pub fn received_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.received_at
    }

    pub fn has_snapshot(&self) -> bool {
        self.received_at.is_some()
    }

    /// Other sessions present, local identity removed and duplicates folded
    /// (first occurrence keeps its position)
    pub fn conflict_set(&self) -> Vec<&SessionIdentity> {
        let mut others: Vec<&SessionIdentity> = Vec::new();
        for identity in &self.snapshot.present {
            if Some(identity) == self.local.as_ref() || others.contains(&identity) {
                continue;
            }
            others.push(identity);
        }
        others
    }

    pub fn has_conflict(&self) -> bool {
        !self.conflict_set().is_empty()
    }

    /// Requires a known local identity, so nothing is owned before the first snapshot
    pub fn is_owner(&self) -> bool {
        self.local.is_some() && self.snapshot.owner == self.local
    }

    pub fn is_opened_in_multiple_tabs(&self) -> bool {
        let Some(local) = self.local.as_ref() else {
            return false;
        };
        self.snapshot.present.iter().filter(|p| *p == local).count() > 1
    }

    /// Whether the edit surface must be read-only for this session
    pub fn locked(&self) -> bool {
        self.local != self.snapshot.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> SessionIdentity {
        SessionIdentity::from(name)
    }

    fn snapshot(present: &[&str], owner: Option<&str>) -> PresenceSnapshot {
        PresenceSnapshot::new(present.iter().map(|p| id(p)).collect(), owner.map(id))
    }

    #[test]
    fn test_defaults_before_first_snapshot() {
        let tracker = PresenceTracker::new();

        assert!(!tracker.has_snapshot());
        assert!(!tracker.has_conflict());
        assert!(!tracker.is_owner());
        assert!(!tracker.is_opened_in_multiple_tabs());
        assert!(!tracker.locked());
    }

    #[test]
    fn test_conflict_set_excludes_local_and_dedupes() {
        let mut tracker = PresenceTracker::new();
        tracker.apply_snapshot(snapshot(&["a", "b", "a", "c", "b"], Some("a")), id("a"));

        let conflicts = tracker.conflict_set();
        assert_eq!(conflicts, vec![&id("b"), &id("c")]);
        assert!(tracker.has_conflict());
    }

    #[test]
    fn test_alone_is_not_a_conflict() {
        let mut tracker = PresenceTracker::new();
        tracker.apply_snapshot(snapshot(&["a"], Some("a")), id("a"));

        assert!(tracker.conflict_set().is_empty());
        assert!(tracker.is_owner());
        assert!(!tracker.locked());
    }

    #[test]
    fn test_multiple_tabs() {
        let mut tracker = PresenceTracker::new();
        tracker.apply_snapshot(snapshot(&["a", "a"], Some("a")), id("a"));

        assert!(tracker.is_opened_in_multiple_tabs());
        assert!(!tracker.has_conflict());
    }

    #[test]
    fn test_intruder_is_locked() {
        let mut tracker = PresenceTracker::new();
        tracker.apply_snapshot(snapshot(&["a", "b"], Some("a")), id("b"));

        assert!(!tracker.is_owner());
        assert!(tracker.locked());
        assert_eq!(tracker.conflict_set(), vec![&id("a")]);
    }

    #[test]
    fn test_owner_missing_from_present_is_tolerated() {
        let mut tracker = PresenceTracker::new();
        tracker.apply_snapshot(snapshot(&["b"], Some("a")), id("b"));

        assert!(!tracker.has_conflict());
        assert!(!tracker.is_owner());
        assert!(tracker.locked());
    }

    #[test]
    fn test_snapshot_delta_reports_owner_and_lock_changes() {
        let mut tracker = PresenceTracker::new();

        let delta = tracker.apply_snapshot(snapshot(&["a"], Some("a")), id("a"));
        assert!(delta.owner_changed);
        assert_eq!(delta.previous_owner, None);
        assert!(!delta.locked_changed);

        let delta = tracker.apply_snapshot(snapshot(&["a", "b"], Some("a")), id("a"));
        assert!(!delta.owner_changed);

        let delta = tracker.apply_snapshot(snapshot(&["a", "b"], Some("b")), id("a"));
        assert!(delta.owner_changed);
        assert_eq!(delta.previous_owner, Some(id("a")));
        assert!(delta.locked_changed);
        assert!(tracker.locked());
    }

    #[test]
    fn test_snapshot_wire_names() {
        let json = r#"{"users_list":["a","b"],"owner":"a","is_dirty":true}"#;
        let parsed: PresenceSnapshot = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.present, vec![id("a"), id("b")]);
        assert_eq!(parsed.owner, Some(id("a")));
        assert!(parsed.remote_dirty);
    }
}
