use content_locking::{ClientMessage, PresenceMessage, PresenceSnapshot, SessionIdentity};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};
use uuid::Uuid;

pub type Tx = mpsc::UnboundedSender<Message>;
pub type RoomMap = Arc<RwLock<HashMap<String, Room>>>;

/// One socket connection; a user with two tabs has two
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

struct Peer {
    identity: SessionIdentity,
    tx: Tx,
}

/// Everyone who has one document open, plus its lock list
pub struct Room {
    name: String,
    created_at: chrono::DateTime<chrono::Utc>,
    lock: PresenceSnapshot,
    peers: HashMap<ConnId, Peer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub connections: usize,
    pub owner: Option<SessionIdentity>,
    pub is_dirty: bool,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: chrono::Utc::now(),
            lock: PresenceSnapshot::default(),
            peers: HashMap::new(),
        }
    }

    pub fn lock(&self) -> &PresenceSnapshot {
        &self.lock
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Append to the lock list; the first one in owns the document
    pub fn join(&mut self, conn: ConnId, identity: SessionIdentity, tx: Tx) {
        if self.lock.owner.is_none() {
            self.lock.owner = Some(identity.clone());
        }
        self.lock.present.push(identity.clone());
        self.peers.insert(conn, Peer { identity, tx });
    }

    /// Drop one tab. Ownership passes on only when the owner has no tab left.
    pub fn leave(&mut self, conn: ConnId) -> Option<SessionIdentity> {
        let peer = self.peers.remove(&conn)?;
        let identity = peer.identity;

        if let Some(pos) = self.lock.present.iter().position(|p| *p == identity) {
            self.lock.present.remove(pos);
        }
        if self.lock.owner.as_ref() == Some(&identity) && !self.lock.present.contains(&identity) {
            self.lock.owner = self.lock.present.first().cloned();
            info!("Room {}: ownership passed to {:?}", self.name, self.lock.owner);
        }
        if self.lock.owner.is_none() {
            self.lock.remote_dirty = false;
        }
        Some(identity)
    }

    /// Apply a control message from `conn`. Returns whether the lock list changed.
    pub fn apply(&mut self, conn: ConnId, message: ClientMessage) -> bool {
        let Some(identity) = self.peers.get(&conn).map(|p| p.identity.clone()) else {
            return false;
        };

        match message {
            ClientMessage::ForceUnlock => {
                info!("Room {}: {} takes ownership", self.name, identity);
                self.lock.owner = Some(identity);
                self.lock.remote_dirty = false;
                true
            }
            ClientMessage::FormDirtyTrue | ClientMessage::FormDirtyFalse => {
                if self.lock.owner.as_ref() != Some(&identity) {
                    debug!("Room {}: ignoring dirty flag from non-owner {}", self.name, identity);
                    return false;
                }
                let dirty = message == ClientMessage::FormDirtyTrue;
                let changed = self.lock.remote_dirty != dirty;
                self.lock.remote_dirty = dirty;
                changed
            }
        }
    }

    /// Send the lock list to every connection, each addressed to its own identity
    pub fn broadcast(&self) {
        for (conn, peer) in &self.peers {
            let msg = PresenceMessage {
                people_here: self.lock.clone(),
                current_user: peer.identity.clone(),
            };
            let json = match msg.encode() {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize presence: {}", e);
                    return;
                }
            };

            if let Err(e) = peer.tx.send(Message::Text(json)) {
                error!("Failed to send to connection {}: {}", conn.0, e);
            }
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            name: self.name.clone(),
            created_at: self.created_at,
            connections: self.peers.len(),
            owner: self.lock.owner.clone(),
            is_dirty: self.lock.remote_dirty,
        }
    }
}

/// Room key for a socket path `/admin/ws/content_editing/<document>/`
pub fn room_name(path: &str) -> Option<String> {
    let rest = path
        .strip_prefix(content_locking::SOCKET_PREFIX)?
        .strip_prefix('/')?;
    let (document, _) = rest.rsplit_once('/')?;
    Some(slugify(document))
}

/// Lower-case, keep word characters and hyphens, collapse whitespace/hyphen runs
pub fn slugify(value: &str) -> String {
    let kept: String = value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();

    let mut slug = String::with_capacity(kept.len());
    let mut in_run = false;
    for c in kept.trim().chars() {
        if c == '-' || c.is_whitespace() {
            if !in_run {
                slug.push('-');
            }
            in_run = true;
        } else {
            slug.push(c);
            in_run = false;
        }
    }
    slug.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// `user` parameter of the socket query string
pub fn query_identity(query: &str) -> Option<SessionIdentity> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "user")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
        .map(SessionIdentity::from)
}
