/// WebSocket channel to the presence server
/// The only place that performs network I/O
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::{ClientMessage, LockingError, PresenceMessage, Result, SessionEvent};

/// Path prefix of the presence socket; the document path is appended
pub const SOCKET_PREFIX: &str = "/admin/ws/content_editing";

/// Where the presence socket for one document lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Host and optional port, without scheme
    pub host: String,

    /// The page was served over https, so the socket uses wss
    pub secure: bool,

    /// Logical path of the document being edited, e.g. `/admin/pages/12/edit/`
    pub document_path: String,

    /// Passed as the `user` query parameter. Servers with their own
    /// authentication ignore it.
    pub identity_hint: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:8080".to_string(),
            secure: false,
            document_path: "/".to_string(),
            identity_hint: None,
        }
    }
}

impl ChannelConfig {
    pub fn new(host: impl Into<String>, document_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            document_path: document_path.into(),
            ..Self::default()
        }
    }

    pub fn with_identity_hint(mut self, identity: impl Into<String>) -> Self {
        self.identity_hint = Some(identity.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() || self.host.contains("://") || self.host.contains('/') {
            return Err(LockingError::InvalidConfig(format!(
                "host must be a bare host[:port], got '{}'",
                self.host
            )));
        }
        if !self.document_path.starts_with('/') {
            return Err(LockingError::InvalidConfig(format!(
                "document path must start with '/', got '{}'",
                self.document_path
            )));
        }
        if let Some(identity) = &self.identity_hint {
            let url_safe = |c: char| c.is_ascii_alphanumeric() || "-_.~@".contains(c);
            if identity.is_empty() || !identity.chars().all(url_safe) {
                return Err(LockingError::InvalidConfig(format!(
                    "identity hint '{}' is not URL safe",
                    identity
                )));
            }
        }
        Ok(())
    }

    /// Socket URL; the scheme mirrors the page transport
    pub fn endpoint(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = format!("{}://{}{}{}", scheme, self.host, SOCKET_PREFIX, self.document_path);
        if !url.ends_with('/') {
            url.push('/');
        }
        if let Some(identity) = &self.identity_hint {
            url.push_str("?user=");
            url.push_str(identity);
        }
        url
    }
}

/// Handle to the open presence socket
///
/// Inbound snapshots are pushed into the session's event queue; outbound
/// control messages are queued with [`send`](Self::send).
pub struct ChannelAdapter {
    tx: mpsc::UnboundedSender<ClientMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ChannelAdapter {
    pub async fn connect(
        config: &ChannelConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        config.validate()?;
        let url = config.endpoint();

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| LockingError::Network(e.to_string()))?;
        info!("Presence channel connected: {}", url);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let json = match message.encode() {
                    Ok(j) => j,
                    Err(e) => {
                        error!("Failed to serialize {:?}: {}", message, e);
                        continue;
                    }
                };
                debug!("Sending {}", json);
                if let Err(e) = ws_tx.send(Message::Text(json)).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match PresenceMessage::decode(&text) {
                        Ok(msg) => {
                            if events.send(SessionEvent::Presence(msg)).is_err() {
                                debug!("Session gone, stopping reader");
                                return;
                            }
                        }
                        Err(e) => warn!("Discarding malformed presence message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Server closed the presence channel");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Presence channel error: {}", e);
                        break;
                    }
                }
            }
            let _ = events.send(SessionEvent::ConnectionLost);
        });

        Ok(Self { tx, reader, writer })
    }

    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|e| LockingError::Network(e.to_string()))
    }

    /// Flush queued messages, close the socket and stop both tasks
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.writer.await;
        self.reader.abort();
    }
}
