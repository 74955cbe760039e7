use content_locking::{ClientMessage, SessionIdentity};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;

use crate::room::{query_identity, room_name, ConnId, Room, RoomMap};

pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, rooms: RoomMap) {
    if let Err(e) = serve(stream, addr, rooms).await {
        error!("Connection {} failed: {}", addr, e);
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

async fn serve(stream: TcpStream, addr: SocketAddr, rooms: RoomMap) -> anyhow::Result<()> {
    let mut route: Option<(String, SessionIdentity)> = None;
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let Some(room) = room_name(req.uri().path()) else {
            return Err(reject(StatusCode::NOT_FOUND, "unknown route"));
        };
        let Some(identity) = req.uri().query().and_then(query_identity) else {
            return Err(reject(StatusCode::UNAUTHORIZED, "missing user"));
        };
        route = Some((room, identity));
        Ok(response)
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let (room_key, identity) =
        route.ok_or_else(|| anyhow::anyhow!("handshake completed without a route"))?;
    let conn = ConnId::new();
    info!("{} joined room {} from {}", identity, room_key, addr);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_tx.send(msg).await {
                debug!("Failed to send message: {}", e);
                break;
            }
        }
    });

    {
        let mut rooms_lock = rooms.write().await;
        let room = rooms_lock.entry(room_key.clone()).or_insert_with(|| {
            info!("Creating room {}", room_key);
            Room::new(room_key.clone())
        });
        room.join(conn, identity.clone(), tx);
        room.broadcast();
    }

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                error!("Error receiving message: {}", e);
                break;
            }
        };

        match msg {
            Message::Text(text) => match ClientMessage::decode(&text) {
                Ok(message) => {
                    debug!("{} sent {:?}", identity, message);
                    let mut rooms_lock = rooms.write().await;
                    if let Some(room) = rooms_lock.get_mut(&room_key) {
                        if room.apply(conn, message) {
                            room.broadcast();
                            if let Ok(json) = serde_json::to_string(&room.summary()) {
                                debug!("Room state: {}", json);
                            }
                        }
                    }
                }
                Err(e) => warn!("Ignoring malformed message from {}: {}", identity, e),
            },
            Message::Close(_) => {
                info!("{} closed the connection", identity);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    {
        let mut rooms_lock = rooms.write().await;
        if let Some(room) = rooms_lock.get_mut(&room_key) {
            room.leave(conn);
            if room.is_empty() {
                info!("Room {} is empty, removing", room_key);
                rooms_lock.remove(&room_key);
            } else {
                debug!("Room {} owner is now {:?}", room_key, room.lock().owner);
                room.broadcast();
            }
        }
    }

    send_task.abort();
    info!("{} left room {}", identity, room_key);
    Ok(())
}
