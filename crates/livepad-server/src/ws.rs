//! WebSocket transport.
//!
//! One task per socket reads frames in order and hands each decoded command
//! to the room authority. A second task drains the connection's event queue
//! into the socket, so a slow reader never holds up the room.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info};

use livepad_shared::constants::EVENT_CHANNEL_CAPACITY;
use livepad_shared::protocol::{ClientCommand, ServerEvent};

use crate::api::AppState;
use crate::authority::RoomAuthority;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let authority = Arc::clone(&state.authority);
    ws.on_upgrade(move |socket| serve_socket(socket, authority))
}

async fn serve_socket(socket: WebSocket, authority: Arc<RoomAuthority>) {
    let registry = Arc::clone(authority.registry());
    let (conn, mut events) = registry.connect(EVENT_CHANNEL_CAPACITY).await;
    let (mut sink, mut stream) = socket.split();
    let connections = registry.connection_count().await;
    info!(conn = %conn, connections, "Socket connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!(conn = %conn, event = event.name(), error = %e, "Could not encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                authority
                    .fanout()
                    .send(conn, ServerEvent::error("Binary frames are not supported"))
                    .await;
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = %conn, error = %e, "Socket read failed");
                break;
            }
        };

        let command = match ClientCommand::from_json(&text) {
            Ok(command) => command,
            Err(e) => {
                debug!(conn = %conn, error = %e, "Malformed frame");
                authority
                    .fanout()
                    .send(conn, ServerEvent::error(format!("Malformed message: {e}")))
                    .await;
                continue;
            }
        };
        debug!(conn = %conn, command = command.name(), "Command received");

        // Own task: a write that has started finishes even if this socket
        // goes away. Awaiting it keeps this connection's commands in order.
        let authority = Arc::clone(&authority);
        if let Err(e) = tokio::spawn(async move { authority.handle(conn, command).await }).await {
            error!(conn = %conn, error = %e, "Command task failed");
        }
    }

    registry.disconnect(conn).await;
    writer.abort();
    info!(conn = %conn, "Socket closed");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    use crate::api::tests::spawn_server;
    use crate::authority::tests::room;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    // Compiles only while the per-socket future stays spawnable.
    #[test]
    fn socket_future_is_send() {
        fn spawnable(
            socket: super::WebSocket,
            authority: super::Arc<super::RoomAuthority>,
        ) -> impl std::future::Future<Output = ()> + Send {
            super::serve_socket(socket, authority)
        }
        let _ = spawnable;
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        client
    }

    async fn send(client: &mut Client, frame: Value) {
        client.send(WsMessage::text(frame.to_string())).await.unwrap();
    }

    async fn recv(client: &mut Client) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for event")
                .unwrap()
                .unwrap();
            if frame.is_text() {
                return serde_json::from_str(frame.to_text().unwrap()).unwrap();
            }
        }
    }

    async fn authenticate(client: &mut Client, room_id: &str) {
        send(
            client,
            json!({
                "event": "authenticate-room",
                "data": { "roomId": room_id, "passwordHash": "shared" }
            }),
        )
        .await;
        assert_eq!(recv(client).await["event"], "authentication-success");
        assert_eq!(recv(client).await["event"], "room-data");
    }

    #[tokio::test]
    async fn two_clients_share_a_room_until_it_is_deleted() {
        let (addr, authority, _dir) = spawn_server().await;
        let room_id = room(4);

        let mut one = connect(addr).await;
        let mut two = connect(addr).await;
        authenticate(&mut one, room_id.as_str()).await;
        authenticate(&mut two, room_id.as_str()).await;

        send(
            &mut one,
            json!({
                "event": "add-note",
                "data": { "roomId": room_id.as_str(), "note": { "id": "n1", "content": "c1" } }
            }),
        )
        .await;
        let added = recv(&mut two).await;
        assert_eq!(added["event"], "note-added");
        assert_eq!(added["data"]["id"], "n1");
        assert_eq!(recv(&mut one).await["event"], "note-added");

        send(
            &mut one,
            json!({ "event": "delete-room", "data": { "roomId": room_id.as_str() } }),
        )
        .await;
        assert_eq!(recv(&mut one).await["event"], "room-deleted");
        assert_eq!(recv(&mut two).await["event"], "room-deleted");

        assert!(authority.store().get(&room_id).await.is_err());
    }

    #[tokio::test]
    async fn malformed_frames_get_an_error_event() {
        let (addr, _authority, _dir) = spawn_server().await;
        let mut client = connect(addr).await;

        client.send(WsMessage::text("{not json".to_string())).await.unwrap();
        assert_eq!(recv(&mut client).await["event"], "error");

        send(&mut client, json!({ "event": "test-connection" })).await;
        let status = recv(&mut client).await;
        assert_eq!(status["event"], "connection-status");
        assert_eq!(status["data"]["storage"], "connected");
    }

    #[tokio::test]
    async fn closed_socket_leaves_the_room() {
        let (addr, authority, _dir) = spawn_server().await;
        let room_id = room(5);

        let mut client = connect(addr).await;
        authenticate(&mut client, room_id.as_str()).await;
        assert_eq!(authority.registry().member_count(&room_id).await, 1);

        client.close(None).await.unwrap();
        for _ in 0..50 {
            if authority.registry().member_count(&room_id).await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(authority.registry().member_count(&room_id).await, 0);
        // the room itself outlives its last member
        assert!(authority.store().get(&room_id).await.is_ok());
    }
}
