use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::ConnectionRegistry;
use crate::auth::jwt::authenticate;
use crate::delivery::model::NotificationMessage;
use crate::notification::service::NotificationService;

/// Messages buffered per socket before new ones are dropped.
const SOCKET_BUFFER: usize = 64;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Query parameters for WebSocket connections
#[derive(Debug, Deserialize)]
pub struct WebSocketParams {
    token: Option<String>,
}

pub struct SocketState {
    pub registry: Arc<ConnectionRegistry>,
    pub notifications: Arc<NotificationService>,
}

fn error_frame(message: &str) -> String {
    json!({ "type": "error", "error": message }).to_string()
}

fn unread_frame(count: i64) -> String {
    json!({ "type": "unread_count", "unread_count": count }).to_string()
}

/// Handle an invalid socket connection (authentication failure)
async fn handle_invalid_socket(mut socket: WebSocket, error_message: String) {
    if let Err(e) = socket.send(Message::Text(error_frame(&error_message))).await {
        error!("Error sending error message on WS: {}", e);
    }
    let _ = socket.close().await;
}

async fn handle_valid_connection(socket: WebSocket, user_id: Uuid, state: Arc<SocketState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // The registry keeps a weak handle; this task owns the only strong sender.
    let (tx, mut rx) = mpsc::channel::<NotificationMessage>(SOCKET_BUFFER);
    let connection_id = state.registry.register(user_id, &tx);
    debug!(
        "User {} has {} live sockets",
        user_id,
        state.registry.connections_of(user_id)
    );

    match state.notifications.unread_count(user_id).await {
        Ok(count) => {
            if ws_sender.send(Message::Text(unread_frame(count))).await.is_err() {
                state.registry.unregister(user_id, connection_id);
                return;
            }
        }
        Err(e) => warn!("Could not load unread count for {}: {}", user_id, e),
    }

    let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            Some(message) = rx.recv() => {
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to serialize notification {}: {}", message.notification_id, e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Text(payload)).await {
                    debug!("Forwarding to {} failed: {}", connection_id, e);
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if ws_sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket closed by client");
                    break;
                }
                Some(Ok(Message::Pong(_))) => debug!("Received pong from {}", connection_id),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            },
        }
    }

    drop(tx);
    state.registry.unregister(user_id, connection_id);
    info!("WebSocket connection {} closed for user: {}", connection_id, user_id);
}

/// Upgrades `GET /api/notifications/ws?token=<JWT>`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WebSocketParams>,
    State(state): State<Arc<SocketState>>,
) -> impl IntoResponse {
    let token = params.token.unwrap_or_default();

    let user_id = match authenticate(&token) {
        Ok((user_id, _)) => user_id,
        Err(e) => {
            let error_message = format!("Invalid token: {}", e);
            return ws.on_upgrade(move |socket| async move {
                handle_invalid_socket(socket, error_message).await;
            });
        }
    };

    info!("User {} connected to notifications WebSocket", user_id);
    ws.on_upgrade(move |socket| async move {
        handle_valid_connection(socket, user_id, state).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frame_is_json() {
        let frame: serde_json::Value = serde_json::from_str(&error_frame("Invalid \"token\"")).unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["error"], "Invalid \"token\"");
    }

    #[test]
    fn test_unread_frame() {
        let frame: serde_json::Value = serde_json::from_str(&unread_frame(7)).unwrap();
        assert_eq!(frame["type"], "unread_count");
        assert_eq!(frame["unread_count"], 7);
    }

    async fn serve(state: Arc<SocketState>) -> std::net::SocketAddr {
        let app = axum::Router::new()
            .route("/ws", axum::routing::get(ws_handler))
            .with_state(state);
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));
        addr
    }

    fn socket_state() -> Arc<SocketState> {
        let store = Arc::new(crate::store::memory::MemoryStore::new());
        Arc::new(SocketState {
            registry: Arc::new(ConnectionRegistry::new()),
            notifications: Arc::new(NotificationService::new(store, None)),
        })
    }

    fn sample_message(recipient: Uuid) -> NotificationMessage {
        NotificationMessage {
            kind: "notification".to_string(),
            notification_id: 11,
            event_type: crate::event::model::EventType::Liked,
            actor_id: recipient,
            subject_entity_id: Some(3),
            title: "New like".to_string(),
            body: "Someone liked your post".to_string(),
            action_url: "/posts/3/".to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    async fn next_text(
        socket: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> serde_json::Value {
        use tokio_tungstenite::tungstenite::Message as WsMessage;
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended early: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_socket_receives_unread_count_then_notifications() {
        std::env::set_var("JWT_SECRET", "test_secret");
        let state = socket_state();
        let addr = serve(state.clone()).await;

        let user = Uuid::new_v4();
        let token = crate::auth::jwt::generate_token(&user, crate::auth::jwt::Role::User).unwrap();
        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/ws?token={}", addr, token))
                .await
                .unwrap();

        let first = next_text(&mut socket).await;
        assert_eq!(first["type"], "unread_count");
        assert_eq!(first["unread_count"], 0);
        assert_eq!(state.registry.connections_of(user), 1);

        assert_eq!(state.registry.deliver_local(user, &sample_message(user)), 1);
        let pushed = next_text(&mut socket).await;
        assert_eq!(pushed["type"], "notification");
        assert_eq!(pushed["notification_id"], 11);

        socket.close(None).await.unwrap();
        for _ in 0..50 {
            if state.registry.connections_of(user) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.registry.connections_of(user), 0);
    }

    #[tokio::test]
    async fn test_socket_with_bad_token_gets_error_frame() {
        std::env::set_var("JWT_SECRET", "test_secret");
        let addr = serve(socket_state()).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws?token=nope", addr))
            .await
            .unwrap();
        let frame = next_text(&mut socket).await;
        assert_eq!(frame["type"], "error");
    }

    #[test]
    fn test_websocket_params() {
        let params: WebSocketParams = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(params.token.as_deref(), Some("abc"));
        let empty: WebSocketParams = serde_json::from_str("{}").unwrap();
        assert!(empty.token.is_none());
    }
}
