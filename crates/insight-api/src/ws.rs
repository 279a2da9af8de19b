//! WebSocket 알림 채널 (주 채널).
//!
//! `GET /ws/notifications?token=`으로 연결합니다. 토큰 검증에 성공하면
//! 연결 확인(`connected`)을 먼저 보내고, 이후 소유자 범위에 해당하는
//! `notification`과 주기적 `heartbeat`를 전달합니다.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth::decode_token;
use crate::error::ApiError;
use crate::hub::{ClientMessage, NotificationHub, ServerMessage};
use crate::metrics::{decrement_websocket_connections, increment_websocket_connections};
use crate::state::AppState;

/// 연결 쿼리 파라미터.
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    /// 인증 collaborator가 발급한 JWT
    pub token: String,
}

/// WebSocket 업그레이드 핸들러.
///
/// 토큰 검증에 실패하면 업그레이드 없이 401을 반환합니다.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let claims = match decode_token(&query.token, &state.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new("INVALID_TOKEN", e.to_string())),
            )
                .into_response();
        }
    };

    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, claims.sub))
        .into_response()
}

/// WebSocket 연결 처리.
async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>, owner_id: String) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, owner = %owner_id, "WebSocket connected");
    increment_websocket_connections();

    let mut broadcast_rx = hub.register(&session_id, &owner_id).await;
    let (mut sender, mut receiver) = socket.split();

    // 연결 확인을 먼저 전송
    if let Ok(json) = ServerMessage::connected(&session_id).to_json() {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(msg)) => {
                        if !handle_client_message(&session_id, msg, &mut sender).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "WebSocket receive error");
                        break;
                    }
                    None => break,
                }
            }
            outgoing = broadcast_rx.recv() => {
                if !forward_broadcast(&hub, &session_id, outgoing, &mut sender).await {
                    break;
                }
            }
        }
    }

    hub.unregister(&session_id).await;
    decrement_websocket_connections();
    info!(session_id = %session_id, "WebSocket disconnected");
}

type WsSender = SplitSink<WebSocket, Message>;

/// 브로드캐스트 메시지를 세션 범위 필터를 거쳐 전달합니다.
///
/// # Returns
///
/// `true`면 연결 유지, `false`면 연결 종료
async fn forward_broadcast(
    hub: &NotificationHub,
    session_id: &str,
    received: Result<ServerMessage, broadcast::error::RecvError>,
    sender: &mut WsSender,
) -> bool {
    match received {
        Ok(msg) => {
            if hub.should_session_receive(session_id, &msg).await {
                if let Ok(json) = msg.to_json() {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        return false;
                    }
                }
            }
            true
        }
        Err(broadcast::error::RecvError::Lagged(n)) => {
            // drop-oldest: 느린 세션은 오래된 이벤트를 잃고 계속 진행
            warn!(session_id = %session_id, skipped = n, "WebSocket session lagged");
            true
        }
        Err(broadcast::error::RecvError::Closed) => false,
    }
}

/// 클라이언트 메시지 처리.
///
/// # Returns
///
/// `true`면 연결 유지, `false`면 연결 종료
async fn handle_client_message(session_id: &str, msg: Message, sender: &mut WsSender) -> bool {
    match msg {
        Message::Text(text) => {
            match ClientMessage::from_json(&text) {
                Ok(ClientMessage::Ping) => {
                    if let Ok(json) = ServerMessage::heartbeat().to_json() {
                        let _ = sender.send(Message::Text(json.into())).await;
                    }
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Invalid client message");
                }
            }
            true
        }
        Message::Binary(_) => {
            warn!(session_id = %session_id, "Binary messages not supported");
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            debug!(session_id = %session_id, "Close message received");
            false
        }
    }
}

/// WebSocket 알림 라우터 생성.
pub fn notifications_ws_router() -> Router<Arc<AppState>> {
    Router::new().route("/ws/notifications", get(ws_handler))
}
