//! SSE 알림 채널 (fallback 채널).
//!
//! `GET /api/v1/notifications/stream?token=`으로 구독하는 서버 푸시
//! 전용 스트림입니다. 주 채널과 같은 `connected`/`notification`/
//! `heartbeat` 어휘를 이벤트 이름으로 전달하며, `data` 형태도 동일합니다.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::auth::decode_token;
use crate::error::ApiError;
use crate::hub::{NotificationHub, ServerMessage};
use crate::metrics::{decrement_sse_connections, increment_sse_connections};
use crate::state::AppState;
use crate::ws::TokenQuery;

/// 스트림 종료 시 연결 메트릭을 감소시키는 가드.
struct StreamGuard;

impl Drop for StreamGuard {
    fn drop(&mut self) {
        decrement_sse_connections();
    }
}

/// SSE 스트림 핸들러.
pub async fn stream_handler(
    Query(query): Query<TokenQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ApiError>)> {
    let claims = decode_token(&query.token, &state.jwt_secret).map_err(|e| {
        warn!(error = %e, "SSE auth failed");
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new("INVALID_TOKEN", e.to_string())),
        )
    })?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let owner_keys = state.hub.scope_keys(&claims.sub);
    let rx = state.hub.subscribe();

    increment_sse_connections();
    info!(session_id = %session_id, owner = %claims.sub, "SSE stream connected");

    let connected = to_sse_event(&ServerMessage::connected(&session_id));
    let stream = stream::once(async move { Ok(connected) })
        .chain(event_stream(rx, owner_keys, session_id));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// 브로드캐스트 수신기를 소유자 범위 필터가 적용된 SSE 스트림으로 바꿉니다.
fn event_stream(
    rx: broadcast::Receiver<ServerMessage>,
    owner_keys: HashSet<String>,
    session_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = StreamGuard;
    stream::unfold(
        (rx, owner_keys, session_id, guard),
        |(mut rx, keys, session_id, guard)| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if !NotificationHub::scope_matches(&keys, &msg) {
                            continue;
                        }
                        let event = to_sse_event(&msg);
                        return Some((Ok(event), (rx, keys, session_id, guard)));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(session_id = %session_id, skipped = n, "SSE stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(session_id = %session_id, "SSE stream closed");
                        return None;
                    }
                }
            }
        },
    )
}

/// 서버 메시지를 SSE 이벤트로 변환합니다.
fn to_sse_event(msg: &ServerMessage) -> Event {
    Event::default()
        .event(msg.event_name())
        .data(msg.data_payload().to_string())
}

/// SSE 알림 라우터 생성.
pub fn stream_router() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/notifications/stream", get(stream_handler))
}
