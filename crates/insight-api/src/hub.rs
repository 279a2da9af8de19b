//! 알림 허브.
//!
//! 태스크/잡 진행 이벤트를 연결된 모든 클라이언트에 fan-out합니다.
//! WebSocket(주 채널)과 SSE(fallback 채널)가 같은 허브를 구독하며,
//! 느린 수신자는 broadcast 채널의 lag-drop(drop-oldest)으로 격리되어
//! 다른 수신자의 전달을 막지 않습니다.
//!
//! 허브는 ambient/static 상태가 아니라 명시적으로 주입되는 registry
//! 객체입니다. graceful shutdown 시 `drain`으로 모든 세션을 정리합니다.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use insight_core::{ProgressEvent, ProgressSink};
use insight_engine::owner_candidate_keys;

/// 서버 → 클라이언트 메시지.
///
/// 두 채널 모두 같은 어휘를 사용합니다: `connected`(연결 확인),
/// `notification`(진행 이벤트), `heartbeat`(keep-alive).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 연결 직후 1회 전송되는 확인 메시지
    Connected {
        /// 서버가 부여한 세션 ID
        session_id: String,
        /// 전송 시각 (Unix millis)
        timestamp: i64,
    },
    /// 진행 이벤트
    Notification {
        /// 이벤트 본문
        data: ProgressEvent,
    },
    /// keep-alive (소비자 로직은 idle 타이머 리셋 외에 무시)
    Heartbeat {
        /// 전송 시각 (Unix millis)
        timestamp: i64,
    },
}

impl ServerMessage {
    /// 연결 확인 메시지 생성.
    pub fn connected(session_id: impl Into<String>) -> Self {
        Self::Connected {
            session_id: session_id.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// 진행 이벤트 메시지 생성.
    pub fn notification(event: ProgressEvent) -> Self {
        Self::Notification { data: event }
    }

    /// heartbeat 메시지 생성.
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// JSON 문자열로 직렬화.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// SSE 이벤트 이름.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Notification { .. } => "notification",
            ServerMessage::Heartbeat { .. } => "heartbeat",
        }
    }

    /// SSE `data` 필드에 실을 페이로드.
    ///
    /// WebSocket은 전체 메시지를 JSON으로 보내고, SSE는 이벤트 이름이
    /// 타입을 전달하므로 `data` 부분만 보냅니다. 두 채널의 `data` 형태는
    /// 동일합니다.
    pub fn data_payload(&self) -> Value {
        match self {
            ServerMessage::Connected {
                session_id,
                timestamp,
            } => json!({ "session_id": session_id, "timestamp": timestamp }),
            ServerMessage::Notification { data } => {
                serde_json::to_value(data).unwrap_or(Value::Null)
            }
            ServerMessage::Heartbeat { timestamp } => json!({ "timestamp": timestamp }),
        }
    }
}

/// 클라이언트 → 서버 메시지 (주 채널 전용).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// keep-alive 요청. 서버는 `heartbeat`로 응답합니다.
    Ping,
}

impl ClientMessage {
    /// JSON 문자열에서 파싱.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// 세션별 수신 범위.
struct SessionScope {
    /// 소유자의 동등한 키 집합 (레거시/신규 표현 모두 포함)
    owner_keys: HashSet<String>,
}

/// 알림 허브.
pub struct NotificationHub {
    broadcast_tx: broadcast::Sender<ServerMessage>,
    sessions: RwLock<HashMap<String, SessionScope>>,
    admin_account_id: Uuid,
    draining: AtomicBool,
}

impl NotificationHub {
    /// 새 허브를 생성합니다.
    ///
    /// # Arguments
    ///
    /// * `capacity` - 브로드캐스트 채널 버퍼 크기 (초과 시 drop-oldest)
    /// * `admin_account_id` - 소유자 키 동등성 계산에 쓰는 관리자 UUID
    pub fn new(capacity: usize, admin_account_id: Uuid) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            broadcast_tx: tx,
            sessions: RwLock::new(HashMap::new()),
            admin_account_id,
            draining: AtomicBool::new(false),
        }
    }

    /// 소유자의 동등한 키 집합을 계산합니다.
    pub fn scope_keys(&self, owner_id: &str) -> HashSet<String> {
        owner_candidate_keys(owner_id, &self.admin_account_id)
            .into_iter()
            .collect()
    }

    /// 새 세션을 등록하고 브로드캐스트 수신기를 반환합니다.
    pub async fn register(&self, session_id: &str, owner_id: &str) -> broadcast::Receiver<ServerMessage> {
        let scope = SessionScope {
            owner_keys: self.scope_keys(owner_id),
        };
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), scope);
        debug!(session_id = %session_id, owner = %owner_id, "Session registered");
        self.broadcast_tx.subscribe()
    }

    /// 세션을 제거합니다.
    pub async fn unregister(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
        debug!(session_id = %session_id, "Session unregistered");
    }

    /// 세션 등록 없이 브로드캐스트만 구독합니다 (SSE 스트림용).
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.broadcast_tx.subscribe()
    }

    /// 세션이 메시지를 수신해야 하는지 확인합니다.
    ///
    /// 소유자 범위가 없는 이벤트와 heartbeat는 모든 세션에 전달되고,
    /// 소유자 범위가 있는 이벤트는 그 소유자의 동등한 키를 가진
    /// 세션에만 전달됩니다.
    pub async fn should_session_receive(&self, session_id: &str, message: &ServerMessage) -> bool {
        let sessions = self.sessions.read().await;
        let Some(scope) = sessions.get(session_id) else {
            return false;
        };
        Self::scope_matches(&scope.owner_keys, message)
    }

    /// 키 집합 기준의 수신 여부 판정 (세션 registry 없이 쓰는 경로용).
    pub fn scope_matches(owner_keys: &HashSet<String>, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::Notification { data } => match &data.owner_id {
                Some(owner) => owner_keys.contains(owner),
                None => true,
            },
            _ => true,
        }
    }

    /// 메시지를 모든 구독자에게 브로드캐스트합니다.
    ///
    /// 수신자가 없으면 조용히 버립니다 (전달 계층 실패는 태스크
    /// 서브시스템으로 전파되지 않음).
    pub fn broadcast(&self, message: ServerMessage) -> usize {
        if self.draining.load(Ordering::SeqCst) {
            return 0;
        }
        self.broadcast_tx.send(message).unwrap_or(0)
    }

    /// 연결된 세션 수.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 모든 세션을 정리하고 이후 브로드캐스트를 중단합니다.
    ///
    /// graceful shutdown에서 호출합니다. 반환값은 정리된 세션 수입니다.
    pub async fn drain(&self) -> usize {
        self.draining.store(true, Ordering::SeqCst);
        let mut sessions = self.sessions.write().await;
        let drained = sessions.len();
        sessions.clear();
        info!(drained = drained, "Notification hub drained");
        drained
    }

    /// 주기적으로 heartbeat를 브로드캐스트하는 태스크를 시작합니다.
    pub fn start_heartbeat(
        self: &std::sync::Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let hub = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        hub.broadcast(ServerMessage::heartbeat());
                    }
                }
            }
        })
    }
}

impl ProgressSink for NotificationHub {
    fn emit(&self, event: ProgressEvent) {
        self.broadcast(ServerMessage::notification(event));
    }
}
