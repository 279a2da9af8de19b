//! 알림 채널 transport.
//!
//! 재연결 상태 기계([`super::NotificationClient`])는 transport의 실제
//! 구현과 분리되어 있습니다. `connect`가 성공하면 서버 메시지 수신기를
//! 반환하고, 수신기가 닫히면 연결이 끊긴 것으로 간주합니다.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, warn};

use crate::hub::ServerMessage;

/// 채널 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// 양방향 WebSocket (우선 사용)
    Primary,
    /// 단방향 SSE (주 채널 소진 시)
    Fallback,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Primary => write!(f, "primary"),
            ChannelKind::Fallback => write!(f, "fallback"),
        }
    }
}

/// 클라이언트 채널 에러.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// 연결 수립 실패
    #[error("Connection error: {0}")]
    Connection(String),

    /// 서버 응답 해석 실패
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// 알림 채널 transport 인터페이스.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// 채널 종류.
    fn kind(&self) -> ChannelKind;

    /// 연결을 수립하고 서버 메시지 수신기를 반환합니다.
    ///
    /// 반환된 수신기가 닫히면(`None`) 연결이 종료된 것입니다.
    async fn connect(&self) -> Result<mpsc::Receiver<ServerMessage>, ClientError>;
}

/// WebSocket 기반 주 채널 transport.
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// 연결 URL(토큰 쿼리 포함)로 transport를 생성합니다.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Primary
    }

    async fn connect(&self) -> Result<mpsc::Receiver<ServerMessage>, ClientError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Unrecognized server message");
                        }
                    },
                    Ok(Message::Ping(payload)) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "WebSocket read ended");
                        break;
                    }
                }
            }
            // tx drop → 수신기 종료 → 상태 기계가 재연결 판단
        });

        Ok(rx)
    }
}

/// SSE 기반 fallback transport.
pub struct SseTransport {
    url: String,
    client: reqwest::Client,
}

impl SseTransport {
    /// 스트림 URL(토큰 쿼리 포함)로 transport를 생성합니다.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelTransport for SseTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Fallback
    }

    async fn connect(&self) -> Result<mpsc::Receiver<ServerMessage>, ClientError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Connection(format!(
                "stream returned {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!(error = %e, "SSE stream read ended");
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE 이벤트는 빈 줄로 구분됨
                while let Some(pos) = buffer.find("\n\n") {
                    let block = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);

                    if let Some(msg) = parse_sse_block(&block) {
                        if tx.send(msg).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// SSE 이벤트 블록(`event:`/`data:` 줄 묶음)을 서버 메시지로 해석합니다.
fn parse_sse_block(block: &str) -> Option<ServerMessage> {
    let mut event_name = "message";
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event_name = name.trim();
        } else if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.trim());
        }
        // 주석(:)과 id: 줄은 무시
    }

    if data_lines.is_empty() {
        return None;
    }
    let data: Value = serde_json::from_str(&data_lines.join("\n")).ok()?;

    match event_name {
        "connected" => Some(ServerMessage::Connected {
            session_id: data["session_id"].as_str().unwrap_or_default().to_string(),
            timestamp: data["timestamp"].as_i64().unwrap_or_default(),
        }),
        "notification" => serde_json::from_value(data)
            .ok()
            .map(|event| ServerMessage::Notification { data: event }),
        "heartbeat" => Some(ServerMessage::Heartbeat {
            timestamp: data["timestamp"].as_i64().unwrap_or_default(),
        }),
        _ => None,
    }
}

/// 테스트용 scripted 연결 한 건.
pub enum ScriptedConnection {
    /// 연결 수립 실패
    Fail(String),
    /// 연결 후 메시지들을 전달하고 닫힘
    Deliver(Vec<ServerMessage>),
    /// 연결 후 메시지들을 전달하고 열린 채 유지
    Hold(Vec<ServerMessage>),
}

/// 시나리오 연결을 재생하는 테스트 transport.
///
/// 연결 시도 시각을 기록해 backoff 타이밍 검증에 사용합니다.
pub struct ScriptedTransport {
    kind: ChannelKind,
    connections: Mutex<VecDeque<ScriptedConnection>>,
    connect_times: Mutex<Vec<tokio::time::Instant>>,
    held_senders: Mutex<Vec<mpsc::Sender<ServerMessage>>>,
}

impl ScriptedTransport {
    /// 새 scripted transport를 생성합니다.
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            connections: Mutex::new(VecDeque::new()),
            connect_times: Mutex::new(Vec::new()),
            held_senders: Mutex::new(Vec::new()),
        }
    }

    /// 연결 시나리오를 큐에 추가합니다.
    pub fn push(&self, connection: ScriptedConnection) {
        self.connections.lock().unwrap().push_back(connection);
    }

    /// 연결 시도 시각 목록.
    pub fn connect_times(&self) -> Vec<tokio::time::Instant> {
        self.connect_times.lock().unwrap().clone()
    }

    /// 연결 시도 횟수.
    pub fn connect_count(&self) -> usize {
        self.connect_times.lock().unwrap().len()
    }
}

#[async_trait]
impl ChannelTransport for ScriptedTransport {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn connect(&self) -> Result<mpsc::Receiver<ServerMessage>, ClientError> {
        self.connect_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());

        let next = self.connections.lock().unwrap().pop_front();
        match next {
            Some(ScriptedConnection::Fail(reason)) => Err(ClientError::Connection(reason)),
            Some(ScriptedConnection::Deliver(messages)) => {
                let (tx, rx) = mpsc::channel(messages.len().max(1));
                for msg in messages {
                    let _ = tx.try_send(msg);
                }
                // tx drop → 수신기가 메시지 소진 후 닫힘
                Ok(rx)
            }
            Some(ScriptedConnection::Hold(messages)) => {
                let (tx, rx) = mpsc::channel(messages.len().max(1) + 16);
                for msg in messages {
                    let _ = tx.try_send(msg);
                }
                self.held_senders.lock().unwrap().push(tx);
                Ok(rx)
            }
            // 시나리오 소진: 연결 실패로 처리
            None => Err(ClientError::Connection("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_block() {
        let block = "event: heartbeat\ndata: {\"timestamp\": 1700000000000}";
        let msg = parse_sse_block(block).unwrap();
        assert!(matches!(msg, ServerMessage::Heartbeat { timestamp } if timestamp == 1_700_000_000_000));

        let block = "event: connected\ndata: {\"session_id\":\"s-1\",\"timestamp\":1}";
        let msg = parse_sse_block(block).unwrap();
        assert!(matches!(msg, ServerMessage::Connected { session_id, .. } if session_id == "s-1"));

        // data 없는 블록(주석 등)은 무시
        assert!(parse_sse_block(": keep-alive").is_none());
    }

    #[test]
    fn test_parse_sse_notification_round_trip() {
        use insight_core::{EntityKind, ProgressEvent};

        let event = ProgressEvent::stage(EntityKind::Task, "t-1", "fetching", 25);
        let data = serde_json::to_string(&event).unwrap();
        let block = format!("event: notification\ndata: {}", data);

        let msg = parse_sse_block(&block).unwrap();
        match msg {
            ServerMessage::Notification { data } => {
                assert_eq!(data.entity_id, "t-1");
                assert_eq!(data.payload["progress"], 25);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
