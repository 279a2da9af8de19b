//! 재연결 알림 클라이언트.
//!
//! 연결별 상태 기계는 `disconnected → connecting → connected`를 따르며,
//! 주 채널(WebSocket)이 끊기면 지수 backoff로 재연결을 시도하고,
//! 시도 한도를 넘기면 fallback 채널(SSE)로 정확히 한 번 전환합니다
//! (채널 flapping 없음). fallback은 고정 지연으로 재연결합니다.
//!
//! 수신된 진행 이벤트는 mpsc 스트림으로 소비자에게 전달됩니다.
//! at-least-once 전달이며, 같은 엔티티의 이벤트 순서는 유지됩니다.

pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use insight_core::{NotificationsConfig, ProgressEvent};

use crate::hub::ServerMessage;
pub use transport::{
    ChannelKind, ChannelTransport, ClientError, ScriptedConnection, ScriptedTransport,
    SseTransport, WebSocketTransport,
};

/// 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 연결 없음
    Disconnected,
    /// 연결 수립 중
    Connecting,
    /// 연결됨
    Connected,
}

/// 재연결 정책.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// 주 채널 backoff 기본 지연
    pub base_delay: Duration,
    /// 주 채널 backoff 최대 지연
    pub max_delay: Duration,
    /// 주 채널 연속 실패 한도 (도달 시 fallback 전환)
    pub max_attempts: u32,
    /// fallback 채널 고정 재연결 지연
    pub fallback_retry_delay: Duration,
}

impl ReconnectPolicy {
    /// n번째(0부터) 재시도의 backoff 지연: `base * 2^n`, 최대값에서 포화.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&NotificationsConfig> for ReconnectPolicy {
    fn from(config: &NotificationsConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            max_attempts: config.reconnect_max_attempts.max(1),
            fallback_retry_delay: Duration::from_millis(config.fallback_retry_delay_ms),
        }
    }
}

/// 주 채널 루프의 종료 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    /// 종료 토큰 취소 또는 소비자 이탈
    Shutdown,
    /// 주 채널 시도 한도 도달
    Downgrade,
}

/// 단일 연결의 종료 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    /// 종료 토큰 취소 또는 소비자 이탈
    Shutdown,
    /// 연결이 닫힘 (재연결 여부는 호출한 루프가 판단)
    Closed,
}

struct ClientShared {
    state: RwLock<(ChannelKind, ConnectionState)>,
    events_tx: mpsc::Sender<ProgressEvent>,
}

/// 재연결 알림 클라이언트.
pub struct NotificationClient {
    primary: Arc<dyn ChannelTransport>,
    fallback: Arc<dyn ChannelTransport>,
    policy: ReconnectPolicy,
    shared: Arc<ClientShared>,
}

impl NotificationClient {
    /// 새 클라이언트를 생성하고 이벤트 수신기를 함께 반환합니다.
    pub fn new(
        primary: Arc<dyn ChannelTransport>,
        fallback: Arc<dyn ChannelTransport>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let client = Self {
            primary,
            fallback,
            policy,
            shared: Arc::new(ClientShared {
                state: RwLock::new((ChannelKind::Primary, ConnectionState::Disconnected)),
                events_tx,
            }),
        };
        (client, events_rx)
    }

    /// 서버 주소와 토큰으로 실제 transport를 구성합니다.
    pub fn for_server(
        base_url: &str,
        token: &str,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let ws_base = base_url
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        let primary = Arc::new(WebSocketTransport::new(format!(
            "{}/ws/notifications?token={}",
            ws_base, token
        )));
        let fallback = Arc::new(SseTransport::new(format!(
            "{}/api/v1/notifications/stream?token={}",
            base_url, token
        )));
        Self::new(primary, fallback, policy)
    }

    /// 전체 연결 여부: 어느 한 채널이라도 연결돼 있으면 true.
    pub async fn connected(&self) -> bool {
        self.shared.state.read().await.1 == ConnectionState::Connected
    }

    /// 현재 사용 중인 채널.
    pub async fn active_channel(&self) -> ChannelKind {
        self.shared.state.read().await.0
    }

    /// 연결 루프를 백그라운드 태스크로 시작합니다.
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// 연결 루프 본체.
    ///
    /// 주 채널을 먼저 시도하고, 시도 한도 도달 시 fallback으로 한 번만
    /// 전환합니다. fallback에서 주 채널로 되돌아가지 않습니다.
    async fn run(self, shutdown: CancellationToken) {
        if self.run_primary(&shutdown).await == RunOutcome::Shutdown {
            self.set_state(ChannelKind::Primary, ConnectionState::Disconnected)
                .await;
            return;
        }

        info!("Primary channel exhausted, downgrading to fallback");
        self.run_fallback(&shutdown).await;
        self.set_state(ChannelKind::Fallback, ConnectionState::Disconnected)
            .await;
    }

    async fn set_state(&self, kind: ChannelKind, state: ConnectionState) {
        *self.shared.state.write().await = (kind, state);
    }

    /// 주 채널 루프. 연속 실패가 한도에 닿으면 Downgrade를 반환합니다.
    async fn run_primary(&self, shutdown: &CancellationToken) -> RunOutcome {
        let mut failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return RunOutcome::Shutdown;
            }

            self.set_state(ChannelKind::Primary, ConnectionState::Connecting)
                .await;

            match self.primary.connect().await {
                Ok(rx) => {
                    info!("Primary channel connected");
                    self.set_state(ChannelKind::Primary, ConnectionState::Connected)
                        .await;
                    // 연결에 성공하면 연속 실패 카운터 리셋
                    failures = 0;

                    if self.pump(rx, shutdown).await == PumpEnd::Shutdown {
                        return RunOutcome::Shutdown;
                    }
                    warn!("Primary channel closed unexpectedly");
                    self.set_state(ChannelKind::Primary, ConnectionState::Disconnected)
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "Primary channel connect failed");
                    self.set_state(ChannelKind::Primary, ConnectionState::Disconnected)
                        .await;
                }
            }

            failures += 1;
            if failures >= self.policy.max_attempts {
                return RunOutcome::Downgrade;
            }

            let delay = self.policy.backoff_delay(failures - 1);
            debug!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Primary reconnect scheduled"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return RunOutcome::Shutdown,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// fallback 채널 루프. 고정 지연으로 무한 재연결합니다.
    async fn run_fallback(&self, shutdown: &CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            self.set_state(ChannelKind::Fallback, ConnectionState::Connecting)
                .await;

            match self.fallback.connect().await {
                Ok(rx) => {
                    info!("Fallback channel connected");
                    self.set_state(ChannelKind::Fallback, ConnectionState::Connected)
                        .await;

                    if self.pump(rx, shutdown).await == PumpEnd::Shutdown {
                        return;
                    }
                    warn!("Fallback channel closed, retrying");
                    self.set_state(ChannelKind::Fallback, ConnectionState::Disconnected)
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "Fallback channel connect failed");
                    self.set_state(ChannelKind::Fallback, ConnectionState::Disconnected)
                        .await;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.policy.fallback_retry_delay) => {}
            }
        }
    }

    /// 연결된 수신기에서 메시지를 소비자 스트림으로 퍼 나릅니다.
    async fn pump(
        &self,
        mut rx: mpsc::Receiver<ServerMessage>,
        shutdown: &CancellationToken,
    ) -> PumpEnd {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return PumpEnd::Shutdown,
                msg = rx.recv() => match msg {
                    Some(ServerMessage::Notification { data }) => {
                        if self.shared.events_tx.send(data).await.is_err() {
                            // 소비자가 이탈하면 더 받을 이유가 없음
                            return PumpEnd::Shutdown;
                        }
                    }
                    Some(ServerMessage::Heartbeat { .. }) => {
                        // idle 타이머 리셋 외에는 무시
                    }
                    Some(ServerMessage::Connected { session_id, .. }) => {
                        debug!(session_id = %session_id, "Server acknowledged connection");
                    }
                    None => return PumpEnd::Closed,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_core::{EntityKind, ProgressEvent};

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            max_attempts,
            fallback_retry_delay: Duration::from_secs(3),
        }
    }

    fn notification(id: &str, percent: u8) -> ServerMessage {
        ServerMessage::notification(ProgressEvent::stage(EntityKind::Task, id, "stage", percent))
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(300), async {
            loop {
                if condition().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not met");
    }

    #[test]
    fn test_backoff_delay_doubles_until_cap() {
        let policy = policy(10);

        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        // 최대값에서 포화
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(30), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_increases_then_single_downgrade() {
        let primary = Arc::new(ScriptedTransport::new(ChannelKind::Primary));
        for _ in 0..4 {
            primary.push(ScriptedConnection::Fail("refused".to_string()));
        }
        let fallback = Arc::new(ScriptedTransport::new(ChannelKind::Fallback));
        fallback.push(ScriptedConnection::Hold(Vec::new()));

        let (client, _events) = NotificationClient::new(
            Arc::clone(&primary) as Arc<dyn ChannelTransport>,
            Arc::clone(&fallback) as Arc<dyn ChannelTransport>,
            policy(4),
        );

        let shutdown = CancellationToken::new();
        let shared = Arc::clone(&client.shared);
        let handle = client.start(shutdown.clone());

        // fallback이 연결될 때까지 대기
        wait_until(|| {
            let shared = Arc::clone(&shared);
            async move {
                let state = *shared.state.read().await;
                state == (ChannelKind::Fallback, ConnectionState::Connected)
            }
        })
        .await;

        // 주 채널은 정확히 max_attempts번 시도
        assert_eq!(primary.connect_count(), 4);

        // 재시도 간격이 cap까지 엄격히 증가: 1s, 2s, 4s
        let times = primary.connect_times();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 3);
        assert!(gaps[0] >= Duration::from_secs(1) && gaps[0] < Duration::from_secs(2));
        assert!(gaps[1] >= Duration::from_secs(2) && gaps[1] < Duration::from_secs(4));
        assert!(gaps[2] >= Duration::from_secs(4) && gaps[2] < Duration::from_secs(8));

        // 전환은 정확히 한 번: fallback 유지 중 주 채널 재시도 없음
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(primary.connect_count(), 4);
        assert_eq!(fallback.connect_count(), 1);

        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_forwarded_in_order() {
        let primary = Arc::new(ScriptedTransport::new(ChannelKind::Primary));
        primary.push(ScriptedConnection::Hold(vec![
            ServerMessage::connected("s-1"),
            notification("t-1", 10),
            ServerMessage::heartbeat(),
            notification("t-1", 40),
            notification("t-1", 90),
        ]));
        let fallback = Arc::new(ScriptedTransport::new(ChannelKind::Fallback));

        let (client, mut events) = NotificationClient::new(
            primary as Arc<dyn ChannelTransport>,
            fallback as Arc<dyn ChannelTransport>,
            policy(3),
        );

        let shutdown = CancellationToken::new();
        let handle = client.start(shutdown.clone());

        // connected/heartbeat는 소비자에게 노출되지 않고 순서만 유지
        let percents: Vec<u8> = vec![
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.payload["progress"].as_u64().unwrap() as u8)
        .collect();
        assert_eq!(percents, vec![10, 40, 90]);

        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_connect_resets_failure_count() {
        let primary = Arc::new(ScriptedTransport::new(ChannelKind::Primary));
        // 실패 2회 → 성공(짧은 연결) → 다시 실패 2회 → 성공 유지
        primary.push(ScriptedConnection::Fail("refused".to_string()));
        primary.push(ScriptedConnection::Fail("refused".to_string()));
        primary.push(ScriptedConnection::Deliver(vec![notification("t-1", 10)]));
        primary.push(ScriptedConnection::Fail("refused".to_string()));
        primary.push(ScriptedConnection::Fail("refused".to_string()));
        primary.push(ScriptedConnection::Hold(Vec::new()));
        let fallback = Arc::new(ScriptedTransport::new(ChannelKind::Fallback));

        let (client, mut events) = NotificationClient::new(
            Arc::clone(&primary) as Arc<dyn ChannelTransport>,
            fallback.clone() as Arc<dyn ChannelTransport>,
            policy(4),
        );

        let shutdown = CancellationToken::new();
        let shared = Arc::clone(&client.shared);
        let handle = client.start(shutdown.clone());

        assert!(events.recv().await.is_some());

        wait_until(|| {
            let shared = Arc::clone(&shared);
            async move {
                let state = *shared.state.read().await;
                state == (ChannelKind::Primary, ConnectionState::Connected)
            }
        })
        .await;

        // 성공이 카운터를 리셋했으므로 fallback 전환 없음
        assert_eq!(primary.connect_count(), 6);
        assert_eq!(fallback.connect_count(), 0);

        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_reconnects_with_fixed_delay() {
        let primary = Arc::new(ScriptedTransport::new(ChannelKind::Primary));
        primary.push(ScriptedConnection::Fail("down".to_string()));
        let fallback = Arc::new(ScriptedTransport::new(ChannelKind::Fallback));
        fallback.push(ScriptedConnection::Fail("down".to_string()));
        fallback.push(ScriptedConnection::Fail("down".to_string()));
        fallback.push(ScriptedConnection::Hold(Vec::new()));

        let (client, _events) = NotificationClient::new(
            primary as Arc<dyn ChannelTransport>,
            Arc::clone(&fallback) as Arc<dyn ChannelTransport>,
            policy(1),
        );

        let shutdown = CancellationToken::new();
        let shared = Arc::clone(&client.shared);
        let handle = client.start(shutdown.clone());

        wait_until(|| {
            let shared = Arc::clone(&shared);
            async move {
                let state = *shared.state.read().await;
                state == (ChannelKind::Fallback, ConnectionState::Connected)
            }
        })
        .await;

        // 고정 지연 (지수 증가 아님)
        let times = fallback.connect_times();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 2);
        for gap in gaps {
            assert!(gap >= Duration::from_secs(3) && gap < Duration::from_secs(4));
        }

        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_tracks_either_channel() {
        let primary = Arc::new(ScriptedTransport::new(ChannelKind::Primary));
        primary.push(ScriptedConnection::Fail("down".to_string()));
        let fallback = Arc::new(ScriptedTransport::new(ChannelKind::Fallback));
        fallback.push(ScriptedConnection::Hold(Vec::new()));

        let (client, _events) = NotificationClient::new(
            primary as Arc<dyn ChannelTransport>,
            fallback as Arc<dyn ChannelTransport>,
            policy(1),
        );

        assert!(!client.connected().await);

        let shutdown = CancellationToken::new();
        let shared = Arc::clone(&client.shared);
        let handle = client.start(shutdown.clone());

        wait_until(|| {
            let shared = Arc::clone(&shared);
            async move { shared.state.read().await.1 == ConnectionState::Connected }
        })
        .await;

        let state = *shared.state.read().await;
        assert_eq!(state.0, ChannelKind::Fallback);

        shutdown.cancel();
        let _ = handle.await;
    }
}
