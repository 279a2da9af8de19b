//! 주식 분석 플랫폼 API 서버.
//!
//! 이 crate는 전달 계층을 구현합니다:
//! - 태스크/스케줄러 REST API ([`routes`])
//! - 실시간 알림 허브와 양대 채널 ([`hub`], [`ws`], [`sse`])
//! - 재연결 상태 기계를 가진 알림 클라이언트 ([`client`])
//! - 토큰 검증, 메트릭, 기본 백그라운드 잡 ([`auth`], [`metrics`], [`jobs`])

pub mod auth;
pub mod client;
pub mod error;
pub mod hub;
pub mod jobs;
pub mod metrics;
pub mod routes;
pub mod sse;
pub mod state;
pub mod ws;

pub use client::{
    ChannelKind, ChannelTransport, ClientError, ConnectionState, NotificationClient,
    ReconnectPolicy, SseTransport, WebSocketTransport,
};
pub use error::{ApiError, ApiResult};
pub use hub::{ClientMessage, NotificationHub, ServerMessage};
pub use state::AppState;
