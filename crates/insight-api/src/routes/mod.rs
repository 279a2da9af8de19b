//! REST API 라우트 모듈.
//!
//! 실시간 채널(WebSocket/SSE)은 별도 모듈([`crate::ws`],
//! [`crate::sse`])에서 라우팅됩니다.

pub mod health;
pub mod scheduler;
pub mod tasks;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// REST API 라우터를 생성합니다.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api/v1/tasks", tasks::tasks_router())
        .nest("/api/v1/scheduler", scheduler::scheduler_router())
        .nest("/health", health::health_router())
}
