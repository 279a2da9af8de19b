//! 분석 태스크 endpoint.
//!
//! 제출/조회/취소 REST API. 제출은 즉시 202로 반환되고 실행은
//! 백그라운드 워커 풀에서 진행됩니다. 클라이언트가 `task_id`를
//! 직접 지정하면 재시도가 안전합니다 (멱등 제출).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use insight_core::{Market, Task, TaskSpec};
use insight_engine::CancelOutcome;

use crate::auth::decode_token;
use crate::error::{engine_error_response, ApiError, ApiResult};
use crate::metrics::record_task_submitted;
use crate::state::AppState;

/// 기본 소유자 센티널 (인증 정보가 없는 제출).
const DEFAULT_OWNER: &str = "admin";

/// 태스크 제출 요청.
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    /// 클라이언트 지정 태스크 ID (재시도 멱등성용, 선택)
    #[serde(default)]
    pub task_id: Option<String>,
    /// 분석 대상 종목 코드
    pub subject: String,
    /// 시장 구분
    pub market: Market,
    /// 분석 파라미터 (불투명 설정 블롭)
    #[serde(default)]
    pub parameters: Value,
    /// 소유자 ID (Bearer 토큰이 없을 때만 사용, 선택)
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// 태스크 제출 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    /// 태스크 ID (기존 태스크가 있으면 그 ID)
    pub task_id: String,
    /// 이번 호출로 새로 생성됐는지 여부
    pub created: bool,
}

/// 태스크 목록 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListResponse {
    /// 태스크 목록 (최신 생성순)
    pub tasks: Vec<Task>,
    /// 전체 개수
    pub total: usize,
}

/// 태스크 취소 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelTaskResponse {
    /// 취소 요청 수용 여부
    pub success: bool,
    /// `cancelled`(즉시 취소) 또는 `cancellation_requested`(협조적 취소)
    pub status: String,
}

/// 소유자 목록 조회 쿼리.
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    /// 소유자 ID
    pub owner_id: String,
}

/// 요청의 소유자 신원을 결정합니다.
///
/// Bearer 토큰이 있으면 검증된 `sub`를 쓰고, 없으면 요청 본문의
/// `owner_id`, 그것도 없으면 관리자 센티널을 사용합니다.
fn resolve_owner(headers: &HeaderMap, explicit: Option<String>, jwt_secret: &str) -> String {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if let Some(token) = bearer {
        if let Ok(claims) = decode_token(token, jwt_secret) {
            return claims.sub;
        }
    }
    explicit.unwrap_or_else(|| DEFAULT_OWNER.to_string())
}

/// 태스크 제출.
///
/// `POST /api/v1/tasks`
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SubmitTaskRequest>,
) -> ApiResult<(StatusCode, Json<SubmitTaskResponse>)> {
    let owner = resolve_owner(&headers, request.owner_id.clone(), &state.jwt_secret);
    let spec = TaskSpec {
        task_id: request.task_id,
        subject: request.subject,
        market: request.market,
        parameters: request.parameters,
    };

    let outcome = state
        .task_manager
        .submit(&owner, spec)
        .await
        .map_err(engine_error_response)?;

    record_task_submitted(outcome.created);
    debug!(task_id = %outcome.task_id, created = outcome.created, "Task submission accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id: outcome.task_id,
            created: outcome.created,
        }),
    ))
}

/// 태스크 단건 조회.
///
/// `GET /api/v1/tasks/{task_id}`
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task = state
        .task_manager
        .get(&task_id)
        .await
        .map_err(engine_error_response)?;
    Ok(Json(task))
}

/// 소유자의 태스크 목록 조회.
///
/// `GET /api/v1/tasks?owner_id=...`
///
/// 소유자 식별자의 레거시/신규 표현 모두와 일치하는 태스크를 반환합니다.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<TaskListResponse>> {
    if query.owner_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new("VALIDATION_ERROR", "owner_id must not be empty")),
        ));
    }

    let tasks = state
        .task_manager
        .list_for_owner(&query.owner_id)
        .await
        .map_err(engine_error_response)?;

    let total = tasks.len();
    Ok(Json(TaskListResponse { tasks, total }))
}

/// 태스크 취소 (best-effort).
///
/// `POST /api/v1/tasks/{task_id}/cancel`
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<CancelTaskResponse>> {
    let outcome = state
        .task_manager
        .cancel(&task_id)
        .await
        .map_err(engine_error_response)?;

    let status = match outcome {
        CancelOutcome::Cancelled => "cancelled",
        CancelOutcome::CancellationRequested => "cancellation_requested",
    };

    Ok(Json(CancelTaskResponse {
        success: true,
        status: status.to_string(),
    }))
}

/// 태스크 라우터 생성.
pub fn tasks_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(submit_task).get(list_tasks))
        .route("/{task_id}", get(get_task))
        .route("/{task_id}/cancel", post(cancel_task))
}
