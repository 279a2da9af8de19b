//! 스케줄러 관리 endpoint.
//!
//! 잡 조회/일시정지/재개/수동 트리거/이력/통계/헬스를 제공합니다.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use insight_scheduler::{
    FireOutcome, JobHistoryEntry, JobInfo, SchedulerHealth, SchedulerStats,
};

use crate::error::{scheduler_error_response, ApiResult};
use crate::state::AppState;

/// 이력 페이지 조회 쿼리.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// 페이지 크기
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    /// 건너뛸 항목 수
    #[serde(default)]
    pub offset: usize,
}

fn default_history_limit() -> usize {
    50
}

/// 잡 메타데이터 갱신 요청.
#[derive(Debug, Deserialize)]
pub struct UpdateMetadataRequest {
    /// 새 표시 이름 (선택)
    #[serde(default)]
    pub display_name: Option<String>,
    /// 새 설명 (선택)
    #[serde(default)]
    pub description: Option<String>,
}

/// 조작 결과 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobActionResponse {
    /// 성공 여부
    pub success: bool,
    /// 결과 설명 (트리거의 경우 `started`/`skipped`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// 잡 목록 조회.
///
/// `GET /api/v1/scheduler/jobs`
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobInfo>> {
    Json(state.scheduler.list_jobs().await)
}

/// 잡 상세 조회.
///
/// `GET /api/v1/scheduler/jobs/{id}`
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobInfo>> {
    let job = state
        .scheduler
        .get_job(&job_id)
        .await
        .map_err(scheduler_error_response)?;
    Ok(Json(job))
}

/// 잡 일시정지.
///
/// `POST /api/v1/scheduler/jobs/{id}/pause`
pub async fn pause_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobActionResponse>> {
    state
        .scheduler
        .pause(&job_id)
        .await
        .map_err(scheduler_error_response)?;
    Ok(Json(JobActionResponse {
        success: true,
        outcome: None,
    }))
}

/// 잡 재개.
///
/// `POST /api/v1/scheduler/jobs/{id}/resume`
pub async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobActionResponse>> {
    state
        .scheduler
        .resume(&job_id)
        .await
        .map_err(scheduler_error_response)?;
    Ok(Json(JobActionResponse {
        success: true,
        outcome: None,
    }))
}

/// 잡 수동 트리거.
///
/// `POST /api/v1/scheduler/jobs/{id}/trigger`
///
/// `max_instances`에 도달해 있으면 실행은 큐잉되지 않고 건너뛴 것으로
/// 기록되며, 응답의 `outcome`이 `skipped`가 됩니다.
pub async fn trigger_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobActionResponse>> {
    let outcome = state
        .scheduler
        .trigger(&job_id)
        .await
        .map_err(scheduler_error_response)?;

    let outcome = match outcome {
        FireOutcome::Started => "started",
        FireOutcome::Skipped => "skipped",
    };
    Ok(Json(JobActionResponse {
        success: true,
        outcome: Some(outcome.to_string()),
    }))
}

/// 잡별 이력 조회.
///
/// `GET /api/v1/scheduler/jobs/{id}/history`
pub async fn job_history(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<JobHistoryEntry>>> {
    // 존재하지 않는 잡은 404
    state
        .scheduler
        .get_job(&job_id)
        .await
        .map_err(scheduler_error_response)?;

    Ok(Json(
        state.scheduler.history(&job_id, query.limit, query.offset).await,
    ))
}

/// 전체 이력 조회.
///
/// `GET /api/v1/scheduler/history`
pub async fn all_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<JobHistoryEntry>> {
    Json(state.scheduler.all_history(query.limit, query.offset).await)
}

/// 잡 메타데이터 갱신.
///
/// `PUT /api/v1/scheduler/jobs/{id}/metadata`
pub async fn update_metadata(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Json(request): Json<UpdateMetadataRequest>,
) -> ApiResult<Json<JobActionResponse>> {
    state
        .scheduler
        .update_metadata(&job_id, request.display_name, request.description)
        .await
        .map_err(scheduler_error_response)?;
    Ok(Json(JobActionResponse {
        success: true,
        outcome: None,
    }))
}

/// 스케줄러 통계 조회.
///
/// `GET /api/v1/scheduler/stats`
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<SchedulerStats> {
    Json(state.scheduler.stats().await)
}

/// 스케줄러 헬스 조회.
///
/// `GET /api/v1/scheduler/health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<SchedulerHealth> {
    Json(state.scheduler.health().await)
}

/// 스케줄러 라우터 생성.
pub fn scheduler_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/pause", post(pause_job))
        .route("/jobs/{id}/resume", post(resume_job))
        .route("/jobs/{id}/trigger", post(trigger_job))
        .route("/jobs/{id}/history", get(job_history))
        .route("/jobs/{id}/metadata", put(update_metadata))
        .route("/history", get(all_history))
        .route("/stats", get(stats))
        .route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use insight_scheduler::{JobContext, JobDefinition, JobOutcome, JobRunner, TriggerSpec};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::state::create_test_state;

    struct NoopRunner;

    #[async_trait]
    impl JobRunner for NoopRunner {
        async fn run(&self, _ctx: JobContext) -> insight_scheduler::Result<JobOutcome> {
            Ok(JobOutcome::with_detail("done"))
        }
    }

    async fn app_with_job() -> Router {
        let state = create_test_state().await;
        state
            .scheduler
            .register(
                JobDefinition::new(
                    "market-data-sync",
                    "Market data sync",
                    TriggerSpec::Interval(Duration::from_secs(3600)),
                    Arc::new(NoopRunner),
                )
                .with_description("pulls daily bars through the resolver"),
            )
            .await
            .unwrap();

        Router::new()
            .nest("/api/v1/scheduler", scheduler_router())
            .with_state(state)
    }

    async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_list_and_get_job() {
        let app = app_with_job().await;

        let (status, jobs) = request(&app, "GET", "/api/v1/scheduler/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(jobs.as_array().unwrap().len(), 1);
        assert_eq!(jobs[0]["id"], "market-data-sync");

        let (status, job) =
            request(&app, "GET", "/api/v1/scheduler/jobs/market-data-sync", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["paused"], false);

        let (status, body) = request(&app, "GET", "/api/v1/scheduler/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "JOB_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_pause_resume_cycle() {
        let app = app_with_job().await;

        let (status, body) = request(
            &app,
            "POST",
            "/api/v1/scheduler/jobs/market-data-sync/pause",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (_, job) = request(&app, "GET", "/api/v1/scheduler/jobs/market-data-sync", None).await;
        assert_eq!(job["paused"], true);
        assert!(job["next_run_time"].is_null());

        let (status, _) = request(
            &app,
            "POST",
            "/api/v1/scheduler/jobs/market-data-sync/resume",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, job) = request(&app, "GET", "/api/v1/scheduler/jobs/market-data-sync", None).await;
        assert_eq!(job["paused"], false);
    }

    #[tokio::test]
    async fn test_trigger_and_history() {
        let app = app_with_job().await;

        let (status, body) = request(
            &app,
            "POST",
            "/api/v1/scheduler/jobs/market-data-sync/trigger",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "started");

        // 실행 완료가 이력에 나타날 때까지 대기
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let (_, history) = request(
                    &app,
                    "GET",
                    "/api/v1/scheduler/jobs/market-data-sync/history",
                    None,
                )
                .await;
                if history
                    .as_array()
                    .unwrap()
                    .iter()
                    .any(|e| e["status"] == "success")
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("trigger run not recorded");

        let (status, all) = request(&app, "GET", "/api/v1/scheduler/history?limit=10", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!all.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_health() {
        let app = app_with_job().await;

        let (status, stats) = request(&app, "GET", "/api/v1/scheduler/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_jobs"], 1);
        assert_eq!(stats["scheduler_running"], false);

        let (status, health) = request(&app, "GET", "/api/v1/scheduler/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "stopped");
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let app = app_with_job().await;

        let (status, _) = request(
            &app,
            "PUT",
            "/api/v1/scheduler/jobs/market-data-sync/metadata",
            Some(serde_json::json!({ "display_name": "Daily bar sync" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, job) = request(&app, "GET", "/api/v1/scheduler/jobs/market-data-sync", None).await;
        assert_eq!(job["display_name"], "Daily bar sync");
        // 지정하지 않은 필드는 유지
        assert_eq!(job["description"], "pulls daily bars through the resolver");
    }
}
