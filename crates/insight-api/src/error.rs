//! API 에러 응답 타입.

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use insight_engine::EngineError;
use insight_scheduler::SchedulerError;

/// API 에러 응답 본문.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// 에러 코드
    pub code: String,
    /// 에러 메시지
    pub message: String,
}

impl ApiError {
    /// 새 에러 응답을 생성합니다.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// 핸들러 공용 Result 타입.
pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

/// 엔진 에러를 HTTP 응답으로 변환합니다.
pub fn engine_error_response(err: EngineError) -> (StatusCode, Json<ApiError>) {
    let (status, code) = match &err {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "TASK_NOT_FOUND"),
        EngineError::AlreadyFinished(_) => (StatusCode::CONFLICT, "TASK_ALREADY_FINISHED"),
        EngineError::IllegalTransition(_) => (StatusCode::CONFLICT, "ILLEGAL_TRANSITION"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };
    (status, Json(ApiError::new(code, err.to_string())))
}

/// 스케줄러 에러를 HTTP 응답으로 변환합니다.
pub fn scheduler_error_response(err: SchedulerError) -> (StatusCode, Json<ApiError>) {
    let (status, code) = match &err {
        SchedulerError::JobNotFound(_) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
        SchedulerError::DuplicateJob(_) => (StatusCode::CONFLICT, "DUPLICATE_JOB"),
        SchedulerError::InvalidTrigger(_) => (StatusCode::BAD_REQUEST, "INVALID_TRIGGER"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };
    (status, Json(ApiError::new(code, err.to_string())))
}
