//! 엔진 오류 타입.

use insight_data::DataError;
use thiserror::Error;

/// 태스크 엔진 오류.
#[derive(Debug, Error)]
pub enum EngineError {
    /// 제출 명세 검증 실패 (저장소에 들어가지 않음)
    #[error("Validation error: {0}")]
    Validation(String),

    /// 태스크를 찾을 수 없음
    #[error("Task not found: {0}")]
    NotFound(String),

    /// 이미 종료 상태인 태스크에 대한 작업
    #[error("Task already finished: {0}")]
    AlreadyFinished(String),

    /// 허용되지 않는 상태 전이
    #[error("Illegal status transition: {0}")]
    IllegalTransition(String),

    /// 저장소 오류
    #[error("Store error: {0}")]
    Store(String),

    /// 데이터 해석 오류
    #[error(transparent)]
    Data(#[from] DataError),

    /// 분석 collaborator 오류
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// 내부 오류
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::NotFound("row not found".to_string()),
            _ => EngineError::Store(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
