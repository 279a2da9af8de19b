//! 스케줄러 오류 타입.

use thiserror::Error;

/// 스케줄러 오류.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// 잡을 찾을 수 없음
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// 같은 ID의 잡이 이미 등록됨
    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    /// 트리거 명세 파싱 실패
    #[error("Invalid trigger spec: {0}")]
    InvalidTrigger(String),

    /// 잡 실행 실패 (이력에 기록되고 스케줄러는 계속 동작)
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// 동시 실행 한도 도달로 실행이 건너뜀
    #[error("Max instances reached for job: {0}")]
    MaxInstancesReached(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
