//! 분석 플랫폼의 에러 타입.
//!
//! 이 모듈은 시스템 전반에서 사용되는 에러 분류를 정의합니다.
//! 단일 provider 실패처럼 내부에서 흡수되는 에러와, 태스크를
//! 실패 상태로 만드는 치명적 에러를 구분합니다.

use thiserror::Error;

/// 핵심 에러 분류.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 입력 검증 에러 (제출 시점에 동기적으로 거부됨)
    #[error("검증 에러: {0}")]
    Validation(String),

    /// 모든 데이터 소스 후보가 소진됨
    #[error("사용 가능한 데이터 없음: {0}")]
    NoDataAvailable(String),

    /// 단일 데이터 소스 실패 (resolver가 다음 후보로 복구)
    #[error("데이터 소스 에러: {0}")]
    Provider(String),

    /// 분석 collaborator 실패
    #[error("분석 에러: {0}")]
    Analysis(String),

    /// 저장소 에러
    #[error("저장소 에러: {0}")]
    Storage(String),

    /// 알림 채널 연결 에러 (전달 계층 내부에서 복구)
    #[error("연결 에러: {0}")]
    Connection(String),

    /// 동시 실행 한도 초과
    #[error("동시 실행 한도 초과: {0}")]
    ConcurrencyLimit(String),

    /// 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 핵심 작업을 위한 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// 다음 후보/다음 주기에서 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Provider(_) | CoreError::Connection(_))
    }

    /// 태스크를 `failed` 상태로 만드는 에러인지 확인합니다.
    ///
    /// Provider 단일 실패와 연결 에러는 각각 resolver와 전달 계층이
    /// 흡수하므로 태스크에 도달하지 않습니다.
    pub fn is_terminal_for_task(&self) -> bool {
        matches!(
            self,
            CoreError::NoDataAvailable(_) | CoreError::Analysis(_) | CoreError::Storage(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
