//! 분석 태스크 모델.
//!
//! 사용자가 제출한 분석 요청 하나의 생명주기를 표현합니다.
//! 상태 전이는 `queued → running → {succeeded|failed|cancelled}`로
//! 단조적이며, 종료 상태에서 빠져나가는 전이는 없습니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::market::Market;
use crate::error::{CoreError, CoreResult};

/// 태스크 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 대기 중 (워커 슬롯을 기다림)
    Queued,
    /// 실행 중
    Running,
    /// 성공 완료
    Succeeded,
    /// 실패
    Failed,
    /// 취소됨
    Cancelled,
}

impl TaskStatus {
    /// 종료 상태인지 확인.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 허용된 상태 전이인지 확인.
    ///
    /// 허용 전이: `queued → running`, `queued → cancelled`,
    /// `running → succeeded|failed|cancelled`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// 문자열로 변환.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// 태스크 제출 명세.
///
/// 클라이언트가 `POST /tasks`로 보내는 내용입니다.
/// `task_id`를 직접 지정하면 재시도 시 중복 생성이 방지됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// 클라이언트 지정 태스크 ID (없으면 서버가 생성)
    #[serde(default)]
    pub task_id: Option<String>,
    /// 분석 대상 (종목 코드)
    pub subject: String,
    /// 시장 구분
    pub market: Market,
    /// 분석 파라미터 (불투명 설정 블롭)
    #[serde(default)]
    pub parameters: Value,
}

impl TaskSpec {
    /// 제출 명세를 검증합니다.
    ///
    /// 빈 subject는 거부되며, 클라이언트 지정 ID는 공백일 수 없습니다.
    pub fn validate(&self) -> CoreResult<()> {
        if self.subject.trim().is_empty() {
            return Err(CoreError::Validation("subject must not be empty".to_string()));
        }
        if let Some(id) = &self.task_id {
            if id.trim().is_empty() {
                return Err(CoreError::Validation(
                    "task_id, when supplied, must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// 분석 태스크.
///
/// 제출 시 `queued`로 생성되고, 실행 워커만이 상태를 변경합니다.
/// 물리 삭제는 하지 않습니다 (보존 정책은 외부 collaborator의 책임).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// 전역 고유 태스크 ID
    pub task_id: String,
    /// 소유자 ID (계정 UUID 또는 레거시 사용자명 센티널)
    pub owner_id: String,
    /// 분석 대상 (종목 코드)
    pub subject: String,
    /// 시장 구분
    pub market: Market,
    /// 분석 파라미터
    pub parameters: Value,
    /// 현재 상태
    pub status: TaskStatus,
    /// 진행률 (0-100, 단일 실행 내에서 단조 증가)
    pub progress_percent: u8,
    /// 현재 단계 설명
    pub stage_label: String,
    /// 생성 시간
    pub created_at: DateTime<Utc>,
    /// 마지막 업데이트 시간
    pub updated_at: DateTime<Utc>,
    /// 결과 리포트 참조 (성공 시)
    pub result_ref: Option<String>,
    /// 실패 사유 요약 (실패 시)
    pub error_message: Option<String>,
}

impl Task {
    /// 제출 명세로부터 새 태스크를 생성합니다.
    ///
    /// `task_id`가 지정되지 않았으면 UUID v4를 생성합니다.
    pub fn from_spec(owner_id: impl Into<String>, spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            task_id: spec
                .task_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            owner_id: owner_id.into(),
            subject: spec.subject,
            market: spec.market,
            parameters: spec.parameters,
            status: TaskStatus::Queued,
            progress_percent: 0,
            stage_label: "queued".to_string(),
            created_at: now,
            updated_at: now,
            result_ref: None,
            error_message: None,
        }
    }
}
