//! 진행 이벤트와 전달 seam.
//!
//! 태스크/잡 생명주기 전이는 `ProgressEvent`로 표현되어
//! [`ProgressSink`]를 통해 전달 계층으로 흘러갑니다.
//! 이벤트는 core에서 영속화하지 않습니다 (감사 로그는 외부 collaborator).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// 이벤트를 발생시킨 엔티티 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// 사용자 제출 태스크
    Task,
    /// 백그라운드 잡
    Job,
}

/// 진행 이벤트 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    /// 연결 유지 (소비자 로직은 idle 타이머 리셋 외에 무시)
    Heartbeat,
    /// 단계 전환
    Stage,
    /// 성공 완료
    Completed,
    /// 실패
    Failed,
    /// 취소
    Cancelled,
}

/// 진행 이벤트.
///
/// 같은 `entity_id`의 이벤트는 발생 순서대로 전달됩니다.
/// 중복 전달은 허용되지만 순서 역전은 허용되지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 엔티티 종류
    pub entity_kind: EntityKind,
    /// 엔티티 ID (태스크 ID 또는 잡 ID)
    pub entity_id: String,
    /// 이벤트 종류
    pub event_type: ProgressEventType,
    /// 이벤트 수신 범위를 결정하는 소유자 (None이면 전체 전달)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// 이벤트 내용 (불투명)
    pub payload: Value,
    /// 발생 시간
    pub emitted_at: DateTime<Utc>,
}

impl ProgressEvent {
    fn new(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        event_type: ProgressEventType,
        payload: Value,
    ) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.into(),
            event_type,
            owner_id: None,
            payload,
            emitted_at: Utc::now(),
        }
    }

    /// 소유자 범위를 지정합니다.
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// 단계 전환 이벤트 생성.
    pub fn stage(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        label: &str,
        percent: u8,
    ) -> Self {
        Self::new(
            entity_kind,
            entity_id,
            ProgressEventType::Stage,
            json!({ "stage": label, "progress": percent }),
        )
    }

    /// 성공 완료 이벤트 생성.
    pub fn completed(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::new(entity_kind, entity_id, ProgressEventType::Completed, payload)
    }

    /// 실패 이벤트 생성.
    pub fn failed(entity_kind: EntityKind, entity_id: impl Into<String>, reason: &str) -> Self {
        Self::new(
            entity_kind,
            entity_id,
            ProgressEventType::Failed,
            json!({ "reason": reason }),
        )
    }

    /// 취소 이벤트 생성.
    pub fn cancelled(entity_kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self::new(entity_kind, entity_id, ProgressEventType::Cancelled, json!({}))
    }

    /// heartbeat 이벤트 생성.
    pub fn heartbeat() -> Self {
        Self::new(
            EntityKind::Task,
            "system",
            ProgressEventType::Heartbeat,
            json!({ "ts": Utc::now().timestamp_millis() }),
        )
    }
}

/// 진행 이벤트 전달 seam.
///
/// TaskManager와 SchedulerService가 이벤트를 넘기는 인터페이스입니다.
/// 전달 계층의 실패는 절대 호출자에게 전파되지 않습니다.
pub trait ProgressSink: Send + Sync {
    /// 이벤트를 전달 계층에 넘깁니다.
    fn emit(&self, event: ProgressEvent);
}

/// 공유 가능한 sink 타입.
pub type SharedProgressSink = Arc<dyn ProgressSink>;

/// 아무것도 하지 않는 sink (테스트 및 전달 계층 미설정 시).
#[derive(Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_event_payload() {
        let event = ProgressEvent::stage(EntityKind::Task, "t-1", "fetching market data", 25);
        assert_eq!(event.event_type, ProgressEventType::Stage);
        assert_eq!(event.payload["stage"], "fetching market data");
        assert_eq!(event.payload["progress"], 25);
    }

    #[test]
    fn test_owner_scope() {
        let event = ProgressEvent::failed(EntityKind::Task, "t-1", "no data").with_owner("admin");
        assert_eq!(event.owner_id.as_deref(), Some("admin"));

        let job_event = ProgressEvent::stage(EntityKind::Job, "sync", "started", 0);
        assert!(job_event.owner_id.is_none());
    }

    #[test]
    fn test_event_serde_snake_case() {
        let event = ProgressEvent::cancelled(EntityKind::Task, "t-9");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"cancelled\""));
        assert!(json.contains("\"entity_kind\":\"task\""));
    }
}
