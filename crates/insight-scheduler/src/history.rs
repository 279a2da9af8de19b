//! 잡 실행/조작 이력.
//!
//! 경계가 있는 인메모리 링 버퍼로 보관합니다. 내구성 있는 감사
//! 로그가 필요하면 외부 collaborator가 이벤트를 구독해 적재합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 이력에 기록되는 동작 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// 예정된 실행
    Run,
    /// 수동 트리거 실행
    Trigger,
    /// 일시정지
    Pause,
    /// 재개
    Resume,
}

/// 이력 항목 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    /// 성공
    Success,
    /// 실패 (에러 메시지 포함)
    Failed,
    /// 동시 실행 한도 도달로 건너뜀
    Skipped,
}

/// 잡 이력 항목.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryEntry {
    /// 잡 ID
    pub job_id: String,
    /// 동작 종류
    pub action: HistoryAction,
    /// 결과 상태
    pub status: HistoryStatus,
    /// 상세/에러 메시지
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 기록 시각
    pub timestamp: DateTime<Utc>,
    /// 실행 소요 시간 (밀리초, 실행 항목만)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// 경계가 있는 이력 로그.
#[derive(Debug)]
pub struct HistoryLog {
    entries: VecDeque<JobHistoryEntry>,
    limit: usize,
}

impl HistoryLog {
    /// 보관 한도를 지정해 생성합니다.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit: limit.max(1),
        }
    }

    /// 항목을 추가합니다. 한도를 넘으면 가장 오래된 항목을 버립니다.
    pub fn push(&mut self, entry: JobHistoryEntry) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// 전체 이력을 최신순으로 페이지 조회합니다.
    pub fn page(&self, limit: usize, offset: usize) -> Vec<JobHistoryEntry> {
        self.entries
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// 특정 잡의 이력을 최신순으로 페이지 조회합니다.
    pub fn page_for_job(&self, job_id: &str, limit: usize, offset: usize) -> Vec<JobHistoryEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.job_id == job_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// 보관 중인 항목 수.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 이력이 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
