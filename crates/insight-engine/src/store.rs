//! 태스크 저장소 collaborator 인터페이스.
//!
//! core가 문서 지향 저장소에 요구하는 연산만 정의합니다.
//! 핵심은 ID 기준 멱등 upsert입니다: 이미 존재하는 ID에 대한
//! 제출은 no-op이므로 클라이언트 재시도가 안전합니다.
//! 상태 전이와 진행률 단조성은 저장소 구현이 보장합니다.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use insight_core::{Task, TaskStatus};

use crate::error::{EngineError, Result};

/// upsert 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// 새 레코드가 생성됨
    Created,
    /// 같은 ID가 이미 존재함 (기존 레코드 유지, 진행률 리셋 없음)
    AlreadyExists,
}

/// 태스크 저장소 인터페이스.
///
/// 단일 `task_id`에 대한 쓰기는 제출 시 멱등 upsert와 실행을 소유한
/// 단일 워커에 의해 직렬화됩니다. 읽기는 동시에 수행될 수 있습니다.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 멱등 upsert. 같은 ID가 있으면 아무것도 바꾸지 않습니다.
    async fn upsert_new(&self, task: Task) -> Result<UpsertOutcome>;

    /// ID로 태스크를 조회합니다.
    async fn get(&self, task_id: &str) -> Result<Option<Task>>;

    /// 상태 전이를 기록합니다. 허용되지 않는 전이는 거부됩니다.
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    /// 진행률 체크포인트를 기록합니다. 진행률은 감소하지 않습니다.
    async fn update_progress(&self, task_id: &str, percent: u8, stage_label: &str) -> Result<()>;

    /// 성공 완료를 기록합니다 (`running → succeeded`).
    async fn complete(&self, task_id: &str, result_ref: &str) -> Result<()>;

    /// 실패를 기록합니다 (`running → failed`). 이미 기록된 진행률은 유지됩니다.
    async fn fail(&self, task_id: &str, error_message: &str) -> Result<()>;

    /// 취소를 기록합니다. 반환값은 실제로 전이가 일어났는지 여부입니다.
    ///
    /// 이미 취소된 태스크에 대해서는 no-op으로 `false`를 반환하고,
    /// 다른 종료 상태면 에러를 반환합니다.
    async fn mark_cancelled(&self, task_id: &str) -> Result<bool>;

    /// 소유자 후보 키 중 하나라도 일치하는 태스크를 반환합니다.
    async fn find_by_owner_keys(&self, keys: &[String]) -> Result<Vec<Task>>;

    /// 기준 시각 이전에 종료된 태스크 수를 반환합니다.
    ///
    /// core는 태스크를 물리 삭제하지 않으므로, 보존 정책을 집행하는
    /// 외부 collaborator가 참고할 집계용입니다.
    async fn count_finished_before(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64>;

    /// 저장소 연결 상태를 확인합니다.
    async fn ping(&self) -> Result<()>;
}

/// 인메모리 태스크 저장소.
///
/// 테스트와 DB 없는 실행 모드에서 사용하는 참조 구현입니다.
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl MemoryTaskStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    fn transition(task: &mut Task, next: TaskStatus) -> Result<()> {
        if !task.status.can_transition_to(next) {
            return Err(EngineError::IllegalTransition(format!(
                "{} -> {} for task {}",
                task.status, next, task.task_id
            )));
        }
        task.status = next;
        task.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn upsert_new(&self, task: Task) -> Result<UpsertOutcome> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.task_id) {
            return Ok(UpsertOutcome::AlreadyExists);
        }
        tasks.insert(task.task_id.clone(), task);
        Ok(UpsertOutcome::Created)
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))?;
        Self::transition(task, status)
    }

    async fn update_progress(&self, task_id: &str, percent: u8, stage_label: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))?;
        // 단일 실행 내 단조 증가 보장
        task.progress_percent = task.progress_percent.max(percent.min(100));
        task.stage_label = stage_label.to_string();
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, task_id: &str, result_ref: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))?;
        Self::transition(task, TaskStatus::Succeeded)?;
        task.progress_percent = 100;
        task.stage_label = "completed".to_string();
        task.result_ref = Some(result_ref.to_string());
        Ok(())
    }

    async fn fail(&self, task_id: &str, error_message: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))?;
        Self::transition(task, TaskStatus::Failed)?;
        task.error_message = Some(error_message.to_string());
        Ok(())
    }

    async fn mark_cancelled(&self, task_id: &str) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))?;

        match task.status {
            TaskStatus::Cancelled => Ok(false),
            TaskStatus::Succeeded | TaskStatus::Failed => Err(EngineError::AlreadyFinished(
                task_id.to_string(),
            )),
            _ => {
                Self::transition(task, TaskStatus::Cancelled)?;
                Ok(true)
            }
        }
    }

    async fn find_by_owner_keys(&self, keys: &[String]) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| keys.iter().any(|k| k == &t.owner_id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn count_finished_before(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| t.status.is_terminal() && t.updated_at < cutoff)
            .count() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_core::{Market, TaskSpec};
    use serde_json::json;

    fn task(id: &str, owner: &str) -> Task {
        Task::from_spec(
            owner,
            TaskSpec {
                task_id: Some(id.to_string()),
                subject: "000001".to_string(),
                market: Market::DomesticEquity,
                parameters: json!({}),
            },
        )
    }

    #[tokio::test]
    async fn test_upsert_idempotent() {
        let store = MemoryTaskStore::new();

        assert_eq!(
            store.upsert_new(task("t-1", "admin")).await.unwrap(),
            UpsertOutcome::Created
        );

        // 진행 상태를 만든 뒤 재제출
        store.update_status("t-1", TaskStatus::Running).await.unwrap();
        store.update_progress("t-1", 40, "fetching").await.unwrap();

        assert_eq!(
            store.upsert_new(task("t-1", "admin")).await.unwrap(),
            UpsertOutcome::AlreadyExists
        );

        // 재제출이 진행률을 리셋하지 않음
        let stored = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.progress_percent, 40);
    }

    #[tokio::test]
    async fn test_monotonic_progress() {
        let store = MemoryTaskStore::new();
        store.upsert_new(task("t-1", "admin")).await.unwrap();
        store.update_status("t-1", TaskStatus::Running).await.unwrap();

        store.update_progress("t-1", 60, "analyzing").await.unwrap();
        store.update_progress("t-1", 25, "stale checkpoint").await.unwrap();

        let stored = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(stored.progress_percent, 60);
    }

    #[tokio::test]
    async fn test_no_transition_out_of_terminal() {
        let store = MemoryTaskStore::new();
        store.upsert_new(task("t-1", "admin")).await.unwrap();
        store.update_status("t-1", TaskStatus::Running).await.unwrap();
        store.complete("t-1", "reports/t-1").await.unwrap();

        assert!(store.update_status("t-1", TaskStatus::Running).await.is_err());
        assert!(store.fail("t-1", "late failure").await.is_err());
        assert!(store.mark_cancelled("t-1").await.is_err());
    }

    #[tokio::test]
    async fn test_fail_keeps_progress() {
        let store = MemoryTaskStore::new();
        store.upsert_new(task("t-1", "admin")).await.unwrap();
        store.update_status("t-1", TaskStatus::Running).await.unwrap();
        store.update_progress("t-1", 25, "fetching market data").await.unwrap();

        store.fail("t-1", "no data available").await.unwrap();

        let stored = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.progress_percent, 25);
        assert_eq!(stored.error_message.as_deref(), Some("no data available"));
    }

    #[tokio::test]
    async fn test_mark_cancelled_idempotent() {
        let store = MemoryTaskStore::new();
        store.upsert_new(task("t-1", "admin")).await.unwrap();

        assert!(store.mark_cancelled("t-1").await.unwrap());
        assert!(!store.mark_cancelled("t-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_count_finished_before() {
        let store = MemoryTaskStore::new();
        store.upsert_new(task("done", "admin")).await.unwrap();
        store.upsert_new(task("active", "admin")).await.unwrap();

        store.update_status("done", TaskStatus::Running).await.unwrap();
        store.complete("done", "reports/done").await.unwrap();
        store.update_status("active", TaskStatus::Running).await.unwrap();

        let future = Utc::now() + chrono::Duration::hours(1);
        let past = Utc::now() - chrono::Duration::hours(1);

        // 실행 중 태스크는 집계되지 않음
        assert_eq!(store.count_finished_before(future).await.unwrap(), 1);
        assert_eq!(store.count_finished_before(past).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_by_owner_keys_any_of() {
        let store = MemoryTaskStore::new();
        store.upsert_new(task("t-1", "admin")).await.unwrap();
        store
            .upsert_new(task("t-2", "7b6a3c1e-0d9f-4f42-9a2f-3f3b1c2d4e5f"))
            .await
            .unwrap();
        store.upsert_new(task("t-3", "someone-else")).await.unwrap();

        let keys = vec![
            "admin".to_string(),
            "7b6a3c1e-0d9f-4f42-9a2f-3f3b1c2d4e5f".to_string(),
        ];
        let found = store.find_by_owner_keys(&keys).await.unwrap();

        let ids: Vec<&str> = found.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(found.len(), 2);
        assert!(ids.contains(&"t-1"));
        assert!(ids.contains(&"t-2"));
    }
}
