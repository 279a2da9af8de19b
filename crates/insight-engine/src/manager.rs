//! 태스크 매니저.
//!
//! 태스크 생명주기를 소유합니다: 검증 → 멱등 기록 → 워커 풀 실행 →
//! 체크포인트 기록 → 완료/실패. 모든 전이는 저장소에 기록되고
//! 진행 이벤트로도 방출됩니다. 취소는 체크포인트 경계에서 확인하는
//! 협조적 방식입니다.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use insight_core::{
    EngineConfig, EntityKind, ProgressEvent, SharedProgressSink, Task, TaskSpec, TaskStatus,
};
use insight_data::{resolve_window, DataSourceResolver};

use crate::analysis::AnalysisProvider;
use crate::error::{EngineError, Result};
use crate::owner::owner_candidate_keys;
use crate::store::{TaskStore, UpsertOutcome};

/// 제출 결과.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// 태스크 ID (기존 태스크가 있으면 그 ID)
    pub task_id: String,
    /// 이번 호출로 새 태스크가 생성됐는지 여부
    pub created: bool,
}

/// 취소 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// 대기 중이던 태스크가 즉시 취소됨
    Cancelled,
    /// 실행 중인 태스크에 취소 플래그가 설정됨 (다음 체크포인트에서 반영)
    CancellationRequested,
}

struct ManagerInner {
    store: Arc<dyn TaskStore>,
    resolver: Arc<DataSourceResolver>,
    analysis: Arc<dyn AnalysisProvider>,
    sink: SharedProgressSink,
    lookback_days: u32,
    admin_account_id: uuid::Uuid,
    /// 시스템 전체 동시 실행 한도. 초과 제출은 permit을 기다리며 queued로 남음.
    permits: Arc<Semaphore>,
    cancellations: RwLock<HashMap<String, CancellationToken>>,
}

/// 태스크 매니저.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    /// 새 태스크 매니저를 생성합니다.
    pub fn new(
        store: Arc<dyn TaskStore>,
        resolver: Arc<DataSourceResolver>,
        analysis: Arc<dyn AnalysisProvider>,
        sink: SharedProgressSink,
        config: EngineConfig,
        lookback_days: u32,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                resolver,
                analysis,
                sink,
                lookback_days,
                admin_account_id: config.admin_account_id,
                permits: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
                cancellations: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// 저장소 참조를 반환합니다.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    /// 태스크를 제출합니다.
    ///
    /// 검증 후 멱등 upsert를 수행하고 워커 풀에 실행을 예약합니다.
    /// 실행을 기다리지 않고 즉시 반환합니다. 같은 ID가 이미 존재하면
    /// no-op으로 기존 ID를 반환하므로 클라이언트 재시도가 안전합니다.
    pub async fn submit(&self, owner_id: &str, spec: TaskSpec) -> Result<SubmitOutcome> {
        spec.validate()
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let task = Task::from_spec(owner_id, spec);
        let task_id = task.task_id.clone();

        match self.inner.store.upsert_new(task).await? {
            UpsertOutcome::AlreadyExists => {
                info!(task_id = %task_id, "Duplicate submission ignored");
                Ok(SubmitOutcome {
                    task_id,
                    created: false,
                })
            }
            UpsertOutcome::Created => {
                let token = CancellationToken::new();
                self.inner
                    .cancellations
                    .write()
                    .await
                    .insert(task_id.clone(), token.clone());

                self.inner.sink.emit(
                    ProgressEvent::stage(EntityKind::Task, &task_id, "queued", 0)
                        .with_owner(owner_id),
                );

                let inner = Arc::clone(&self.inner);
                let id = task_id.clone();
                tokio::spawn(async move {
                    ManagerInner::run(inner, id, token).await;
                });

                info!(task_id = %task_id, owner = %owner_id, "Task submitted");
                Ok(SubmitOutcome {
                    task_id,
                    created: true,
                })
            }
        }
    }

    /// ID로 태스크를 조회합니다.
    pub async fn get(&self, task_id: &str) -> Result<Task> {
        self.inner
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))
    }

    /// 소유자의 태스크 목록을 조회합니다.
    ///
    /// 소유자 식별자의 레거시/신규 표현 모두와 일치하는 태스크를
    /// 반환합니다.
    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Task>> {
        let keys = owner_candidate_keys(owner_id, &self.inner.admin_account_id);
        self.inner.store.find_by_owner_keys(&keys).await
    }

    /// 태스크를 취소합니다 (best-effort).
    ///
    /// 대기 중이면 즉시 취소하고, 실행 중이면 다음 체크포인트에서
    /// 반영되는 취소 플래그를 설정합니다.
    pub async fn cancel(&self, task_id: &str) -> Result<CancelOutcome> {
        let task = self.get(task_id).await?;

        match task.status {
            TaskStatus::Queued => {
                // 워커가 시작하기 전에 토큰부터 취소
                if let Some(token) = self.inner.cancellations.read().await.get(task_id) {
                    token.cancel();
                }
                if self.inner.store.mark_cancelled(task_id).await? {
                    self.inner.sink.emit(
                        ProgressEvent::cancelled(EntityKind::Task, task_id)
                            .with_owner(&task.owner_id),
                    );
                }
                info!(task_id = %task_id, "Queued task cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            TaskStatus::Running => {
                match self.inner.cancellations.read().await.get(task_id) {
                    Some(token) => token.cancel(),
                    None => {
                        // 토큰이 없으면 취소를 반영할 워커도 없음
                        warn!(task_id = %task_id, "No cancellation token for running task");
                    }
                }
                info!(task_id = %task_id, "Cancellation requested");
                Ok(CancelOutcome::CancellationRequested)
            }
            _ => Err(EngineError::AlreadyFinished(task_id.to_string())),
        }
    }
}

impl ManagerInner {
    /// 워커 진입점. permit을 기다린 뒤 실행하고 토큰을 정리합니다.
    async fn run(inner: Arc<ManagerInner>, task_id: String, token: CancellationToken) {
        let permit = match Arc::clone(&inner.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        if let Err(e) = inner.execute(&task_id, &token).await {
            // 실행 실패는 execute 안에서 태스크에 기록됨. 여기 도달하면
            // 저장소 자체가 실패한 것이므로 로그만 남김.
            error!(task_id = %task_id, error = %e, "Task execution aborted");
        }

        drop(permit);
        inner.cancellations.write().await.remove(&task_id);
    }

    /// 체크포인트 경계의 취소 확인.
    async fn cancelled_at_checkpoint(
        &self,
        task_id: &str,
        owner_id: &str,
        token: &CancellationToken,
    ) -> Result<bool> {
        if !token.is_cancelled() {
            return Ok(false);
        }
        if self.store.mark_cancelled(task_id).await? {
            self.sink.emit(
                ProgressEvent::cancelled(EntityKind::Task, task_id).with_owner(owner_id),
            );
            info!(task_id = %task_id, "Task cancelled at checkpoint");
        }
        Ok(true)
    }

    /// 진행 체크포인트를 기록하고 이벤트를 방출합니다.
    async fn checkpoint(
        &self,
        task_id: &str,
        owner_id: &str,
        percent: u8,
        label: &str,
    ) -> Result<()> {
        self.store.update_progress(task_id, percent, label).await?;
        self.sink.emit(
            ProgressEvent::stage(EntityKind::Task, task_id, label, percent).with_owner(owner_id),
        );
        Ok(())
    }

    /// 태스크 실패를 기록하고 이벤트를 방출합니다.
    async fn fail_task(&self, task_id: &str, owner_id: &str, reason: &str) -> Result<()> {
        warn!(task_id = %task_id, reason = %reason, "Task failed");
        self.store.fail(task_id, reason).await?;
        self.sink
            .emit(ProgressEvent::failed(EntityKind::Task, task_id, reason).with_owner(owner_id));
        Ok(())
    }

    /// 단일 태스크 실행.
    async fn execute(&self, task_id: &str, token: &CancellationToken) -> Result<()> {
        let task = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))?;
        let owner = task.owner_id.clone();

        // 대기 중 취소된 경우 실행하지 않음
        if self.cancelled_at_checkpoint(task_id, &owner, token).await? {
            return Ok(());
        }

        self.store.update_status(task_id, TaskStatus::Running).await?;
        self.checkpoint(task_id, &owner, 5, "resolving query window").await?;

        // 파라미터의 target_date는 선택적 (YYYY-MM-DD)
        let target_date = task
            .parameters
            .get("target_date")
            .and_then(|v| v.as_str())
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
        let window = resolve_window(
            target_date,
            chrono::Utc::now().date_naive(),
            self.lookback_days,
        );

        if self.cancelled_at_checkpoint(task_id, &owner, token).await? {
            return Ok(());
        }
        self.checkpoint(task_id, &owner, 25, "fetching market data").await?;

        let data = match self.resolver.fetch(&task.subject, task.market, window).await {
            Ok(data) => data,
            Err(e) => {
                return self.fail_task(task_id, &owner, &e.to_string()).await;
            }
        };

        if self.cancelled_at_checkpoint(task_id, &owner, token).await? {
            return Ok(());
        }
        self.checkpoint(task_id, &owner, 60, "running analysis").await?;

        let result_ref = match self.analysis.analyze(&task, &data).await {
            Ok(result_ref) => result_ref,
            Err(e) => {
                return self.fail_task(task_id, &owner, &e.to_string()).await;
            }
        };

        if self.cancelled_at_checkpoint(task_id, &owner, token).await? {
            return Ok(());
        }
        self.checkpoint(task_id, &owner, 90, "saving report").await?;

        self.store.complete(task_id, &result_ref).await?;
        self.sink.emit(
            ProgressEvent::completed(
                EntityKind::Task,
                task_id,
                serde_json::json!({ "result_ref": result_ref, "progress": 100 }),
            )
            .with_owner(&owner),
        );

        info!(task_id = %task_id, result_ref = %result_ref, "Task succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StubAnalysisProvider;
    use crate::store::MemoryTaskStore;
    use async_trait::async_trait;
    use insight_core::{DailyBar, Market, NormalizedResult, ProgressSink};
    use insight_data::provider::{DataProvider, ScriptedProvider};
    use insight_data::source::DataSourceConfig;
    use insight_data::SourceRegistry;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 이벤트를 수집하는 테스트 sink.
    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for CollectingSink {
        fn emit(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl CollectingSink {
        fn event_types(&self) -> Vec<insight_core::ProgressEventType> {
            self.events.lock().unwrap().iter().map(|e| e.event_type).collect()
        }
    }

    fn bar(d: u32) -> DailyBar {
        DailyBar {
            date: chrono::NaiveDate::from_ymd_opt(2025, 6, d).unwrap(),
            open: dec!(10),
            high: dec!(11),
            low: dec!(9),
            close: dec!(10.5),
            volume: dec!(1000),
            pct_change: None,
        }
    }

    fn source_config(name: &str, priority: i32) -> DataSourceConfig {
        DataSourceConfig {
            name: name.to_string(),
            priority,
            enabled: true,
            markets: HashSet::from([Market::DomesticEquity]),
            timeout: Duration::from_secs(5),
            rate_limit_per_minute: 60,
        }
    }

    fn spec(id: Option<&str>, subject: &str) -> TaskSpec {
        TaskSpec {
            task_id: id.map(|s| s.to_string()),
            subject: subject.to_string(),
            market: Market::DomesticEquity,
            parameters: json!({}),
        }
    }

    struct Harness {
        manager: TaskManager,
        store: Arc<MemoryTaskStore>,
        sink: Arc<CollectingSink>,
    }

    async fn harness(providers: Vec<(DataSourceConfig, Arc<ScriptedProvider>)>) -> Harness {
        harness_with(providers, Arc::new(StubAnalysisProvider), 4).await
    }

    async fn harness_with(
        providers: Vec<(DataSourceConfig, Arc<ScriptedProvider>)>,
        analysis: Arc<dyn AnalysisProvider>,
        max_concurrent: usize,
    ) -> Harness {
        let registry = Arc::new(SourceRegistry::new());
        for (cfg, provider) in providers {
            registry.register(cfg, provider as Arc<dyn DataProvider>).await;
        }

        let store = Arc::new(MemoryTaskStore::new());
        let sink = Arc::new(CollectingSink::default());
        let config = EngineConfig {
            max_concurrent_tasks: max_concurrent,
            ..Default::default()
        };

        let manager = TaskManager::new(
            Arc::clone(&store) as Arc<dyn TaskStore>,
            Arc::new(DataSourceResolver::new(registry, 3)),
            analysis,
            Arc::clone(&sink) as SharedProgressSink,
            config,
            10,
        );

        Harness { manager, store, sink }
    }

    async fn wait_for_status(store: &MemoryTaskStore, task_id: &str, status: TaskStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(task) = store.get(task_id).await.unwrap() {
                    if task.status == status {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("task {} did not reach {:?}", task_id, status));
    }

    #[tokio::test]
    async fn test_happy_path_succeeds_with_result_ref() {
        let provider = Arc::new(ScriptedProvider::new("tushare"));
        provider.push_bars(vec![bar(18), bar(19), bar(20)]);

        let h = harness(vec![(source_config("tushare", 30), provider)]).await;

        let outcome = h.manager.submit("admin", spec(None, "000001")).await.unwrap();
        assert!(outcome.created);

        wait_for_status(&h.store, &outcome.task_id, TaskStatus::Succeeded).await;

        let task = h.store.get(&outcome.task_id).await.unwrap().unwrap();
        assert!(task.result_ref.is_some());
        assert_eq!(task.progress_percent, 100);

        // stage 이벤트들 뒤에 completed가 옴
        let types = h.sink.event_types();
        assert_eq!(*types.last().unwrap(), insight_core::ProgressEventType::Completed);
    }

    #[tokio::test]
    async fn test_idempotent_submission() {
        let provider = Arc::new(ScriptedProvider::new("tushare"));
        provider.push_bars(vec![bar(20)]);

        let h = harness(vec![(source_config("tushare", 30), provider)]).await;

        let first = h
            .manager
            .submit("admin", spec(Some("retry-1"), "000001"))
            .await
            .unwrap();
        assert!(first.created);

        wait_for_status(&h.store, "retry-1", TaskStatus::Succeeded).await;

        // 재제출은 no-op이며 같은 ID를 반환
        let second = h
            .manager
            .submit("admin", spec(Some("retry-1"), "000001"))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.task_id, first.task_id);

        // 기존 결과가 리셋되지 않음
        let task = h.store.get("retry-1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_validation_rejected_before_store() {
        let h = harness(vec![]).await;

        let result = h.manager.submit("admin", spec(Some("bad"), "")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));

        // 저장소에 들어가지 않음
        assert!(h.store.get("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_providers_down_fails_with_progress_intact() {
        let a = Arc::new(ScriptedProvider::new("a"));
        a.push_error("connection refused");
        let b = Arc::new(ScriptedProvider::new("b"));
        b.push_error("http 503");
        let c = Arc::new(ScriptedProvider::new("c"));
        c.push_error("timeout");

        let h = harness(vec![
            (source_config("a", 30), a),
            (source_config("b", 20), b),
            (source_config("c", 10), c),
        ])
        .await;

        let outcome = h.manager.submit("admin", spec(None, "000001")).await.unwrap();
        wait_for_status(&h.store, &outcome.task_id, TaskStatus::Failed).await;

        let task = h.store.get(&outcome.task_id).await.unwrap().unwrap();
        assert!(task.error_message.unwrap().contains("No data available"));
        // 마지막 성공 체크포인트의 진행률 유지
        assert_eq!(task.progress_percent, 25);
        assert_eq!(task.stage_label, "fetching market data");
    }

    #[tokio::test]
    async fn test_cancel_queued_task() {
        // 분석 단계에서 영원히 기다리는 collaborator로 슬롯을 점유
        struct BlockingAnalysis {
            release: Arc<tokio::sync::Notify>,
        }

        #[async_trait]
        impl AnalysisProvider for BlockingAnalysis {
            async fn analyze(&self, task: &Task, _data: &NormalizedResult) -> Result<String> {
                self.release.notified().await;
                Ok(format!("reports/{}", task.task_id))
            }
        }

        let release = Arc::new(tokio::sync::Notify::new());
        let provider = Arc::new(ScriptedProvider::new("tushare"));
        provider.push_bars(vec![bar(20)]);
        provider.push_bars(vec![bar(20)]);

        let h = harness_with(
            vec![(source_config("tushare", 30), provider)],
            Arc::new(BlockingAnalysis {
                release: Arc::clone(&release),
            }),
            1,
        )
        .await;

        // 첫 태스크가 유일한 슬롯을 점유
        let first = h.manager.submit("admin", spec(Some("t-1"), "000001")).await.unwrap();
        wait_for_status(&h.store, &first.task_id, TaskStatus::Running).await;

        // 둘째 태스크는 queued로 남음
        let second = h.manager.submit("admin", spec(Some("t-2"), "000002")).await.unwrap();
        let queued = h.store.get("t-2").await.unwrap().unwrap();
        assert_eq!(queued.status, TaskStatus::Queued);

        // queued 상태에서 취소 → 즉시 cancelled
        let outcome = h.manager.cancel("t-2").await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        wait_for_status(&h.store, "t-2", TaskStatus::Cancelled).await;

        // 첫 태스크는 정상 완료
        release.notify_waiters();
        wait_for_status(&h.store, "t-1", TaskStatus::Succeeded).await;

        let _ = second;
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_rejected() {
        let provider = Arc::new(ScriptedProvider::new("tushare"));
        provider.push_bars(vec![bar(20)]);

        let h = harness(vec![(source_config("tushare", 30), provider)]).await;
        let outcome = h.manager.submit("admin", spec(None, "000001")).await.unwrap();
        wait_for_status(&h.store, &outcome.task_id, TaskStatus::Succeeded).await;

        let result = h.manager.cancel(&outcome.task_id).await;
        assert!(matches!(result, Err(EngineError::AlreadyFinished(_))));
    }

    #[tokio::test]
    async fn test_worker_pool_caps_concurrent_running() {
        struct GatedAnalysis {
            release: Arc<tokio::sync::Notify>,
        }

        #[async_trait]
        impl AnalysisProvider for GatedAnalysis {
            async fn analyze(&self, task: &Task, _data: &NormalizedResult) -> Result<String> {
                self.release.notified().await;
                Ok(format!("reports/{}", task.task_id))
            }
        }

        let release = Arc::new(tokio::sync::Notify::new());
        let provider = Arc::new(ScriptedProvider::new("tushare"));
        for _ in 0..3 {
            provider.push_bars(vec![bar(20)]);
        }

        let h = harness_with(
            vec![(source_config("tushare", 30), provider)],
            Arc::new(GatedAnalysis {
                release: Arc::clone(&release),
            }),
            1,
        )
        .await;

        for i in 0..3 {
            h.manager
                .submit("admin", spec(Some(&format!("cap-{}", i)), "000001"))
                .await
                .unwrap();
        }

        // 슬롯이 1개이므로 실행 중 태스크는 최대 1개
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut running = 0;
        for i in 0..3 {
            let task = h.store.get(&format!("cap-{}", i)).await.unwrap().unwrap();
            if task.status == TaskStatus::Running {
                running += 1;
            }
        }
        assert_eq!(running, 1);

        // 모두 완료될 때까지 반복 release
        for _ in 0..30 {
            release.notify_waiters();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for i in 0..3 {
            wait_for_status(&h.store, &format!("cap-{}", i), TaskStatus::Succeeded).await;
        }
    }

    #[tokio::test]
    async fn test_list_for_owner_matches_both_representations() {
        let admin_uuid = uuid::Uuid::parse_str("7b6a3c1e-0d9f-4f42-9a2f-3f3b1c2d4e5f").unwrap();

        let registry = Arc::new(SourceRegistry::new());
        let store = Arc::new(MemoryTaskStore::new());
        let manager = TaskManager::new(
            Arc::clone(&store) as Arc<dyn TaskStore>,
            Arc::new(DataSourceResolver::new(registry, 3)),
            Arc::new(StubAnalysisProvider),
            Arc::new(insight_core::NullSink),
            EngineConfig {
                max_concurrent_tasks: 1,
                admin_account_id: admin_uuid,
            },
            10,
        );

        // 레거시 센티널 표현과 UUID 표현이 섞여 저장된 상태
        store
            .upsert_new(Task::from_spec("admin", spec(Some("legacy"), "000001")))
            .await
            .unwrap();
        store
            .upsert_new(Task::from_spec(
                admin_uuid.to_string(),
                spec(Some("modern"), "600519"),
            ))
            .await
            .unwrap();
        store
            .upsert_new(Task::from_spec("other-user", spec(Some("other"), "000002")))
            .await
            .unwrap();

        let tasks = manager.list_for_owner("admin").await.unwrap();
        let ids: Vec<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();

        assert_eq!(tasks.len(), 2);
        assert!(ids.contains(&"legacy"));
        assert!(ids.contains(&"modern"));
    }
}
