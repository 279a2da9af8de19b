//! 스케줄러 서비스.
//!
//! 잡 조회/일시정지/재개/수동 트리거/이력/통계를 제공합니다.
//! 엔진 루프는 주기적으로 due 잡을 확인해 실행하며, 잡 실패는
//! 이력에 기록될 뿐 루프를 중단시키지 않습니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use insight_core::{EntityKind, ProgressEvent, SchedulerConfig, SharedProgressSink};

use crate::error::{Result, SchedulerError};
use crate::history::{HistoryAction, HistoryLog, HistoryStatus, JobHistoryEntry};
use crate::job::{JobContext, JobDefinition, TriggerSpec};

/// 잡 실행/건너뜀 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// 실행이 시작됨
    Started,
    /// 동시 실행 한도로 건너뜀 (이력에 기록됨)
    Skipped,
}

/// 조회용 잡 정보.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    /// 잡 ID
    pub id: String,
    /// 표시 이름
    pub display_name: String,
    /// 설명
    pub description: String,
    /// 트리거 표현
    pub trigger: String,
    /// 일시정지 여부
    pub paused: bool,
    /// 다음 실행 시각 (일시정지 시 None)
    pub next_run_time: Option<DateTime<Utc>>,
    /// 동시 실행 한도
    pub max_instances: usize,
    /// 현재 실행 중인 인스턴스 수
    pub running_instances: usize,
}

/// 스케줄러 통계.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// 전체 잡 수
    pub total_jobs: usize,
    /// 활성(일시정지 아님) 잡 수
    pub running_jobs: usize,
    /// 일시정지된 잡 수
    pub paused_jobs: usize,
    /// 엔진 루프 동작 여부
    pub scheduler_running: bool,
}

/// 스케줄러 헬스 상태.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerHealth {
    /// "healthy" | "stopped"
    pub status: String,
    /// 엔진 루프 동작 여부
    pub running: bool,
    /// 등록된 잡 수
    pub job_count: usize,
    /// 현재 시각
    pub timestamp: DateTime<Utc>,
}

struct JobEntry {
    def: JobDefinition,
    display_name: String,
    description: String,
    paused: bool,
    next_run_time: Option<DateTime<Utc>>,
    running: Arc<AtomicUsize>,
}

struct SchedulerInner {
    jobs: RwLock<Vec<JobEntry>>,
    history: Mutex<HistoryLog>,
    sink: SharedProgressSink,
    engine_running: AtomicBool,
    tick_interval: Duration,
}

/// 스케줄러 서비스.
#[derive(Clone)]
pub struct SchedulerService {
    inner: Arc<SchedulerInner>,
}

impl SchedulerService {
    /// 새 스케줄러 서비스를 생성합니다.
    pub fn new(config: SchedulerConfig, sink: SharedProgressSink) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: RwLock::new(Vec::new()),
                history: Mutex::new(HistoryLog::new(config.history_limit)),
                sink,
                engine_running: AtomicBool::new(false),
                tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            }),
        }
    }

    /// 잡을 등록합니다.
    pub async fn register(&self, def: JobDefinition) -> Result<()> {
        def.trigger.validate()?;

        let mut jobs = self.inner.jobs.write().await;
        if jobs.iter().any(|j| j.def.job_id == def.job_id) {
            return Err(SchedulerError::DuplicateJob(def.job_id));
        }

        let next_run_time = def.trigger.next_after(Utc::now());
        info!(
            job_id = %def.job_id,
            trigger = %def.trigger.describe(),
            "Job registered"
        );

        jobs.push(JobEntry {
            display_name: def.display_name.clone(),
            description: def.description.clone(),
            paused: false,
            next_run_time,
            running: Arc::new(AtomicUsize::new(0)),
            def,
        });
        Ok(())
    }

    /// 엔진 루프를 시작합니다.
    pub fn start(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        inner.engine_running.store(true, Ordering::SeqCst);
        info!(tick_secs = inner.tick_interval.as_secs(), "Scheduler engine started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        SchedulerInner::tick(&inner, Utc::now()).await;
                    }
                }
            }

            inner.engine_running.store(false, Ordering::SeqCst);
            info!("Scheduler engine stopped");
        })
    }

    /// 모든 잡 목록을 조회합니다.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.inner.jobs.read().await;
        jobs.iter().map(JobEntry::to_info).collect()
    }

    /// 잡 상세를 조회합니다.
    pub async fn get_job(&self, job_id: &str) -> Result<JobInfo> {
        let jobs = self.inner.jobs.read().await;
        jobs.iter()
            .find(|j| j.def.job_id == job_id)
            .map(JobEntry::to_info)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }

    /// 잡을 일시정지합니다.
    ///
    /// 일시정지는 예정 실행만 억제합니다. 수동 트리거는 여전히 동작합니다.
    pub async fn pause(&self, job_id: &str) -> Result<()> {
        {
            let mut jobs = self.inner.jobs.write().await;
            let entry = jobs
                .iter_mut()
                .find(|j| j.def.job_id == job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            entry.paused = true;
            entry.next_run_time = None;
        }

        info!(job_id = %job_id, "Job paused");
        self.inner
            .record(job_id, HistoryAction::Pause, HistoryStatus::Success, None, None);
        Ok(())
    }

    /// 잡을 재개합니다.
    ///
    /// 다음 실행 시각은 현재 시각 기준으로 다시 계산합니다
    /// (일시정지 동안 놓친 실행은 따라잡지 않음).
    pub async fn resume(&self, job_id: &str) -> Result<()> {
        {
            let mut jobs = self.inner.jobs.write().await;
            let entry = jobs
                .iter_mut()
                .find(|j| j.def.job_id == job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            entry.paused = false;
            entry.next_run_time = entry.def.trigger.next_after(Utc::now());
        }

        info!(job_id = %job_id, "Job resumed");
        self.inner
            .record(job_id, HistoryAction::Resume, HistoryStatus::Success, None, None);
        Ok(())
    }

    /// 잡을 수동 트리거합니다 (예정 일정과 무관한 즉시 실행).
    ///
    /// `max_instances`에 도달해 있으면 실행은 큐잉되지 않고 건너뛴 것으로
    /// 기록됩니다.
    pub async fn trigger(&self, job_id: &str) -> Result<FireOutcome> {
        let exists = {
            let jobs = self.inner.jobs.read().await;
            jobs.iter().any(|j| j.def.job_id == job_id)
        };
        if !exists {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        }

        info!(job_id = %job_id, "Job triggered manually");
        Ok(SchedulerInner::fire(&self.inner, job_id, true).await)
    }

    /// 특정 잡의 이력을 조회합니다.
    pub async fn history(&self, job_id: &str, limit: usize, offset: usize) -> Vec<JobHistoryEntry> {
        self.inner
            .history
            .lock()
            .unwrap()
            .page_for_job(job_id, limit, offset)
    }

    /// 전체 이력을 조회합니다.
    pub async fn all_history(&self, limit: usize, offset: usize) -> Vec<JobHistoryEntry> {
        self.inner.history.lock().unwrap().page(limit, offset)
    }

    /// 잡 메타데이터(표시 이름/설명)를 갱신합니다.
    pub async fn update_metadata(
        &self,
        job_id: &str,
        display_name: Option<String>,
        description: Option<String>,
    ) -> Result<()> {
        let mut jobs = self.inner.jobs.write().await;
        let entry = jobs
            .iter_mut()
            .find(|j| j.def.job_id == job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        if let Some(name) = display_name {
            entry.display_name = name;
        }
        if let Some(desc) = description {
            entry.description = desc;
        }

        info!(job_id = %job_id, "Job metadata updated");
        Ok(())
    }

    /// 스케줄러 통계를 조회합니다.
    pub async fn stats(&self) -> SchedulerStats {
        let jobs = self.inner.jobs.read().await;
        let total = jobs.len();
        let paused = jobs.iter().filter(|j| j.paused).count();

        SchedulerStats {
            total_jobs: total,
            running_jobs: total - paused,
            paused_jobs: paused,
            scheduler_running: self.inner.engine_running.load(Ordering::SeqCst),
        }
    }

    /// 스케줄러 헬스 상태를 조회합니다.
    pub async fn health(&self) -> SchedulerHealth {
        let running = self.inner.engine_running.load(Ordering::SeqCst);
        SchedulerHealth {
            status: if running { "healthy" } else { "stopped" }.to_string(),
            running,
            job_count: self.inner.jobs.read().await.len(),
            timestamp: Utc::now(),
        }
    }

    /// 엔진 루프 동작 여부.
    pub fn is_running(&self) -> bool {
        self.inner.engine_running.load(Ordering::SeqCst)
    }
}

impl JobEntry {
    fn to_info(&self) -> JobInfo {
        JobInfo {
            id: self.def.job_id.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            trigger: self.def.trigger.describe(),
            paused: self.paused,
            next_run_time: self.next_run_time,
            max_instances: self.def.max_instances,
            running_instances: self.running.load(Ordering::SeqCst),
        }
    }
}

impl SchedulerInner {
    fn record(
        &self,
        job_id: &str,
        action: HistoryAction,
        status: HistoryStatus,
        message: Option<String>,
        duration_ms: Option<u64>,
    ) {
        self.history.lock().unwrap().push(JobHistoryEntry {
            job_id: job_id.to_string(),
            action,
            status,
            message,
            timestamp: Utc::now(),
            duration_ms,
        });
    }

    /// due 잡들을 확인해 실행합니다.
    async fn tick(inner: &Arc<SchedulerInner>, now: DateTime<Utc>) {
        let due: Vec<String> = {
            let mut jobs = inner.jobs.write().await;
            let mut due = Vec::new();
            for entry in jobs.iter_mut() {
                if entry.paused {
                    continue;
                }
                match entry.next_run_time {
                    Some(next) if next <= now => {
                        entry.next_run_time = entry.def.trigger.next_after(now);
                        due.push(entry.def.job_id.clone());
                    }
                    Some(_) => {}
                    None => {
                        // 재개 전 일시정지 흔적. 다음 실행 시각 복구.
                        entry.next_run_time = entry.def.trigger.next_after(now);
                    }
                }
            }
            due
        };

        for job_id in due {
            Self::fire(inner, &job_id, false).await;
        }
    }

    /// 잡 실행을 시작합니다. 한도 도달 시 건너뛰고 기록합니다.
    async fn fire(inner: &Arc<SchedulerInner>, job_id: &str, manual: bool) -> FireOutcome {
        let action = if manual {
            HistoryAction::Trigger
        } else {
            HistoryAction::Run
        };

        let (runner, max_instances, running) = {
            let jobs = inner.jobs.read().await;
            let entry = match jobs.iter().find(|j| j.def.job_id == job_id) {
                Some(entry) => entry,
                None => return FireOutcome::Skipped,
            };
            (
                Arc::clone(&entry.def.runner),
                entry.def.max_instances,
                Arc::clone(&entry.running),
            )
        };

        // 한도 확인과 카운터 증가를 원자적으로 수행
        let acquired = running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_instances).then_some(n + 1)
            })
            .is_ok();

        if !acquired {
            warn!(
                job_id = %job_id,
                max_instances = max_instances,
                "Job fire skipped: max instances reached"
            );
            inner.record(
                job_id,
                action,
                HistoryStatus::Skipped,
                Some(format!("max_instances ({}) reached", max_instances)),
                None,
            );
            return FireOutcome::Skipped;
        }

        let inner = Arc::clone(inner);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            let fired_at = Utc::now();
            let started = Instant::now();

            inner
                .sink
                .emit(ProgressEvent::stage(EntityKind::Job, &job_id, "started", 0));

            let result = runner
                .run(JobContext {
                    job_id: job_id.clone(),
                    fired_at,
                    manual,
                })
                .await;

            let duration_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(outcome) => {
                    info!(job_id = %job_id, duration_ms = duration_ms, "Job run succeeded");
                    inner.record(
                        &job_id,
                        action,
                        HistoryStatus::Success,
                        outcome.detail.clone(),
                        Some(duration_ms),
                    );
                    inner.sink.emit(ProgressEvent::completed(
                        EntityKind::Job,
                        &job_id,
                        serde_json::json!({ "detail": outcome.detail, "duration_ms": duration_ms }),
                    ));
                }
                Err(e) => {
                    // 실패는 기록만 하고 잡은 다음 주기에 다시 실행됨
                    warn!(job_id = %job_id, error = %e, "Job run failed");
                    inner.record(
                        &job_id,
                        action,
                        HistoryStatus::Failed,
                        Some(e.to_string()),
                        Some(duration_ms),
                    );
                    inner
                        .sink
                        .emit(ProgressEvent::failed(EntityKind::Job, &job_id, &e.to_string()));
                }
            }

            running.fetch_sub(1, Ordering::SeqCst);
        });

        FireOutcome::Started
    }
}
