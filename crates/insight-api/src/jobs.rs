//! 서버가 등록하는 기본 백그라운드 잡.
//!
//! 사용자 태스크와 독립적으로 스케줄러가 실행합니다.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use insight_core::Market;
use insight_data::{resolve_window, DataSourceResolver};
use insight_engine::TaskStore;
use insight_scheduler::{JobContext, JobOutcome, JobRunner, SchedulerError};

/// 시장 데이터 동기화 잡.
///
/// 구성된 종목들을 resolver를 통해 미리 당겨 와 provider 체인 상태를
/// 점검하고 하위 캐시 계층을 덥혀 둡니다. 일부 종목 실패는 잡 실패가
/// 아니며, 전 종목 실패만 실패로 기록됩니다.
pub struct MarketDataSyncJob {
    resolver: Arc<DataSourceResolver>,
    symbols: Vec<String>,
    market: Market,
    lookback_days: u32,
}

impl MarketDataSyncJob {
    /// 새 동기화 잡을 생성합니다.
    pub fn new(
        resolver: Arc<DataSourceResolver>,
        symbols: Vec<String>,
        market: Market,
        lookback_days: u32,
    ) -> Self {
        Self {
            resolver,
            symbols,
            market,
            lookback_days,
        }
    }
}

#[async_trait]
impl JobRunner for MarketDataSyncJob {
    async fn run(&self, ctx: JobContext) -> insight_scheduler::Result<JobOutcome> {
        if self.symbols.is_empty() {
            return Ok(JobOutcome::with_detail("no symbols configured"));
        }

        let window = resolve_window(None, Utc::now().date_naive(), self.lookback_days);
        let mut synced = 0usize;
        let mut failed = 0usize;

        for symbol in &self.symbols {
            match self.resolver.fetch(symbol, self.market, window).await {
                Ok(result) => {
                    synced += 1;
                    debug!(
                        job_id = %ctx.job_id,
                        symbol = %symbol,
                        source = %result.source,
                        bars = result.bars.len(),
                        "Symbol synced"
                    );
                }
                Err(e) => {
                    failed += 1;
                    warn!(job_id = %ctx.job_id, symbol = %symbol, error = %e, "Symbol sync failed");
                }
            }
        }

        if synced == 0 {
            return Err(SchedulerError::ExecutionFailed(format!(
                "all {} symbols failed",
                failed
            )));
        }

        Ok(JobOutcome::with_detail(format!(
            "synced {} symbols, {} failed",
            synced, failed
        )))
    }
}

/// 태스크 보존 집계 잡.
///
/// core는 태스크를 물리 삭제하지 않으므로, 보존 기한을 넘긴 종료
/// 태스크 수를 집계해 외부 보존/GC collaborator가 참고할 기록만
/// 남깁니다.
pub struct RetentionSweepJob {
    store: Arc<dyn TaskStore>,
    retention: chrono::Duration,
}

impl RetentionSweepJob {
    /// 보존 기간(일)으로 잡을 생성합니다.
    pub fn new(store: Arc<dyn TaskStore>, retention_days: i64) -> Self {
        Self {
            store,
            retention: chrono::Duration::days(retention_days.max(1)),
        }
    }
}

#[async_trait]
impl JobRunner for RetentionSweepJob {
    async fn run(&self, ctx: JobContext) -> insight_scheduler::Result<JobOutcome> {
        let cutoff = Utc::now() - self.retention;
        let count = self
            .store
            .count_finished_before(cutoff)
            .await
            .map_err(|e| SchedulerError::ExecutionFailed(e.to_string()))?;

        debug!(job_id = %ctx.job_id, cutoff = %cutoff, count = count, "Retention sweep completed");
        Ok(JobOutcome::with_detail(format!(
            "{} finished tasks past retention",
            count
        )))
    }
}
