//! 모든 핸들러에서 공유되는 애플리케이션 상태.
//!
//! Arc로 래핑되어 여러 요청 간에 안전하게 공유됩니다.

use std::sync::Arc;

use insight_data::SourceRegistry;
use insight_engine::{TaskManager, TaskStore};
use insight_scheduler::SchedulerService;

use crate::hub::NotificationHub;

/// 애플리케이션 공유 상태.
#[derive(Clone)]
pub struct AppState {
    /// 태스크 매니저 - 제출/조회/취소와 워커 풀 실행
    pub task_manager: TaskManager,

    /// 스케줄러 서비스 - 백그라운드 잡 관리
    pub scheduler: SchedulerService,

    /// 알림 허브 - 실시간 이벤트 fan-out
    pub hub: Arc<NotificationHub>,

    /// 태스크 저장소 (헬스 체크용 직접 참조)
    pub store: Arc<dyn TaskStore>,

    /// 데이터 소스 registry (헬스 체크용)
    pub registry: Arc<SourceRegistry>,

    /// JWT 시크릿 (실시간 채널 토큰 검증용)
    pub jwt_secret: String,

    /// 서버 시작 시간 (업타임 계산용)
    pub started_at: chrono::DateTime<chrono::Utc>,

    /// API 버전
    pub version: String,
}

impl AppState {
    /// 새 AppState를 생성합니다.
    pub fn new(
        task_manager: TaskManager,
        scheduler: SchedulerService,
        hub: Arc<NotificationHub>,
        store: Arc<dyn TaskStore>,
        registry: Arc<SourceRegistry>,
        jwt_secret: impl Into<String>,
    ) -> Self {
        Self {
            task_manager,
            scheduler,
            hub,
            store,
            registry,
            jwt_secret: jwt_secret.into(),
            started_at: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// 서버 업타임(초) 반환.
    pub fn uptime_secs(&self) -> i64 {
        chrono::Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds()
    }

    /// 태스크 저장소 연결 상태 확인.
    pub async fn is_store_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

#[cfg(test)]
pub(crate) const TEST_JWT_SECRET: &str = "test-secret-key-for-jwt-testing-minimum-32-chars";

/// 테스트용 AppState 생성 헬퍼.
///
/// 인메모리 저장소와 scripted provider로 실제 외부 연결 없이 동작하는
/// 상태를 만듭니다. provider에는 넉넉한 응답을 미리 넣어 둡니다.
#[cfg(test)]
pub(crate) async fn create_test_state() -> Arc<AppState> {
    use insight_engine::StubAnalysisProvider;

    create_test_state_with(Arc::new(StubAnalysisProvider)).await
}

/// 분석 collaborator를 지정하는 테스트 상태 헬퍼.
#[cfg(test)]
pub(crate) async fn create_test_state_with(
    analysis: std::sync::Arc<dyn insight_engine::AnalysisProvider>,
) -> Arc<AppState> {
    use chrono::NaiveDate;
    use insight_core::{DailyBar, EngineConfig, Market, SchedulerConfig, SharedProgressSink};
    use insight_data::provider::{DataProvider, ScriptedProvider};
    use insight_data::source::DataSourceConfig;
    use insight_data::DataSourceResolver;
    use insight_engine::MemoryTaskStore;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;
    use std::time::Duration;

    let provider = Arc::new(ScriptedProvider::new("scripted"));
    for day in 1..=16 {
        provider.push_bars(vec![DailyBar {
            date: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
            open: dec!(10),
            high: dec!(11),
            low: dec!(9),
            close: dec!(10.5),
            volume: dec!(1000),
            pct_change: None,
        }]);
    }

    let registry = Arc::new(SourceRegistry::new());
    registry
        .register(
            DataSourceConfig {
                name: "scripted".to_string(),
                priority: 10,
                enabled: true,
                markets: HashSet::from([
                    Market::DomesticEquity,
                    Market::CrossBorderEquity,
                    Market::UsEquity,
                ]),
                timeout: Duration::from_secs(5),
                rate_limit_per_minute: 60,
            },
            provider as Arc<dyn DataProvider>,
        )
        .await;

    let hub = Arc::new(NotificationHub::new(256, uuid::Uuid::nil()));
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = Arc::new(DataSourceResolver::new(Arc::clone(&registry), 3));

    let task_manager = TaskManager::new(
        Arc::clone(&store) as Arc<dyn TaskStore>,
        resolver,
        analysis,
        Arc::clone(&hub) as SharedProgressSink,
        EngineConfig::default(),
        10,
    );

    let scheduler = SchedulerService::new(SchedulerConfig::default(), Arc::clone(&hub) as SharedProgressSink);

    Arc::new(AppState::new(
        task_manager,
        scheduler,
        hub,
        store as Arc<dyn TaskStore>,
        registry,
        TEST_JWT_SECRET,
    ))
}
