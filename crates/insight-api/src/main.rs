//! 주식 분석 API 서버.
//!
//! Axum 기반 REST + WebSocket + SSE 서버를 시작합니다.
//! 설정 로드 → 저장소/데이터 소스/엔진/스케줄러/허브 wiring →
//! 라우터 구성 → graceful shutdown 순서로 동작합니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use insight_api::hub::NotificationHub;
use insight_api::jobs::{MarketDataSyncJob, RetentionSweepJob};
use insight_api::metrics::{metrics_layer, setup_metrics_recorder};
use insight_api::routes::create_api_router;
use insight_api::sse::stream_router;
use insight_api::state::AppState;
use insight_api::ws::notifications_ws_router;
use insight_core::{
    init_logging, AppConfig, DataSourceSettings, LogConfig, Market,
};
use insight_data::provider::{AkshareProvider, DataProvider, SinaProvider, TushareProvider};
use insight_data::source::DataSourceConfig;
use insight_data::{DataSourceResolver, SourceRegistry};
use insight_engine::{
    MemoryTaskStore, PgTaskStore, StubAnalysisProvider, TaskManager, TaskStore,
};
use insight_scheduler::{JobDefinition, SchedulerService, TriggerSpec};

/// 태스크 보존 기한 (일). 외부 GC collaborator 기준과 맞춰야 합니다.
const TASK_RETENTION_DAYS: i64 = 30;

/// 설정된 소스 목록으로 provider registry를 구성합니다.
///
/// provider 자격 증명은 환경 변수로 공급됩니다. 자격 증명이 없는
/// 소스는 건너뛰고 경고만 남깁니다 (나머지 체인은 정상 동작).
async fn build_registry(settings: &DataSourceSettings) -> Arc<SourceRegistry> {
    let registry = SourceRegistry::new();

    for entry in &settings.sources {
        let provider: Arc<dyn DataProvider> = match entry.name.as_str() {
            "tushare" => match std::env::var("TUSHARE_TOKEN") {
                Ok(token) if !token.is_empty() => Arc::new(TushareProvider::new(token)),
                _ => {
                    warn!("TUSHARE_TOKEN not set, skipping tushare source");
                    continue;
                }
            },
            "akshare" => {
                let base_url = std::env::var("AKTOOLS_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
                Arc::new(AkshareProvider::new(base_url))
            }
            "sina" => Arc::new(SinaProvider::new()),
            other => {
                warn!(source = %other, "Unknown data source name, skipping");
                continue;
            }
        };

        registry.register(DataSourceConfig::from(entry), provider).await;
    }

    if registry.is_empty().await {
        warn!("No data sources registered, every fetch will fail with NoDataAvailable");
    }
    Arc::new(registry)
}

/// 태스크 저장소를 구성합니다.
///
/// `database.url`이 비어 있으면 인메모리 저장소로 동작합니다
/// (개발/테스트 모드, 프로세스 재시작 시 내용이 사라짐).
async fn build_store(config: &AppConfig) -> Arc<dyn TaskStore> {
    if config.database.url.is_empty() {
        warn!("database.url not set, using in-memory task store");
        return Arc::new(MemoryTaskStore::new());
    }

    match PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.connection_timeout_secs))
        .connect(&config.database.url)
        .await
    {
        Ok(pool) => {
            let store = PgTaskStore::new(pool);
            match store.migrate().await {
                Ok(()) => info!("Connected to PostgreSQL, migrations applied"),
                Err(e) => error!(error = %e, "Migration failed"),
            }
            Arc::new(store)
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database, falling back to in-memory store");
            Arc::new(MemoryTaskStore::new())
        }
    }
}

/// 기본 백그라운드 잡을 등록합니다.
async fn register_builtin_jobs(
    scheduler: &SchedulerService,
    resolver: Arc<DataSourceResolver>,
    store: Arc<dyn TaskStore>,
    config: &AppConfig,
) {
    let sync_job = JobDefinition::new(
        "market-data-sync",
        "Market data sync",
        // 평일 08:30 (UTC)
        TriggerSpec::Cron("0 30 8 * * MON-FRI".to_string()),
        Arc::new(MarketDataSyncJob::new(
            resolver,
            config.scheduler.sync_symbols.clone(),
            Market::DomesticEquity,
            config.data_sources.lookback_days,
        )),
    )
    .with_description("pulls configured symbols through the resolver chain")
    .with_max_instances(1);

    let sweep_job = JobDefinition::new(
        "task-retention-sweep",
        "Task retention sweep",
        TriggerSpec::Interval(Duration::from_secs(3600)),
        Arc::new(RetentionSweepJob::new(store, TASK_RETENTION_DAYS)),
    )
    .with_description("counts finished tasks past the retention window")
    .with_max_instances(1);

    for job in [sync_job, sweep_job] {
        let job_id = job.job_id.clone();
        if let Err(e) = scheduler.register(job).await {
            error!(job_id = %job_id, error = %e, "Failed to register builtin job");
        }
    }
}

/// CORS 미들웨어 구성.
///
/// `CORS_ORIGINS` 환경변수가 설정되어 있으면 해당 origin만 허용하고,
/// 없으면 개발 모드로 간주해 모든 origin을 허용합니다.
fn cors_layer() -> CorsLayer {
    let allow_origin = match std::env::var("CORS_ORIGINS") {
        Ok(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                warn!("CORS_ORIGINS is set but contains no valid origins, allowing any");
                AllowOrigin::any()
            } else {
                info!("CORS configured with {} allowed origins", origins.len());
                AllowOrigin::list(origins)
            }
        }
        _ => {
            warn!("CORS_ORIGINS not set, allowing any origin (development mode)");
            AllowOrigin::any()
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
        ])
        .max_age(Duration::from_secs(3600))
}

/// /metrics 엔드포인트 핸들러.
async fn metrics_handler(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> String {
    handle.render()
}

/// 전체 라우터 생성.
fn create_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    // 메트릭 라우터 (별도 상태)
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    // REST 라우터에만 전역 타임아웃 적용 (스트림 채널은 장수 연결)
    let rest_router = create_api_router().with_state(Arc::clone(&state)).layer(
        TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)),
    );

    Router::new()
        .merge(metrics_router)
        .merge(rest_router)
        .merge(stream_router().with_state(Arc::clone(&state)))
        .merge(notifications_ws_router().with_state(state))
        .layer(middleware::from_fn(metrics_layer))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 파일 로드 (있는 경우)
    let _ = dotenvy::dotenv();

    // 설정 및 로깅 초기화
    let config = AppConfig::load_default();
    let log_config = LogConfig {
        level: config.logging.level.clone(),
        format: config.logging.format.parse().unwrap_or_default(),
        ..Default::default()
    };
    init_logging(log_config).map_err(|e| anyhow::anyhow!("logging init failed: {e}"))?;

    info!("Starting Insight API server...");

    // Prometheus 메트릭 레코더 설정
    let metrics_handle = setup_metrics_recorder();

    // 전역 종료 토큰 (백그라운드 태스크로 전파)
    let shutdown_token = CancellationToken::new();

    // 데이터 소스 registry와 resolver
    let registry = build_registry(&config.data_sources).await;
    let resolver = Arc::new(DataSourceResolver::new(
        Arc::clone(&registry),
        config.data_sources.max_records,
    ));

    // 태스크 저장소
    let store = build_store(&config).await;

    // 알림 허브 + heartbeat 태스크
    let hub = Arc::new(NotificationHub::new(
        config.notifications.channel_capacity,
        config.engine.admin_account_id,
    ));
    let _heartbeat = hub.start_heartbeat(
        Duration::from_secs(config.notifications.heartbeat_interval_secs),
        shutdown_token.clone(),
    );

    // 태스크 매니저.
    // 분석 collaborator는 외부에서 주입되는 black box이며, 기본 구성은
    // wiring 확인용 stub을 사용합니다.
    let task_manager = TaskManager::new(
        Arc::clone(&store),
        Arc::clone(&resolver),
        Arc::new(StubAnalysisProvider),
        Arc::clone(&hub) as insight_core::SharedProgressSink,
        config.engine.clone(),
        config.data_sources.lookback_days,
    );

    // 스케줄러 + 기본 잡
    let scheduler = SchedulerService::new(
        config.scheduler.clone(),
        Arc::clone(&hub) as insight_core::SharedProgressSink,
    );
    register_builtin_jobs(&scheduler, resolver, Arc::clone(&store), &config).await;
    let _engine = scheduler.start(shutdown_token.clone());

    // 공유 상태
    let state = Arc::new(AppState::new(
        task_manager,
        scheduler,
        Arc::clone(&hub),
        store,
        registry,
        config.server.jwt_secret.clone(),
    ));

    info!(
        version = %state.version,
        sources = state.registry.len().await,
        jobs = state.scheduler.list_jobs().await.len(),
        "Application state initialized"
    );

    // 라우터 및 서버 시작
    let app = create_router(Arc::clone(&state), metrics_handle);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    info!(%addr, "API server listening");
    info!("WebSocket available at ws://{}/ws/notifications", addr);
    info!("SSE stream at http://{}/api/v1/notifications/stream", addr);
    info!("Metrics available at http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await?;

    // 종료 시그널 이후 정리: 백그라운드 태스크 중단, 허브 drain
    info!("Server shutdown initiated, cleaning up...");
    shutdown_token.cancel();
    hub.drain().await;

    info!("Server stopped gracefully");
    Ok(())
}

/// Graceful shutdown 시그널 대기.
///
/// Ctrl+C 또는 SIGTERM 시그널을 수신하면 종료 토큰을 취소합니다.
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    shutdown_token.cancel();
    info!("Shutdown signal propagated to background tasks");
}
