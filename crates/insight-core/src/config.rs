//! 설정 관리.
//!
//! 이 모듈은 애플리케이션 설정을 정의하고 관리합니다.
//! TOML 파일에서 로드한 뒤 `INSIGHT__` 접두사 환경 변수로 오버라이드합니다.

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::domain::market::Market;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// 서버 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 데이터베이스 설정
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 데이터 소스 설정
    #[serde(default)]
    pub data_sources: DataSourceSettings,
    /// 태스크 엔진 설정
    #[serde(default)]
    pub engine: EngineConfig,
    /// 스케줄러 설정
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// 실시간 알림 설정
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// 서버 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// 바인딩할 호스트
    pub host: String,
    /// 리스닝할 포트
    pub port: u16,
    /// JWT 서명 시크릿 (토큰 검증용)
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

fn default_jwt_secret() -> String {
    "insecure-dev-secret".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            jwt_secret: default_jwt_secret(),
        }
    }
}

/// 데이터베이스 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// 연결 URL (비어 있으면 인메모리 저장소로 동작)
    #[serde(default)]
    pub url: String,
    /// 최대 연결 수
    pub max_connections: u32,
    /// 연결 타임아웃 (초)
    pub connection_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            connection_timeout_secs: 30,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 단일 데이터 소스 항목.
///
/// 외부 관리 화면에서 구성되며, resolver 관점에서는 읽기 전용입니다.
/// 런타임 중 우선순위 변경은 registry 교체로 반영됩니다.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceEntry {
    /// 소스 이름 (provider 클라이언트 식별자)
    pub name: String,
    /// 우선순위 (높을수록 먼저 시도, 동률은 설정 순서 유지)
    pub priority: i32,
    /// 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 제공 가능한 시장 목록
    pub markets: Vec<Market>,
    /// 호출 타임아웃 (초)
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    /// 분당 요청 한도
    #[serde(default = "default_source_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_true() -> bool {
    true
}
fn default_source_timeout() -> u64 {
    15
}
fn default_source_rate_limit() -> u32 {
    60
}

/// 데이터 소스 해석 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataSourceSettings {
    /// 조회 구간 길이 (일). 주말/휴일을 덮기 위해 over-fetch합니다.
    pub lookback_days: u32,
    /// 분석 단계로 넘길 최대 레코드 수
    pub max_records: usize,
    /// 구성된 소스 목록
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            lookback_days: 10,
            max_records: 3,
            sources: vec![
                SourceEntry {
                    name: "tushare".to_string(),
                    priority: 30,
                    enabled: true,
                    markets: vec![Market::DomesticEquity, Market::CrossBorderEquity],
                    timeout_secs: default_source_timeout(),
                    rate_limit_per_minute: default_source_rate_limit(),
                },
                SourceEntry {
                    name: "akshare".to_string(),
                    priority: 20,
                    enabled: true,
                    markets: vec![
                        Market::DomesticEquity,
                        Market::CrossBorderEquity,
                        Market::UsEquity,
                    ],
                    timeout_secs: default_source_timeout(),
                    rate_limit_per_minute: default_source_rate_limit(),
                },
                SourceEntry {
                    name: "sina".to_string(),
                    priority: 10,
                    enabled: true,
                    markets: vec![Market::DomesticEquity],
                    timeout_secs: default_source_timeout(),
                    rate_limit_per_minute: default_source_rate_limit(),
                },
            ],
        }
    }
}

/// 태스크 엔진 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// 시스템 전체 동시 실행 태스크 한도
    pub max_concurrent_tasks: usize,
    /// 관리자 계정 UUID.
    ///
    /// 레거시 데이터는 소유자를 리터럴 `"admin"`으로 기록했고,
    /// 이후 버전은 계정 UUID를 기록합니다. 조회 시 두 표현을
    /// 동등하게 취급하기 위해 필요합니다.
    pub admin_account_id: Uuid,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            admin_account_id: Uuid::nil(),
        }
    }
}

/// 스케줄러 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// due 잡 확인 주기 (초)
    pub tick_interval_secs: u64,
    /// 인메모리 실행 이력 보관 한도
    pub history_limit: usize,
    /// 시장 데이터 동기화 잡의 대상 종목 (국내)
    #[serde(default)]
    pub sync_symbols: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1,
            history_limit: 500,
            sync_symbols: Vec::new(),
        }
    }
}

/// 실시간 알림 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationsConfig {
    /// 서버 heartbeat 간격 (초)
    pub heartbeat_interval_secs: u64,
    /// 브로드캐스트 채널 버퍼 크기
    pub channel_capacity: usize,
    /// 주 채널 재연결 기본 지연 (밀리초)
    pub reconnect_base_delay_ms: u64,
    /// 주 채널 재연결 최대 지연 (밀리초)
    pub reconnect_max_delay_ms: u64,
    /// 주 채널 재연결 시도 한도 (초과 시 fallback 채널로 전환)
    pub reconnect_max_attempts: u32,
    /// fallback 채널 재연결 고정 지연 (밀리초)
    pub fallback_retry_delay_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            channel_capacity: 1024,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 5,
            fallback_retry_delay_ms: 3000,
        }
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            // 파일에서 로드
            .add_source(config::File::from(path.as_ref()))
            // 환경 변수로 오버라이드
            .add_source(
                config::Environment::with_prefix("INSIGHT")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값을 반환합니다.
    pub fn load_default() -> Self {
        let path = std::env::var("INSIGHT_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
        if Path::new(&path).exists() {
            match Self::load(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}. Using defaults.", path, e);
                }
            }
        }
        Self::default()
    }
}
