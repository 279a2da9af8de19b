//! 주식 분석 플랫폼의 핵심 도메인 모델.
//!
//! 이 crate는 워크스페이스 전체에서 공유되는 타입을 정의합니다:
//! - 분석 태스크와 상태 전이 ([`domain::task`])
//! - 진행 이벤트와 전달 seam ([`domain::event`])
//! - 시장 구분과 일봉 데이터 ([`domain::market`], [`domain::bar`])
//! - 에러 분류 체계 ([`error`])
//! - 설정 및 로깅 인프라 ([`config`], [`logging`])

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

pub use config::{
    AppConfig, DataSourceSettings, DatabaseConfig, EngineConfig, LoggingConfig,
    NotificationsConfig, SchedulerConfig, ServerConfig, SourceEntry,
};
pub use domain::bar::{DailyBar, NormalizedResult};
pub use domain::event::{
    EntityKind, NullSink, ProgressEvent, ProgressEventType, ProgressSink, SharedProgressSink,
};
pub use domain::market::Market;
pub use domain::task::{Task, TaskSpec, TaskStatus};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_from_env, LogConfig, LogFormat};
