//! 백그라운드 잡 스케줄러.
//!
//! 사용자 태스크와 독립적인 반복/수동 트리거 잡을 관리합니다:
//! - interval/cron 트리거 ([`job`])
//! - 잡별 동시 실행 한도 (`max_instances`)
//! - 일시정지/재개/수동 트리거/실행 이력/통계 ([`service`])
//!
//! 잡 실행 실패는 이력에 기록될 뿐 스케줄러를 중단시키지 않으며,
//! 같은 주기 내 자동 재시도는 하지 않습니다 (다음 예정 실행이 재시도).

pub mod error;
pub mod history;
pub mod job;
pub mod service;

pub use error::{Result, SchedulerError};
pub use history::{HistoryAction, HistoryStatus, JobHistoryEntry};
pub use job::{JobContext, JobDefinition, JobOutcome, JobRunner, TriggerSpec};
pub use service::{FireOutcome, JobInfo, SchedulerHealth, SchedulerService, SchedulerStats};
