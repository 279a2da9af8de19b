//! 잡 정의와 트리거 명세.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SchedulerError};

/// 잡 실행 트리거 명세.
#[derive(Debug, Clone)]
pub enum TriggerSpec {
    /// 고정 간격 실행
    Interval(Duration),
    /// cron 표현식 실행 (초 필드 포함 6~7필드)
    Cron(String),
}

impl TriggerSpec {
    /// 명세를 검증합니다.
    pub fn validate(&self) -> Result<()> {
        match self {
            TriggerSpec::Interval(interval) => {
                if interval.is_zero() {
                    return Err(SchedulerError::InvalidTrigger(
                        "interval must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            TriggerSpec::Cron(expr) => {
                cron::Schedule::from_str(expr)
                    .map_err(|e| SchedulerError::InvalidTrigger(format!("{}: {}", expr, e)))?;
                Ok(())
            }
        }
    }

    /// 기준 시각 이후의 다음 실행 시각을 계산합니다.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TriggerSpec::Interval(interval) => {
                let delta = ChronoDuration::from_std(*interval).ok()?;
                Some(after + delta)
            }
            TriggerSpec::Cron(expr) => {
                let schedule = cron::Schedule::from_str(expr).ok()?;
                schedule.after(&after).next()
            }
        }
    }

    /// 사람이 읽을 수 있는 표현.
    pub fn describe(&self) -> String {
        match self {
            TriggerSpec::Interval(interval) => format!("interval[{}s]", interval.as_secs()),
            TriggerSpec::Cron(expr) => format!("cron[{}]", expr),
        }
    }
}

/// 잡 실행 컨텍스트.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// 잡 ID
    pub job_id: String,
    /// 실행 시각
    pub fired_at: DateTime<Utc>,
    /// 수동 트리거 여부
    pub manual: bool,
}

/// 잡 실행 결과.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    /// 이력에 남길 상세 메시지
    pub detail: Option<String>,
}

impl JobOutcome {
    /// 상세 메시지가 있는 결과를 생성합니다.
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
        }
    }
}

/// 잡 본체 인터페이스.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// 잡을 한 번 실행합니다.
    async fn run(&self, ctx: JobContext) -> Result<JobOutcome>;
}

/// 잡 정의.
#[derive(Clone)]
pub struct JobDefinition {
    /// 잡 ID
    pub job_id: String,
    /// 표시 이름
    pub display_name: String,
    /// 설명
    pub description: String,
    /// 트리거 명세
    pub trigger: TriggerSpec,
    /// 잡별 동시 실행 한도
    pub max_instances: usize,
    /// 잡 본체
    pub runner: Arc<dyn JobRunner>,
}

impl JobDefinition {
    /// 새 잡 정의를 생성합니다.
    pub fn new(
        job_id: impl Into<String>,
        display_name: impl Into<String>,
        trigger: TriggerSpec,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            display_name: display_name.into(),
            description: String::new(),
            trigger,
            max_instances: 1,
            runner,
        }
    }

    /// 설명을 설정합니다.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 동시 실행 한도를 설정합니다.
    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_next_after() {
        let trigger = TriggerSpec::Interval(Duration::from_secs(60));
        let now = Utc::now();
        let next = trigger.next_after(now).unwrap();
        assert_eq!((next - now).num_seconds(), 60);
    }

    #[test]
    fn test_cron_next_after() {
        // 매일 08:30:00
        let trigger = TriggerSpec::Cron("0 30 8 * * *".to_string());
        assert!(trigger.validate().is_ok());

        let now = Utc::now();
        let next = trigger.next_after(now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn test_invalid_trigger_rejected() {
        assert!(TriggerSpec::Cron("not a cron".to_string()).validate().is_err());
        assert!(TriggerSpec::Interval(Duration::ZERO).validate().is_err());
    }
}
