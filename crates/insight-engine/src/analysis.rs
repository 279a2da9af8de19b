//! 분석 collaborator seam.
//!
//! 리포트 내용을 만드는 분석 엔진은 이 crate의 범위 밖입니다.
//! 엔진은 해석된 데이터를 넘기고 결과 리포트 참조만 돌려받습니다.

use async_trait::async_trait;

use insight_core::{NormalizedResult, Task};

use crate::error::{EngineError, Result};

/// 분석 collaborator 인터페이스.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// 태스크와 해석된 데이터로 분석을 수행하고 리포트 참조를 반환합니다.
    async fn analyze(&self, task: &Task, data: &NormalizedResult) -> Result<String>;
}

/// 고정된 리포트 참조를 만드는 기본 구현.
///
/// 실제 분석 엔진이 주입되기 전의 wiring/테스트용입니다.
#[derive(Debug, Default)]
pub struct StubAnalysisProvider;

#[async_trait]
impl AnalysisProvider for StubAnalysisProvider {
    async fn analyze(&self, task: &Task, data: &NormalizedResult) -> Result<String> {
        let latest = data
            .latest()
            .ok_or_else(|| EngineError::Analysis("no bars to analyze".to_string()))?;
        Ok(format!("reports/{}/{}", task.task_id, latest.date))
    }
}
