//! 데이터 소스 registry.
//!
//! 구성된 소스 목록과 provider 클라이언트를 함께 보관합니다.
//! 외부 관리 동작이 언제든 우선순위를 바꿀 수 있으므로, 재시작 없이
//! `replace_all`로 교체 가능하도록 RwLock 뒤에 둡니다.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use insight_core::{Market, SourceEntry};

use crate::provider::DataProvider;

/// 단일 데이터 소스 구성.
#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    /// 소스 이름
    pub name: String,
    /// 우선순위 (높을수록 먼저 시도)
    pub priority: i32,
    /// 활성화 여부
    pub enabled: bool,
    /// 제공 가능한 시장
    pub markets: HashSet<Market>,
    /// 호출 타임아웃
    pub timeout: Duration,
    /// 분당 요청 한도
    pub rate_limit_per_minute: u32,
}

impl From<&SourceEntry> for DataSourceConfig {
    fn from(entry: &SourceEntry) -> Self {
        Self {
            name: entry.name.clone(),
            priority: entry.priority,
            enabled: entry.enabled,
            markets: entry.markets.iter().copied().collect(),
            timeout: Duration::from_secs(entry.timeout_secs),
            rate_limit_per_minute: entry.rate_limit_per_minute,
        }
    }
}

impl DataSourceConfig {
    /// 해당 시장을 서비스할 수 있는지 확인합니다.
    pub fn serves(&self, market: Market) -> bool {
        self.enabled && self.markets.contains(&market)
    }
}

/// resolver가 시도할 후보.
#[derive(Clone)]
pub struct Candidate {
    /// 소스 구성
    pub config: DataSourceConfig,
    /// provider 클라이언트
    pub provider: Arc<dyn DataProvider>,
}

struct RegisteredSource {
    config: DataSourceConfig,
    provider: Arc<dyn DataProvider>,
}

/// 데이터 소스 registry.
///
/// 등록 순서가 우선순위 동률의 tie-break 기준이 됩니다 (stable sort).
pub struct SourceRegistry {
    sources: RwLock<Vec<RegisteredSource>>,
}

impl SourceRegistry {
    /// 빈 registry를 생성합니다.
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
        }
    }

    /// 소스를 등록합니다.
    pub async fn register(&self, config: DataSourceConfig, provider: Arc<dyn DataProvider>) {
        let mut sources = self.sources.write().await;
        sources.push(RegisteredSource { config, provider });
    }

    /// 전체 소스 구성을 교체합니다.
    ///
    /// 외부 관리 화면의 우선순위 변경을 프로세스 재시작 없이 반영합니다.
    pub async fn replace_all(&self, entries: Vec<(DataSourceConfig, Arc<dyn DataProvider>)>) {
        let mut sources = self.sources.write().await;
        *sources = entries
            .into_iter()
            .map(|(config, provider)| RegisteredSource { config, provider })
            .collect();
    }

    /// 시장에 대한 후보 목록을 우선순위 내림차순으로 반환합니다.
    ///
    /// 비활성 소스와 시장 불일치 소스는 제외됩니다. 우선순위 동률은
    /// 등록(설정) 순서를 유지합니다 — 무작위 tie-break 없음.
    pub async fn candidates(&self, market: Market) -> Vec<Candidate> {
        let sources = self.sources.read().await;
        let mut matched: Vec<Candidate> = sources
            .iter()
            .filter(|s| s.config.serves(market))
            .map(|s| Candidate {
                config: s.config.clone(),
                provider: Arc::clone(&s.provider),
            })
            .collect();

        matched.sort_by(|a, b| b.config.priority.cmp(&a.config.priority));
        matched
    }

    /// 등록된 소스 수.
    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    /// registry가 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    /// 등록된 소스 구성 스냅샷.
    pub async fn snapshot(&self) -> Vec<DataSourceConfig> {
        self.sources
            .read()
            .await
            .iter()
            .map(|s| s.config.clone())
            .collect()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
