//! 테스트용 scripted provider.
//!
//! 미리 큐에 넣은 응답을 순서대로 재생하고 호출 내역을 기록합니다.
//! resolver의 폴백 결정성 테스트에 사용됩니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use insight_core::DailyBar;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::DataProvider;
use crate::error::{DataError, Result};

/// 큐에 넣을 수 있는 응답 한 건.
pub enum ScriptedResponse {
    /// 일봉 목록 반환 (빈 목록 가능)
    Bars(Vec<DailyBar>),
    /// 에러 반환
    Error(String),
}

/// 시나리오 응답을 재생하는 테스트 provider.
pub struct ScriptedProvider {
    name: String,
    responses: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// 새 scripted provider를 생성합니다.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 응답을 큐에 추가합니다.
    pub fn push_response(&self, response: ScriptedResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// 성공 응답을 큐에 추가합니다.
    pub fn push_bars(&self, bars: Vec<DailyBar>) {
        self.push_response(ScriptedResponse::Bars(bars));
    }

    /// 에러 응답을 큐에 추가합니다.
    pub fn push_error(&self, message: impl Into<String>) {
        self.push_response(ScriptedResponse::Error(message.into()));
    }

    /// 지금까지 받은 호출 심볼 목록.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// 호출 횟수.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        self.calls.lock().unwrap().push(symbol.to_string());

        match self.responses.lock().unwrap().pop_front() {
            Some(ScriptedResponse::Bars(bars)) => Ok(bars),
            Some(ScriptedResponse::Error(msg)) => Err(DataError::FetchError(msg)),
            // 큐가 비면 빈 결과 (폴백 유도)
            None => Ok(Vec::new()),
        }
    }
}
