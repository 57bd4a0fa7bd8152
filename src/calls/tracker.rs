//! 已发起通话的记录：call_id → 请求摘要、幂等键与最终状态

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::calls::{CallIntent, CallRequest, CallStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// 已发起，等待 webhook
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub call_id: String,
    pub idempotency_key: String,
    pub intent: CallIntent,
    pub business_name: String,
    pub business_phone: String,
    pub user_name: String,
    pub state: CallState,
    /// webhook 分类出的状态
    pub outcome: Option<CallStatus>,
    pub error: Option<String>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

#[derive(Debug, Default)]
pub struct CallTracker {
    calls: Mutex<HashMap<String, CallRecord>>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self, call_id: &str, request: &CallRequest) {
        let record = CallRecord {
            call_id: call_id.to_string(),
            idempotency_key: request.idempotency_key(),
            intent: request.intent,
            business_name: request.business_name.clone(),
            business_phone: request.business_phone.clone(),
            user_name: request.user_name.clone(),
            state: CallState::Active,
            outcome: None,
            error: None,
            started_at: chrono::Utc::now().timestamp_millis(),
            finished_at: None,
        };
        tracing::debug!(call_id, idempotency_key = %record.idempotency_key, "Call stored");
        self.lock().insert(call_id.to_string(), record);
    }

    /// webhook 结果到达；返回该通话的幂等键（未知通话返回 None）
    pub fn record_outcome(&self, call_id: &str, outcome: CallStatus) -> Option<String> {
        let mut calls = self.lock();
        let record = calls.get_mut(call_id)?;
        record.state = if outcome == CallStatus::Completed {
            CallState::Completed
        } else {
            CallState::Failed
        };
        record.outcome = Some(outcome);
        record.finished_at = Some(chrono::Utc::now().timestamp_millis());
        Some(record.idempotency_key.clone())
    }

    /// 没有拿到结果（超时、webhook 无法解析）
    pub fn record_error(&self, call_id: &str, error: impl Into<String>) {
        if let Some(record) = self.lock().get_mut(call_id) {
            if record.state == CallState::Active {
                record.state = CallState::Failed;
                record.error = Some(error.into());
                record.finished_at = Some(chrono::Utc::now().timestamp_millis());
            }
        }
    }

    pub fn get(&self, call_id: &str) -> Option<CallRecord> {
        self.lock().get(call_id).cloned()
    }

    pub fn find_by_idempotency_key(&self, key: &str) -> Vec<CallRecord> {
        let mut found: Vec<_> = self
            .lock()
            .values()
            .filter(|r| r.idempotency_key == key)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.started_at);
        found
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|r| r.state == CallState::Active)
            .count()
    }

    /// 清理结束超过 retention 的记录；进行中的保留
    pub fn purge_finished(&self, retention: Duration) {
        let cutoff = chrono::Utc::now().timestamp_millis() - retention.as_millis() as i64;
        self.lock()
            .retain(|_, r| r.finished_at.map_or(true, |t| t > cutoff));
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CallRecord>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}
