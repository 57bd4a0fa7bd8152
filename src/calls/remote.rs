//! 远端电话服务客户端：把通话交给 butler-calls 的 /start_call
//!
//! webhook 只会打到 butler-calls 进程，CLI 侧通过它拿到结果。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::calls::{CallError, CallRequest, CallResult, CallRunner, CallbackError};
use crate::config::CallsSection;

pub struct RemoteCallService {
    client: reqwest::Client,
    base_url: String,
    /// 服务端等待结果的时长，超时错误里报告
    wait_timeout: Duration,
}

impl RemoteCallService {
    /// 需要 calls.service_url；HTTP 超时 = 服务端等待时长 + http_timeout_secs
    pub fn from_config(cfg: &CallsSection) -> Result<Self, CallError> {
        let base_url = cfg
            .service_url
            .clone()
            .ok_or_else(|| CallError::Placement("calls.service_url is not configured".to_string()))?;
        let wait_timeout = Duration::from_secs(cfg.default_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(wait_timeout + Duration::from_secs(cfg.http_timeout_secs.max(1)))
            .build()
            .map_err(|e| CallError::Placement(e.to_string()))?;
        Ok(Self::new(client, base_url, wait_timeout))
    }

    pub fn new(client: reqwest::Client, base_url: impl Into<String>, wait_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            wait_timeout,
        }
    }

    fn timeout_error(&self, key: Option<&str>) -> CallError {
        CallError::Callback(CallbackError::Timeout {
            key: key.unwrap_or("unknown").to_string(),
            timeout: self.wait_timeout,
        })
    }
}

fn detail(body: &Value) -> String {
    body.get("detail")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl CallRunner for RemoteCallService {
    async fn start_and_wait(&self, request: CallRequest) -> Result<CallResult, CallError> {
        let url = format!("{}/start_call", self.base_url);
        let resp = match self.client.post(&url).json(&request).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return Err(self.timeout_error(None)),
            Err(e) => return Err(CallError::Placement(format!("{url}: {e}"))),
        };

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        match status.as_u16() {
            200 => serde_json::from_value(body)
                .map_err(|e| CallError::Payload(format!("unexpected call result: {e}"))),
            400 => Err(CallError::InvalidRequest(detail(&body))),
            504 => Err(self.timeout_error(body.get("call_id").and_then(Value::as_str))),
            _ => Err(CallError::Placement(format!("{url} returned {status}: {}", detail(&body)))),
        }
    }
}
