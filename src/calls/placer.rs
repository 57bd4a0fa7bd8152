//! 外呼发起：CallPlacer 返回关联键，结果稍后经 webhook 到达

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::calls::{CallError, CallRequest};
use crate::config::CallsSection;

#[async_trait]
pub trait CallPlacer: Send + Sync {
    /// 发起外呼，返回之后 webhook 中用于关联的键
    async fn place_call(&self, request: &CallRequest) -> Result<String, CallError>;
}

#[derive(Debug, Serialize)]
struct OutboundCallBody<'a> {
    agent_id: &'a str,
    agent_phone_number_id: &'a str,
    to_number: &'a str,
    conversation_initiation_client_data: Value,
}

/// 通过语音代理服务商的 HTTP 接口外呼
pub struct HttpCallPlacer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    agent_id: String,
    agent_phone_number_id: String,
    /// 设置后所有电话都打到这个号码（联调用）
    test_call_number: Option<String>,
    force_test_call_number: bool,
}

impl HttpCallPlacer {
    /// API Key 只从环境变量 ELEVENLABS_API_KEY 读取
    pub fn from_config(cfg: &CallsSection) -> Result<Self, CallError> {
        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .map_err(|_| CallError::Placement("ELEVENLABS_API_KEY is not set".to_string()))?;
        let agent_id = cfg
            .agent_id
            .clone()
            .ok_or_else(|| CallError::Placement("calls.agent_id is not configured".to_string()))?;
        let agent_phone_number_id = cfg.agent_phone_number_id.clone().ok_or_else(|| {
            CallError::Placement("calls.agent_phone_number_id is not configured".to_string())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs.max(1)))
            .build()
            .map_err(|e| CallError::Placement(e.to_string()))?;

        Ok(Self {
            client,
            url: cfg.provider_url.clone(),
            api_key,
            agent_id,
            agent_phone_number_id,
            test_call_number: cfg.test_call_number.clone(),
            force_test_call_number: cfg.force_test_call_number,
        })
    }

    fn destination<'a>(&'a self, request: &'a CallRequest) -> &'a str {
        match &self.test_call_number {
            Some(number) if self.force_test_call_number => number,
            _ => &request.business_phone,
        }
    }
}

/// 交给语音代理的动态变量
pub fn dynamic_variables(request: &CallRequest) -> Value {
    serde_json::json!({
        "dynamic_variables": {
            "business_name": request.business_name,
            "user_name": request.user_name,
            "intent": request.intent,
            "details": request.details,
            "callback_phone": request.callback_phone.clone().unwrap_or_default(),
        }
    })
}

/// 响应中的关联键：优先 conversation_id（webhook 里用的就是它），其次 callSid
pub fn key_from_response(body: &Value) -> Option<String> {
    ["conversation_id", "callSid", "call_id"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .map(String::from)
}

#[async_trait]
impl CallPlacer for HttpCallPlacer {
    async fn place_call(&self, request: &CallRequest) -> Result<String, CallError> {
        let body = OutboundCallBody {
            agent_id: &self.agent_id,
            agent_phone_number_id: &self.agent_phone_number_id,
            to_number: self.destination(request),
            conversation_initiation_client_data: dynamic_variables(request),
        };

        let resp = self
            .client
            .post(&self.url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::Placement(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CallError::Placement(format!("provider returned {status}: {text}")));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| CallError::Placement(e.to_string()))?;
        let key = key_from_response(&json).ok_or_else(|| {
            CallError::Placement("provider response has no conversation id".to_string())
        })?;

        tracing::info!(call_id = %key, business = %request.business_name, "Outbound call initiated");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::CallIntent;
    use serde_json::json;

    #[test]
    fn test_key_prefers_conversation_id() {
        let body = json!({"success": true, "conversation_id": "conv_1", "callSid": "CA1"});
        assert_eq!(key_from_response(&body).as_deref(), Some("conv_1"));
        assert_eq!(
            key_from_response(&json!({"callSid": "CA1"})).as_deref(),
            Some("CA1")
        );
        assert_eq!(key_from_response(&json!({"success": false})), None);
    }

    #[test]
    fn test_empty_conversation_id_falls_back_to_call_sid() {
        let body = json!({"conversation_id": "", "callSid": "CA9"});
        assert_eq!(key_from_response(&body).as_deref(), Some("CA9"));
        assert_eq!(key_from_response(&json!({"conversation_id": ""})), None);
    }

    #[test]
    fn test_dynamic_variables() {
        let req = CallRequest {
            business_name: "Bellissimo".into(),
            business_phone: "+14155550123".into(),
            user_name: "Sam".into(),
            intent: CallIntent::Cancel,
            details: "Booking ref 42".into(),
            callback_phone: None,
        };
        let vars = dynamic_variables(&req);
        assert_eq!(vars["dynamic_variables"]["intent"], "cancel");
        assert_eq!(vars["dynamic_variables"]["callback_phone"], "");
    }
}
