//! 电话模块数据契约：请求、结果状态、后续动作与错误

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calls::CallbackError;

/// 通话意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallIntent {
    #[default]
    Reserve,
    Reschedule,
    Cancel,
    Info,
}

/// 一次外呼请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub business_name: String,
    /// E.164，例如 +14155550123
    pub business_phone: String,
    pub user_name: String,
    #[serde(default)]
    pub intent: CallIntent,
    /// 交给语音代理的自由文本（日期、人数、特殊要求等）
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub callback_phone: Option<String>,
}

static PHONE_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 去掉空格、连字符、括号后检查 E.164 形式
pub fn normalize_phone(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    let re = PHONE_RE
        .get_or_init(|| Regex::new(r"^\+[1-9]\d{6,14}$").ok())
        .as_ref()?;
    re.is_match(&cleaned).then_some(cleaned)
}

impl CallRequest {
    /// 校验并规范化；所有问题一次性报告
    pub fn validate(mut self) -> Result<Self, CallError> {
        let mut problems = Vec::new();
        if self.business_name.trim().is_empty() {
            problems.push("business_name is required".to_string());
        }
        if self.user_name.trim().is_empty() {
            problems.push("user_name is required".to_string());
        }
        match normalize_phone(&self.business_phone) {
            Some(phone) => self.business_phone = phone,
            None => problems.push(format!(
                "business_phone {:?} is not an E.164 number",
                self.business_phone
            )),
        }
        if let Some(cb) = self.callback_phone.take() {
            match normalize_phone(&cb) {
                Some(phone) => self.callback_phone = Some(phone),
                None => problems.push(format!("callback_phone {cb:?} is not an E.164 number")),
            }
        }
        if self.intent != CallIntent::Info && self.details.trim().is_empty() {
            problems.push("details are required for this intent".to_string());
        }

        if problems.is_empty() {
            Ok(self)
        } else {
            Err(CallError::InvalidRequest(problems.join("; ")))
        }
    }

    /// 幂等键：同一意图、号码、用户与细节的请求得到同一个键（UUID v5）
    pub fn idempotency_key(&self) -> String {
        let material = format!(
            "{:?}|{}|{}|{}",
            self.intent,
            self.business_phone,
            self.user_name.trim().to_lowercase(),
            self.details.trim()
        );
        format!(
            "idem_{}",
            uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, material.as_bytes()).simple()
        )
    }
}

/// 通话结果的标准状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Completed,
    NoAvailability,
    NoAnswer,
    Voicemail,
    IvrBlocked,
    NeedsUserInput,
    Timeout,
    Error,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::NoAvailability => "no_availability",
            Self::NoAnswer => "no_answer",
            Self::Voicemail => "voicemail",
            Self::IvrBlocked => "ivr_blocked",
            Self::NeedsUserInput => "needs_user_input",
            Self::Timeout => "timeout",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// 建议的后续动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    AddToCalendar,
    RetryLater,
    RequestUserInput,
    SwitchChannel,
    None,
}

/// 成功通话提取出的信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArtifact {
    pub booking_reference: Option<String>,
    pub party_size: Option<u32>,
    pub total_cost: Option<String>,
}

/// 标准化后的通话结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    pub call_id: Option<String>,
    /// 发起该通话的请求的幂等键（通话由本服务发起时才有）
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub status: CallStatus,
    pub next_action: NextAction,
    /// 给人看的一句话
    pub message: String,
    #[serde(default)]
    pub artifact: Option<CallArtifact>,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    pub completed_at: i64,
}

impl CallResult {
    pub fn is_completed(&self) -> bool {
        self.status == CallStatus::Completed
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Invalid call request: {0}")]
    InvalidRequest(String),

    #[error("Call placement failed: {0}")]
    Placement(String),

    #[error("Unreadable post-call payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Callback(#[from] CallbackError),
}
