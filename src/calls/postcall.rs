//! 通话结束回调处理：解析 webhook、分类、提取预订信息、给出后续动作

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::calls::{
    CallArtifact, CallError, CallResult, CallStatus, NextAction, OutcomeClassifier,
    PatternClassifier,
};

/// 服务商的通话结束事件类型
pub const POST_CALL_EVENT: &str = "post_call_transcription";

/// 从 webhook 中取出的原始字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostCallPayload {
    pub call_id: Option<String>,
    pub status_text: String,
    pub summary: String,
    pub transcript: String,
    pub duration_secs: Option<u64>,
}

/// 取关联键：信封格式取 data.conversation_id / data.call_id，扁平格式取 call_id / conversation_id
pub fn correlation_key(payload: &Value) -> Option<String> {
    let data = payload.get("data").filter(|d| d.is_object()).unwrap_or(payload);
    ["conversation_id", "call_id"]
        .iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .or_else(|| {
            payload
                .get("call_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        })
        .map(String::from)
}

fn str_field(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// 逐字稿：字符串原样；数组则拼成 "speaker: text"
fn transcript_text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(turns)) => turns
            .iter()
            .filter_map(|turn| match turn {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => {
                    let speaker = ["speaker", "role"]
                        .iter()
                        .find_map(|k| turn.get(*k).and_then(Value::as_str))
                        .unwrap_or("unknown");
                    let text = ["text", "message"]
                        .iter()
                        .find_map(|k| turn.get(*k).and_then(Value::as_str))
                        .filter(|t| !t.is_empty())?;
                    Some(format!("{speaker}: {text}"))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// 解析 webhook 请求体（信封格式或扁平格式）
pub fn parse_payload(payload: &Value) -> Result<PostCallPayload, CallError> {
    if !payload.is_object() {
        return Err(CallError::Payload("body is not a JSON object".to_string()));
    }

    if payload.get("type").and_then(Value::as_str) == Some(POST_CALL_EVENT) {
        let data = match payload.get("data") {
            Some(d) if d.is_object() => d,
            _ => {
                return Err(CallError::Payload(
                    "post_call_transcription without a data object".to_string(),
                ))
            }
        };
        let summary = data
            .get("analysis")
            .and_then(|a| a.get("transcript_summary"))
            .and_then(Value::as_str)
            .map(String::from)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| str_field(data, "summary"));
        let duration_secs = data
            .get("metadata")
            .and_then(|m| m.get("call_duration_secs"))
            .and_then(Value::as_u64);

        return Ok(PostCallPayload {
            call_id: correlation_key(payload),
            status_text: str_field(data, "status").to_lowercase(),
            summary,
            transcript: transcript_text(data.get("transcript")),
            duration_secs,
        });
    }

    Ok(PostCallPayload {
        call_id: correlation_key(payload),
        status_text: str_field(payload, "status").to_lowercase(),
        summary: str_field(payload, "summary"),
        transcript: transcript_text(payload.get("transcript")),
        duration_secs: payload.get("duration_seconds").and_then(Value::as_u64),
    })
}

struct ExtractPatterns {
    booking_reference: Regex,
    party_size: Regex,
    total_cost: Regex,
    alternative: Regex,
}

static EXTRACT: OnceLock<Option<ExtractPatterns>> = OnceLock::new();

fn extract_patterns() -> Option<&'static ExtractPatterns> {
    EXTRACT
        .get_or_init(|| {
            Some(ExtractPatterns {
                booking_reference: Regex::new(
                    r"(?i)(?:booking|confirmation|reference)\s+(?:number|code|id)\W*?(?:is\s+)?([A-Za-z0-9-]+)",
                )
                .ok()?,
                party_size: Regex::new(r"(?i)(?:party|group|people|guests)\D*?(\d+)").ok()?,
                total_cost: Regex::new(r"\$(\d+(?:\.\d{2})?)").ok()?,
                alternative: Regex::new(
                    r"(?i)(?:alternative|suggest|available).*?(?:time|date|slot).*?(\d{1,2}:\d{2}|\d{1,2}/\d{1,2})",
                )
                .ok()?,
            })
        })
        .as_ref()
}

fn extract_artifact(text: &str) -> CallArtifact {
    let Some(p) = extract_patterns() else {
        return CallArtifact::default();
    };
    let capture = |re: &Regex| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());
    CallArtifact {
        booking_reference: capture(&p.booking_reference),
        party_size: capture(&p.party_size).and_then(|s| s.parse().ok()),
        total_cost: capture(&p.total_cost).map(|c| format!("${c}")),
    }
}

fn extract_alternatives(text: &str) -> Vec<String> {
    extract_patterns()
        .map(|p| {
            p.alternative
                .captures_iter(text)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// 状态 + 是否有提取结果 → 后续动作
pub fn next_action(status: CallStatus, artifact: Option<&CallArtifact>) -> NextAction {
    match status {
        CallStatus::Completed if artifact.is_some() => NextAction::AddToCalendar,
        CallStatus::NoAnswer | CallStatus::NoAvailability | CallStatus::Voicemail => {
            NextAction::RetryLater
        }
        CallStatus::NeedsUserInput => NextAction::RequestUserInput,
        CallStatus::IvrBlocked => NextAction::SwitchChannel,
        _ => NextAction::None,
    }
}

pub fn outcome_message(
    status: CallStatus,
    artifact: Option<&CallArtifact>,
    alternatives: &[String],
) -> String {
    match status {
        CallStatus::Completed => match artifact.and_then(|a| a.booking_reference.as_deref()) {
            Some(reference) => {
                format!("Successfully completed task. Booking reference: {reference}")
            }
            None => "Task completed successfully".to_string(),
        },
        CallStatus::NoAvailability if !alternatives.is_empty() => format!(
            "No availability for requested time. Alternatives: {}",
            alternatives.join(", ")
        ),
        CallStatus::NoAvailability => "No availability for requested time".to_string(),
        CallStatus::NoAnswer => "Business did not answer the phone".to_string(),
        CallStatus::Voicemail => "Call went to voicemail".to_string(),
        CallStatus::IvrBlocked => "Could not reach a human representative".to_string(),
        CallStatus::NeedsUserInput => {
            "Need additional information from user to complete task".to_string()
        }
        CallStatus::Timeout => "Call timed out".to_string(),
        CallStatus::Error => "An error occurred during the call".to_string(),
    }
}

/// webhook → CallResult
pub struct PostCallProcessor {
    classifier: Arc<dyn OutcomeClassifier>,
}

impl PostCallProcessor {
    pub fn new(classifier: Arc<dyn OutcomeClassifier>) -> Self {
        Self { classifier }
    }

    pub fn process(&self, payload: &Value) -> Result<CallResult, CallError> {
        let parsed = parse_payload(payload)?;
        let text = format!(
            "{} {} {}",
            parsed.status_text, parsed.summary, parsed.transcript
        );
        let status = self.classifier.classify(&text);

        let artifact = (status == CallStatus::Completed).then(|| extract_artifact(&text));
        let alternatives = extract_alternatives(&text);
        let result = CallResult {
            call_id: parsed.call_id,
            idempotency_key: None,
            status,
            next_action: next_action(status, artifact.as_ref()),
            message: outcome_message(status, artifact.as_ref(), &alternatives),
            artifact,
            alternatives,
            summary: parsed.summary,
            duration_secs: parsed.duration_secs,
            completed_at: chrono::Utc::now().timestamp_millis(),
        };

        tracing::info!(
            call_id = result.call_id.as_deref().unwrap_or("unknown"),
            status = %result.status,
            "Post-call result normalized"
        );
        Ok(result)
    }
}

impl Default for PostCallProcessor {
    fn default() -> Self {
        Self::new(Arc::new(PatternClassifier::new()))
    }
}
