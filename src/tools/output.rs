//! 工具统一返回契约 AgentOutput
//!
//! 所有工具（搜索、浏览器、日历、电话）都返回 AgentOutput：要么 completed + result，要么 failed + error。
//! 用枚举表达二者互斥，序列化形状与外部 JSON 契约一致：`{"status": "completed", "result": "..."}`。

use serde::{Deserialize, Serialize};

/// 工具执行状态（只有两种）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    Completed,
    Failed,
}

/// 工具返回：result 与 error 由 status 决定，恰有一个存在
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AgentOutput {
    Completed { result: String },
    Failed { error: String },
}

impl AgentOutput {
    pub fn completed(result: impl Into<String>) -> Self {
        Self::Completed {
            result: result.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn status(&self) -> OutputStatus {
        match self {
            Self::Completed { .. } => OutputStatus::Completed,
            Self::Failed { .. } => OutputStatus::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// 仅 completed 时存在
    pub fn result(&self) -> Option<&str> {
        match self {
            Self::Completed { result } => Some(result),
            Self::Failed { .. } => None,
        }
    }

    /// 仅 failed 时存在
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { error } => Some(error),
        }
    }
}
