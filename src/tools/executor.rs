//! 工具执行器
//!
//! 持有 ToolRegistry 与单步超时，dispatch(tool_id, instruction, context) 在超时内调用 registry.execute，
//! 超时转为失败的 AgentOutput；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::tools::{AgentOutput, ToolRegistry};

/// 工具执行器：对每次调用施加超时，保证卡住的工具不会拖死整个运行
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行指定工具；超时返回 failed（Tool timeout），未知工具由注册表转为 failed；输出 JSON 审计日志
    pub async fn dispatch(&self, tool_id: &str, instruction: &str, context: &str) -> AgentOutput {
        let start = Instant::now();
        let result = timeout(
            self.timeout,
            self.registry.execute(tool_id, instruction, context),
        )
        .await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(AgentOutput::Completed { .. }) => (true, "ok"),
            Ok(AgentOutput::Failed { .. }) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "instruction_preview": preview(instruction),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(output) => output,
            Err(_) => AgentOutput::failed(format!(
                "Tool timeout: {tool_id} did not finish within {}s",
                self.timeout.as_secs_f64()
            )),
        }
    }
}

pub(crate) fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}
