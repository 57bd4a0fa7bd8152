//! 演示用工具（无需外部服务）
//!
//! 搜索 / 浏览器 / 日历 / 电话四个 mock，用于本地跑通「规划 → 执行 → 失败 → 重规划」流程。
//! 浏览器 mock 总是失败（在线预订表单损坏），从而触发恢复计划。

use std::time::Duration;

use async_trait::async_trait;

use crate::tools::{AgentOutput, Tool};

/// 模拟网络延迟；测试里设为 0
#[derive(Debug, Clone, Copy)]
pub struct MockLatency(pub Duration);

impl Default for MockLatency {
    fn default() -> Self {
        Self(Duration::from_millis(200))
    }
}

async fn simulate(latency: MockLatency) {
    if !latency.0.is_zero() {
        tokio::time::sleep(latency.0).await;
    }
}

/// 搜索 mock：指令含 "fail" 时失败
#[derive(Debug, Default)]
pub struct MockSearchTool {
    pub latency: MockLatency,
}

#[async_trait]
impl Tool for MockSearchTool {
    fn name(&self) -> &str {
        "mock_search_agent"
    }

    fn description(&self) -> &str {
        "Find and compare options (e.g. highest-rated businesses) and acquire contact details at once: website URL, address, phone number. Read-only."
    }

    async fn execute(&self, instruction: &str, _context: &str) -> AgentOutput {
        tracing::debug!(instruction, "mock search");
        simulate(self.latency).await;
        if instruction.to_lowercase().contains("fail") {
            return AgentOutput::failed("Could not find information online.");
        }
        AgentOutput::completed(
            "Found 'Ristorante Bellissimo'. Website: bellissimo.de, Phone: +49 89 1234567",
        )
    }
}

/// 浏览器 mock：总是失败
#[derive(Debug, Default)]
pub struct MockBrowserTool {
    pub latency: MockLatency,
}

#[async_trait]
impl Tool for MockBrowserTool {
    fn name(&self) -> &str {
        "mock_browser_agent"
    }

    fn description(&self) -> &str {
        "Perform a specific action on a known website, like filling out a confirmed online booking form. Not for browsing or searching."
    }

    async fn execute(&self, instruction: &str, _context: &str) -> AgentOutput {
        tracing::debug!(instruction, "mock browser");
        simulate(self.latency).await;
        AgentOutput::failed("The online reservation form is broken.")
    }
}

/// 日历 mock
#[derive(Debug, Default)]
pub struct MockCalendarTool {
    pub latency: MockLatency,
}

#[async_trait]
impl Tool for MockCalendarTool {
    fn name(&self) -> &str {
        "mock_calendar_agent"
    }

    fn description(&self) -> &str {
        "Create events in the user's calendar. Use for confirmations or to schedule a manual follow-up task as a last resort."
    }

    async fn execute(&self, instruction: &str, _context: &str) -> AgentOutput {
        tracing::debug!(instruction, "mock calendar");
        simulate(self.latency).await;
        AgentOutput::completed("Calendar event has been created.")
    }
}

/// 电话 mock（真实实现见 calls::CallingTool）
#[derive(Debug, Default)]
pub struct MockCallingTool {
    pub latency: MockLatency,
}

#[async_trait]
impl Tool for MockCallingTool {
    fn name(&self) -> &str {
        "mock_calling_agent"
    }

    fn description(&self) -> &str {
        "Make a phone call to a business when no online booking is available, or when the user asks for a call."
    }

    async fn execute(&self, instruction: &str, _context: &str) -> AgentOutput {
        tracing::debug!(instruction, "mock call");
        simulate(self.latency).await;
        AgentOutput::completed("Successfully made the call and spoke with the restaurant.")
    }
}
