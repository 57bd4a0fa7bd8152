//! Mock LLM 客户端（用于演示与测试，无需 API）
//!
//! 对规划提示返回固定的订餐计划：初始计划为 搜索 → 网页预订 → 日历，
//! 恢复提示（包含失败步骤详情）返回 电话预订 → 日历。

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// 恢复提示中必然出现的标记
pub const RECOVERY_MARKER: &str = "Failed Step Details";

const INITIAL_PLAN: &str = r#"[
  {"id": 1, "step_name": "Find restaurant", "tool_module_name": "mock_search_agent", "dependencies": [], "prompt_message": "Find the best-rated restaurant that matches the goal, with its website and phone number", "path_name": "primary"},
  {"id": 2, "step_name": "Book online", "tool_module_name": "mock_browser_agent", "dependencies": [1], "prompt_message": "Book a table using the restaurant's online reservation form", "path_name": "primary"},
  {"id": 3, "step_name": "Add to calendar", "tool_module_name": "mock_calendar_agent", "dependencies": [2], "prompt_message": "Add the confirmed reservation to the user's calendar", "path_name": "primary"}
]"#;

const RECOVERY_PLAN: &str = r#"[
  {"id": 1, "step_name": "Book by phone", "tool_module_name": "mock_calling_agent", "dependencies": [], "prompt_message": "Call the restaurant and book the table by phone", "path_name": "recovery"},
  {"id": 2, "step_name": "Add to calendar", "tool_module_name": "mock_calendar_agent", "dependencies": [1], "prompt_message": "Add the confirmed reservation to the user's calendar", "path_name": "recovery"}
]"#;

/// Mock 客户端：按最后一条 User 消息判断是初始规划还是恢复规划
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .ok_or_else(|| "no user message".to_string())?;

        if last_user.contains(RECOVERY_MARKER) {
            Ok(RECOVERY_PLAN.to_string())
        } else {
            // 真实模型偶尔会包代码块，Mock 也这么做以覆盖去围栏逻辑
            Ok(format!("```json\n{INITIAL_PLAN}\n```"))
        }
    }
}
