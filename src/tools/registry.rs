//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / execute），由 ToolRegistry 按 id 注册与查找，
//! ToolExecutor 在调用时加超时并统一转成 AgentOutput。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::tools::AgentOutput;

/// 工具 trait：稳定 id、描述（供规划器理解）、异步执行
///
/// instruction 对执行器不透明（由规划器写给该工具）；context 为依赖步骤结果拼接而成的上下文。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具 id（对应 Step 的 tool_id）
    fn name(&self) -> &str;

    /// 工具描述（写入规划 prompt 的 Available Tools 段）
    fn description(&self) -> &str;

    /// 执行工具；失败通过 AgentOutput::Failed 表达，而不是 panic 或 Err
    async fn execute(&self, instruction: &str, context: &str) -> AgentOutput;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，启动后只读，可被多个运行共享
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 未知工具视为一次普通失败，不中断运行
    pub async fn execute(&self, name: &str, instruction: &str, context: &str) -> AgentOutput {
        match self.tools.get(name) {
            Some(tool) => tool.execute(instruction, context).await,
            None => AgentOutput::failed(format!("Unknown tool: {name}")),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description) 列表（按名称排序），用于生成 prompt 中的 Available Tools 段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }
}
