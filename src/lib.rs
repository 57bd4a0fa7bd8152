//! Butler - 计划执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 步骤执行器、失败恢复、目标协调与组件构建
//! - **calls**: 外呼、通话结果分类、webhook 回调关联
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 初始化
//! - **plan**: 步骤、计划、运行历史与依赖图
//! - **planner**: 计划生成（LLM）
//! - **tools**: 工具注册表、执行器与演示工具

pub mod calls;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod planner;
pub mod tools;

pub use crate::core::{Coordinator, PlanExecutor, RunReport, RunStatus};
pub use crate::plan::{Plan, PlanBuilder, Step};
pub use crate::tools::{AgentOutput, Tool, ToolRegistry};
