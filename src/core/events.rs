//! 运行过程事件：供调用方展示进度（CLI 打印、服务端推送）

use serde::Serialize;

use crate::plan::StepId;

/// 单次运行的过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// 步骤开始执行
    StepStarted {
        step: StepId,
        name: String,
        tool: String,
    },
    /// 步骤结束（completed / failed）
    StepFinished {
        step: StepId,
        name: String,
        completed: bool,
        preview: String,
    },
    /// 恢复计划已插入
    RecoverySpliced { failed: StepId, steps: Vec<StepId> },
    /// 运行结束
    RunFinished { completed: bool, detail: String },
}
