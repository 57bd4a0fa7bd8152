//! 计划类型定义
//!
//! 定义步骤、计划、运行历史等核心数据类型

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::AgentOutput;

pub type StepId = String;
pub type RunId = String;

/// 步骤状态：只能沿 Pending → Running → {Completed, Failed} 前进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// 等待依赖满足
    Pending,
    /// 正在执行
    Running,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

impl StepStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn can_become(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 步骤来源：初始计划或失败后的恢复计划
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOrigin {
    Primary,
    Recovery,
}

/// 计划中的一个步骤
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    /// 运行内唯一
    pub id: StepId,
    pub name: String,
    /// 对应 ToolRegistry 中的工具 id
    pub tool_id: String,
    /// 有序且不重复；最后一个依赖即「最近的已知成功前驱」
    pub dependencies: Vec<StepId>,
    /// 交给工具的指令，对执行器不透明
    pub instruction: String,
    pub origin: StepOrigin,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    status: StepStatus,
    result: Option<AgentOutput>,
    /// 被恢复计划取代：保留审计，但不再调度
    superseded: bool,
}

impl Step {
    /// 新建步骤，id 自动生成
    pub fn new(
        name: impl Into<String>,
        tool_id: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self::with_id(
            format!("step_{}", uuid::Uuid::new_v4()),
            name,
            tool_id,
            instruction,
        )
    }

    pub fn with_id(
        id: impl Into<StepId>,
        name: impl Into<String>,
        tool_id: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tool_id: tool_id.into(),
            dependencies: Vec::new(),
            instruction: instruction.into(),
            origin: StepOrigin::Primary,
            created_at: chrono::Utc::now().timestamp_millis(),
            status: StepStatus::Pending,
            result: None,
            superseded: false,
        }
    }

    /// 追加依赖（重复的忽略）
    pub fn depends_on(mut self, dep: impl Into<StepId>) -> Self {
        self.add_dependency(dep.into());
        self
    }

    pub fn origin(mut self, origin: StepOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub(crate) fn add_dependency(&mut self, dep: StepId) {
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn result(&self) -> Option<&AgentOutput> {
        self.result.as_ref()
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded
    }

    /// 可被调度：仍为 Pending 且未被取代
    pub fn is_schedulable(&self) -> bool {
        self.status == StepStatus::Pending && !self.superseded
    }

    pub(crate) fn mark_superseded(&mut self) {
        self.superseded = true;
    }

    pub(crate) fn transition(&mut self, next: StepStatus) -> Result<(), PlanError> {
        if !self.status.can_become(next) {
            return Err(PlanError::InvalidTransition {
                step: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// 根据工具输出结束步骤：Completed 或 Failed，并记录结果
    pub(crate) fn finish(&mut self, output: AgentOutput) -> Result<(), PlanError> {
        let next = if output.is_completed() {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        self.transition(next)?;
        self.result = Some(output);
        Ok(())
    }
}

/// 一次运行的可增长计划；steps 按创建顺序保存，从不删除
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    steps: Vec<Step>,
    #[serde(skip)]
    index: HashMap<StepId, usize>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Result<Self, PlanError> {
        let mut plan = Self::default();
        for step in steps {
            plan.push(step)?;
        }
        Ok(plan)
    }

    /// 追加步骤：拒绝重复 id 与自依赖
    pub fn push(&mut self, step: Step) -> Result<(), PlanError> {
        if self.index.contains_key(&step.id) {
            return Err(PlanError::DuplicateStep(step.id));
        }
        if step.dependencies.iter().any(|d| d == &step.id) {
            return Err(PlanError::SelfDependency(step.id));
        }
        self.index.insert(step.id.clone(), self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Step> {
        match self.index.get(id) {
            Some(&i) => self.steps.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// 运行历史：只追加的可读事件日志，作为重规划的上下文
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunHistory {
    entries: Vec<String>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    pub fn record_success(&mut self, step: &Step, result: &str) {
        self.push(format!("SUCCESS: '{}'. Result: {}", step.name, result));
    }

    pub fn record_failure(&mut self, step: &Step, error: &str) {
        self.push(format!(
            "ATTEMPTED: '{}' but it FAILED with error: {}",
            step.name, error
        ));
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 计划错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Duplicate step id: {0}")]
    DuplicateStep(StepId),
    #[error("Step {0} depends on itself")]
    SelfDependency(StepId),
    #[error("Step not found: {0}")]
    StepNotFound(StepId),
    #[error("Step {step} cannot move from {from} to {to}")]
    InvalidTransition {
        step: StepId,
        from: StepStatus,
        to: StepStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        let mut step = Step::with_id("a", "search", "mock_search_agent", "find");
        step.transition(StepStatus::Running).unwrap();
        step.finish(AgentOutput::completed("found")).unwrap();
        assert_eq!(step.status(), StepStatus::Completed);

        let err = step.transition(StepStatus::Running).unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition { .. }));
        let err = step.finish(AgentOutput::failed("again")).unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition { .. }));
    }

    #[test]
    fn test_pending_cannot_finish_directly() {
        let mut step = Step::with_id("a", "search", "mock_search_agent", "find");
        assert!(step.finish(AgentOutput::completed("x")).is_err());
        assert_eq!(step.status(), StepStatus::Pending);
    }

    #[test]
    fn test_plan_rejects_self_dependency_and_duplicates() {
        let looped = Step::with_id("a", "loop", "t", "").depends_on("a");
        assert_eq!(
            Plan::new(vec![looped]).unwrap_err(),
            PlanError::SelfDependency("a".into())
        );

        let dup = vec![
            Step::with_id("a", "one", "t", ""),
            Step::with_id("a", "two", "t", ""),
        ];
        assert_eq!(
            Plan::new(dup).unwrap_err(),
            PlanError::DuplicateStep("a".into())
        );
    }

    #[test]
    fn test_dependencies_are_deduplicated() {
        let step = Step::with_id("b", "b", "t", "").depends_on("a").depends_on("a");
        assert_eq!(step.dependencies, vec!["a".to_string()]);
    }

    #[test]
    fn test_history_formats() {
        let step = Step::with_id("a", "Find restaurant", "t", "");
        let mut history = RunHistory::new();
        history.record_success(&step, "Bellissimo");
        history.record_failure(&step, "timeout");
        assert_eq!(
            history.entries(),
            &[
                "SUCCESS: 'Find restaurant'. Result: Bellissimo".to_string(),
                "ATTEMPTED: 'Find restaurant' but it FAILED with error: timeout".to_string(),
            ]
        );
    }
}
