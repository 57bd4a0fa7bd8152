//! 计划构建器
//!
//! 提供流畅的API来构建计划（测试、演示规划器与手写计划使用）

use crate::plan::types::*;

/// 计划构建器
#[derive(Default)]
pub struct PlanBuilder {
    steps: Vec<Step>,
    origin: Option<StepOrigin>,
}

impl PlanBuilder {
    /// 创建新的计划构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 构建恢复计划：所有步骤标记为 Recovery
    pub fn recovery() -> Self {
        Self {
            steps: Vec::new(),
            origin: Some(StepOrigin::Recovery),
        }
    }

    /// 添加步骤
    pub fn step(
        mut self,
        id: impl Into<StepId>,
        name: impl Into<String>,
        tool_id: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        self.steps.push(Step::with_id(id, name, tool_id, instruction));
        self
    }

    /// 设置顺序依赖
    pub fn sequential(self, from: impl Into<StepId>, to: &str) -> Self {
        self.depends_on_all(to, vec![from.into()])
    }

    /// 设置AND依赖（所有前置步骤）
    pub fn depends_on_all(mut self, step_id: &str, deps: Vec<StepId>) -> Self {
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == step_id) {
            for dep in deps {
                step.add_dependency(dep);
            }
        }
        self
    }

    /// 只取步骤列表（规划器返回值的形状）
    pub fn into_steps(self) -> Vec<Step> {
        let origin = self.origin;
        self.steps
            .into_iter()
            .map(|s| match origin {
                Some(o) => s.origin(o),
                None => s,
            })
            .collect()
    }

    /// 构建计划
    pub fn build(self) -> Result<Plan, PlanError> {
        Plan::new(self.into_steps())
    }
}
