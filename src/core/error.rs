//! 运行级失败类型
//!
//! 工具失败由恢复控制器在运行内部消化；只有以下情况会让整次运行以失败告终。

use thiserror::Error;

use crate::plan::{PlanError, StepId};

/// 运行失败原因（RunStatus::Failed 携带）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    /// 规划器没有给出初始计划
    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    /// 步骤失败且规划器给不出恢复计划
    #[error("Step {step} failed and no recovery plan is available: {reason}")]
    RecoveryUnavailable { step: StepId, reason: String },

    /// 依赖了计划中不存在的步骤
    #[error("Step {step} depends on unknown step {dependency}")]
    MissingDependency { step: StepId, dependency: StepId },

    /// 依赖永远无法满足（环或无进展）
    #[error("Dependency deadlock: {0:?} can never become ready")]
    DependencyDeadlock(Vec<StepId>),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
}
