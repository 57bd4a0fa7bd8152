//! 规划器抽象
//!
//! PlanGenerator 把目标（以及重规划时的历史与失败步骤）映射为带依赖的步骤列表。
//! Ok(空列表) 与 Err 都表示「无法给出计划」，由调用方转为运行失败。

use async_trait::async_trait;
use thiserror::Error;

use crate::plan::Step;

/// 规划失败原因
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Plan parse error: {0}")]
    Parse(String),

    #[error("Invalid plan: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait PlanGenerator: Send + Sync {
    /// 为目标生成初始（主路径）计划
    async fn generate_initial(&self, goal: &str) -> Result<Vec<Step>, PlannerError>;

    /// 某步骤失败后生成恢复计划；history 为截至目前的运行历史
    async fn generate_recovery(
        &self,
        goal: &str,
        history: &[String],
        failed_step: &Step,
    ) -> Result<Vec<Step>, PlannerError>;
}
