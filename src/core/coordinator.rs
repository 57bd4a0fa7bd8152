//! 协调器：目标 → 初始计划 → 执行
//!
//! 初始规划失败（出错或空计划）直接以 PlanningFailed 结束，不进入执行器。

use std::sync::Arc;

use tracing::Instrument;

use crate::core::executor::{PlanExecutor, RunReport};
use crate::core::RunFailure;
use crate::plan::Plan;
use crate::planner::PlanGenerator;

pub struct Coordinator {
    planner: Arc<dyn PlanGenerator>,
    executor: PlanExecutor,
}

impl Coordinator {
    pub fn new(planner: Arc<dyn PlanGenerator>, executor: PlanExecutor) -> Self {
        Self { planner, executor }
    }

    /// 为目标生成计划并执行到结束
    pub async fn run_goal(&self, goal: &str) -> RunReport {
        let run_id = format!("run_{}", uuid::Uuid::new_v4());
        let span = tracing::info_span!("run", run_id = %run_id);
        async move {
            tracing::info!(goal, "Generating initial plan");
            let steps = match self.planner.generate_initial(goal).await {
                Ok(steps) if steps.is_empty() => {
                    return RunReport::failed_before_start(
                        run_id,
                        goal,
                        RunFailure::PlanningFailed("planner returned an empty plan".to_string()),
                    );
                }
                Ok(steps) => steps,
                Err(e) => {
                    tracing::warn!(error = %e, "Initial planning failed");
                    return RunReport::failed_before_start(
                        run_id,
                        goal,
                        RunFailure::PlanningFailed(e.to_string()),
                    );
                }
            };

            match Plan::new(steps) {
                Ok(plan) => self.executor.run_with_id(run_id, goal, plan).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Planner produced an invalid plan");
                    RunReport::failed_before_start(run_id, goal, RunFailure::InvalidPlan(e))
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;
    use crate::planner::PlannerError;
    use crate::tools::{ToolExecutor, ToolRegistry};
    use async_trait::async_trait;

    struct Broken(bool);

    #[async_trait]
    impl PlanGenerator for Broken {
        async fn generate_initial(&self, _goal: &str) -> Result<Vec<Step>, PlannerError> {
            if self.0 {
                Err(PlannerError::Llm("connection refused".to_string()))
            } else {
                Ok(Vec::new())
            }
        }

        async fn generate_recovery(
            &self,
            _goal: &str,
            _history: &[String],
            _failed_step: &Step,
        ) -> Result<Vec<Step>, PlannerError> {
            Ok(Vec::new())
        }
    }

    fn coordinator(planner: Broken) -> Coordinator {
        let planner: Arc<dyn PlanGenerator> = Arc::new(planner);
        let tools = Arc::new(ToolExecutor::new(ToolRegistry::new(), 1));
        Coordinator::new(planner.clone(), PlanExecutor::new(tools, planner))
    }

    #[tokio::test]
    async fn test_planner_error_fails_run() {
        let report = coordinator(Broken(true)).run_goal("book a table").await;
        match report.failure() {
            Some(RunFailure::PlanningFailed(reason)) => assert!(reason.contains("connection refused")),
            other => panic!("Expected PlanningFailed, got {:?}", other),
        }
        assert!(report.plan.is_empty());
        assert!(report.history.is_empty());
    }

    #[tokio::test]
    async fn test_empty_plan_fails_run() {
        let report = coordinator(Broken(false)).run_goal("book a table").await;
        assert!(matches!(report.failure(), Some(RunFailure::PlanningFailed(_))));
    }
}
