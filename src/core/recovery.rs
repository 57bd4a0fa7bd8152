//! 恢复控制器
//!
//! 步骤失败时向规划器要一份恢复子计划，把无依赖的恢复步骤接到失败步骤的最后一个依赖上，
//! 再插入到失败位置之后。规划器失败是终态：这里不做重试（重试/退避属于规划器自身）。

use std::sync::Arc;

use crate::plan::{RunHistory, Step, StepId, StepOrigin};
use crate::planner::PlanGenerator;

/// 一次恢复尝试的结果
#[derive(Debug)]
pub enum Recovery {
    /// 已重新接线、可直接插入计划的恢复步骤（按返回顺序）
    Graft(Vec<Step>),
    /// 无法恢复（规划器出错或返回空）
    Unavailable(String),
}

/// 恢复控制器：持有规划器，recover(goal, history, failed) 返回 Graft / Unavailable
pub struct RecoveryController {
    planner: Arc<dyn PlanGenerator>,
}

impl RecoveryController {
    pub fn new(planner: Arc<dyn PlanGenerator>) -> Self {
        Self { planner }
    }

    pub async fn recover(&self, goal: &str, history: &RunHistory, failed: &Step) -> Recovery {
        match self
            .planner
            .generate_recovery(goal, history.entries(), failed)
            .await
        {
            Ok(steps) if steps.is_empty() => {
                Recovery::Unavailable("planner returned no recovery steps".to_string())
            }
            Ok(steps) => Recovery::Graft(rewire(steps, failed)),
            Err(e) => {
                tracing::warn!(step = %failed.id, error = %e, "Recovery planning failed");
                Recovery::Unavailable(e.to_string())
            }
        }
    }
}

/// 标记为 Recovery，并把无依赖的恢复步骤接到失败步骤的最后一个依赖上；
/// 恢复步骤之间已声明的依赖保持不变
pub fn rewire(steps: Vec<Step>, failed: &Step) -> Vec<Step> {
    let anchor = failed.dependencies.last().cloned();
    steps
        .into_iter()
        .map(|mut step| {
            step.origin = StepOrigin::Recovery;
            if step.dependencies.is_empty() {
                if let Some(anchor) = &anchor {
                    step.add_dependency(anchor.clone());
                }
            }
            step
        })
        .collect()
}

/// 在 schedule 的 at 位置插入恢复步骤（倒序插入，保证第一个恢复步骤紧跟失败点）
pub fn splice_at(schedule: &mut Vec<StepId>, at: usize, ids: &[StepId]) {
    let at = at.min(schedule.len());
    for id in ids.iter().rev() {
        schedule.insert(at, id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanBuilder;
    use crate::planner::PlannerError;
    use async_trait::async_trait;

    struct FixedPlanner(Option<Vec<Step>>);

    #[async_trait]
    impl PlanGenerator for FixedPlanner {
        async fn generate_initial(&self, _goal: &str) -> Result<Vec<Step>, PlannerError> {
            Ok(Vec::new())
        }

        async fn generate_recovery(
            &self,
            _goal: &str,
            _history: &[String],
            _failed_step: &Step,
        ) -> Result<Vec<Step>, PlannerError> {
            self.0
                .clone()
                .ok_or_else(|| PlannerError::Llm("rate limited".to_string()))
        }
    }

    fn failed_step() -> Step {
        Step::with_id("s2", "Book online", "mock_browser_agent", "book").depends_on("s1")
    }

    #[test]
    fn test_rewire_anchors_on_last_dependency() {
        let steps = PlanBuilder::new()
            .step("r1", "Call", "mock_calling_agent", "call")
            .step("r2", "Calendar", "mock_calendar_agent", "add")
            .sequential("r1", "r2")
            .into_steps();

        let failed = failed_step().depends_on("s0");
        let rewired = rewire(steps, &failed);

        assert_eq!(rewired[0].dependencies, vec!["s0".to_string()]);
        assert_eq!(rewired[1].dependencies, vec!["r1".to_string()]);
        assert!(rewired.iter().all(|s| s.origin == StepOrigin::Recovery));
    }

    #[test]
    fn test_rewire_without_dependencies_keeps_roots() {
        let steps = vec![Step::with_id("r1", "Call", "t", "")];
        let failed = Step::with_id("s1", "First", "t", "");
        let rewired = rewire(steps, &failed);
        assert!(rewired[0].dependencies.is_empty());
    }

    #[test]
    fn test_splice_preserves_order_after_failure_point() {
        let mut schedule: Vec<StepId> = vec!["s1".into(), "s2".into(), "s3".into()];
        splice_at(&mut schedule, 2, &["r1".into(), "r2".into()]);
        assert_eq!(schedule, vec!["s1", "s2", "r1", "r2", "s3"]);
    }

    #[tokio::test]
    async fn test_planner_error_is_unavailable() {
        let controller = RecoveryController::new(Arc::new(FixedPlanner(None)));
        let outcome = controller
            .recover("goal", &RunHistory::new(), &failed_step())
            .await;
        match outcome {
            Recovery::Unavailable(reason) => assert!(reason.contains("rate limited")),
            Recovery::Graft(_) => panic!("Expected Unavailable"),
        }
    }

    #[tokio::test]
    async fn test_empty_recovery_is_unavailable() {
        let controller = RecoveryController::new(Arc::new(FixedPlanner(Some(Vec::new()))));
        let outcome = controller
            .recover("goal", &RunHistory::new(), &failed_step())
            .await;
        assert!(matches!(outcome, Recovery::Unavailable(_)));
    }
}
