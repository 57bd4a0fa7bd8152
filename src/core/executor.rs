//! 步骤执行器：按依赖驱动一份计划直至结束
//!
//! 在可增长的 schedule 上用游标推进：依赖未满足的步骤移到队尾（带无进展检测，环或缺失依赖不会死循环），
//! 就绪步骤以依赖结果拼接上下文后交给 ToolExecutor；失败时由 RecoveryController 把恢复步骤插在失败点之后。
//! Plan 与 RunHistory 只由本任务修改，不需要加锁。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::core::recovery::{splice_at, Recovery, RecoveryController};
use crate::core::{RunEvent, RunFailure};
use crate::plan::{DependencyGraph, Plan, PlanError, RunHistory, RunId, Step, StepId, StepStatus};
use crate::planner::PlanGenerator;
use crate::tools::{executor::preview, AgentOutput, ToolExecutor};

/// 无依赖步骤的上下文
pub const FIRST_STEP_CONTEXT: &str = "This is the first step.";

/// 单步默认的最大重排次数
pub const DEFAULT_MAX_REQUEUES_PER_STEP: usize = 64;

/// 运行最终状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Completed,
    Failed(#[serde(serialize_with = "failure_as_string")] RunFailure),
}

fn failure_as_string<S: serde::Serializer>(f: &RunFailure, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&f.to_string())
}

/// 一次运行的完整记录：计划（含恢复步骤）、历史、执行顺序
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub goal: String,
    pub status: RunStatus,
    pub plan: Plan,
    pub history: RunHistory,
    /// 真正进入 Running 的步骤，按开始顺序
    pub executed: Vec<StepId>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match &self.status {
            RunStatus::Failed(f) => Some(f),
            RunStatus::Completed => None,
        }
    }

    /// 不经执行直接失败的运行（如初始规划失败）
    pub(crate) fn failed_before_start(run_id: RunId, goal: &str, failure: RunFailure) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            run_id,
            goal: goal.to_string(),
            status: RunStatus::Failed(failure),
            plan: Plan::default(),
            history: RunHistory::new(),
            executed: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }
}

/// 一次运行的私有可变状态
struct RunState {
    plan: Plan,
    history: RunHistory,
    schedule: Vec<StepId>,
    executed: Vec<StepId>,
    completed: HashSet<StepId>,
    requeues: HashMap<StepId, usize>,
}

/// 计划执行器：持有工具执行器与恢复控制器，可被多次运行共享
pub struct PlanExecutor {
    tools: Arc<ToolExecutor>,
    recovery: RecoveryController,
    max_requeues_per_step: usize,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl PlanExecutor {
    pub fn new(tools: Arc<ToolExecutor>, planner: Arc<dyn PlanGenerator>) -> Self {
        Self {
            tools,
            recovery: RecoveryController::new(planner),
            max_requeues_per_step: DEFAULT_MAX_REQUEUES_PER_STEP,
            events: None,
        }
    }

    pub fn max_requeues_per_step(mut self, max: usize) -> Self {
        self.max_requeues_per_step = max.max(1);
        self
    }

    /// 订阅过程事件
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// 执行计划；工具失败与规划失败都转为 RunStatus，不会以 Err 逃出
    pub async fn run(&self, goal: &str, plan: Plan) -> RunReport {
        let run_id = format!("run_{}", uuid::Uuid::new_v4());
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_with_id(run_id, goal, plan).instrument(span).await
    }

    pub(crate) async fn run_with_id(&self, run_id: RunId, goal: &str, plan: Plan) -> RunReport {
        let started_at = chrono::Utc::now().timestamp_millis();
        tracing::info!(goal, steps = plan.len(), "Starting plan execution");

        let mut state = RunState {
            schedule: plan.ids(),
            completed: plan
                .steps()
                .iter()
                .filter(|s| s.status() == StepStatus::Completed)
                .map(|s| s.id.clone())
                .collect(),
            plan,
            history: RunHistory::new(),
            executed: Vec::new(),
            requeues: HashMap::new(),
        };

        let status = match self.drive(goal, &mut state).await {
            Ok(()) => {
                tracing::info!(history = state.history.len(), "Plan execution finished");
                RunStatus::Completed
            }
            Err(failure) => {
                tracing::warn!(error = %failure, "Plan execution failed");
                RunStatus::Failed(failure)
            }
        };

        self.emit(RunEvent::RunFinished {
            completed: status == RunStatus::Completed,
            detail: match &status {
                RunStatus::Completed => "completed".to_string(),
                RunStatus::Failed(f) => f.to_string(),
            },
        });

        RunReport {
            run_id,
            goal: goal.to_string(),
            status,
            plan: state.plan,
            history: state.history,
            executed: state.executed,
            started_at,
            finished_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    async fn drive(&self, goal: &str, state: &mut RunState) -> Result<(), RunFailure> {
        check_graph(&state.plan)?;

        let mut i = 0;
        // 自上次有步骤执行以来的连续重排次数
        let mut idle = 0usize;

        while i < state.schedule.len() {
            let id = state.schedule[i].clone();
            i += 1;

            let step = state
                .plan
                .get(&id)
                .ok_or_else(|| PlanError::StepNotFound(id.clone()))?;
            if !step.is_schedulable() {
                continue;
            }

            // 缺失依赖与环已在前面排除；剩下的死锁来自依赖了失败（或被取代）步骤的恢复步骤
            if !step.dependencies.iter().all(|d| state.completed.contains(d)) {
                let count = state.requeues.entry(id.clone()).or_insert(0);
                *count += 1;
                idle += 1;
                let waiting = state.plan.steps().iter().filter(|s| s.is_schedulable()).count();
                if idle >= waiting || *count > self.max_requeues_per_step {
                    return Err(RunFailure::DependencyDeadlock(blocked_steps(state, i)));
                }
                tracing::debug!(step = %id, "Dependencies not ready, requeued");
                state.schedule.push(id);
                continue;
            }
            idle = 0;

            let context = build_context(&state.plan, step);
            let (name, tool_id, instruction) =
                (step.name.clone(), step.tool_id.clone(), step.instruction.clone());

            mutate(&mut state.plan, &id, |s| s.transition(StepStatus::Running))?;
            state.executed.push(id.clone());
            tracing::info!(step = %id, name = %name, tool = %tool_id, "Executing step");
            self.emit(RunEvent::StepStarted {
                step: id.clone(),
                name: name.clone(),
                tool: tool_id.clone(),
            });

            let output = self.tools.dispatch(&tool_id, &instruction, &context).await;
            mutate(&mut state.plan, &id, |s| s.finish(output.clone()))?;
            self.emit(RunEvent::StepFinished {
                step: id.clone(),
                name: name.clone(),
                completed: output.is_completed(),
                preview: preview(output.result().or(output.error()).unwrap_or_default()),
            });

            match output {
                AgentOutput::Completed { result } => {
                    if let Some(step) = state.plan.get(&id) {
                        state.history.record_success(step, &result);
                    }
                    state.completed.insert(id);
                }
                AgentOutput::Failed { error } => {
                    let failed = state
                        .plan
                        .get(&id)
                        .cloned()
                        .ok_or_else(|| PlanError::StepNotFound(id.clone()))?;
                    state.history.record_failure(&failed, &error);
                    tracing::warn!(step = %id, error = %error, "Step failed, triggering re-planning");

                    match self.recovery.recover(goal, &state.history, &failed).await {
                        Recovery::Graft(steps) => self.graft(state, &failed, i, steps)?,
                        Recovery::Unavailable(reason) => {
                            return Err(RunFailure::RecoveryUnavailable { step: id, reason });
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// 把恢复步骤加入计划并插到游标处；依赖失败步骤的待执行步骤被标记为已取代
    fn graft(
        &self,
        state: &mut RunState,
        failed: &Step,
        cursor: usize,
        steps: Vec<Step>,
    ) -> Result<(), RunFailure> {
        let ids: Vec<StepId> = steps.iter().map(|s| s.id.clone()).collect();
        for step in steps {
            state.plan.push(step)?;
        }
        check_graph(&state.plan)?;
        splice_at(&mut state.schedule, cursor, &ids);

        // 恢复步骤本身不被取代：若它依赖失败步骤，则由重排上限判定为死锁
        let graph = DependencyGraph::new(&state.plan);
        for dependent in graph.dependents_of(&failed.id) {
            if ids.contains(&dependent) {
                continue;
            }
            if let Some(step) = state.plan.get_mut(&dependent) {
                if step.is_schedulable() {
                    tracing::info!(step = %dependent, "Superseded by recovery plan");
                    step.mark_superseded();
                }
            }
        }

        tracing::info!(failed = %failed.id, count = ids.len(), "Recovery steps spliced into plan");
        self.emit(RunEvent::RecoverySpliced {
            failed: failed.id.clone(),
            steps: ids,
        });
        Ok(())
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// 依赖结果拼接为上下文；无依赖时为固定的首步标记
pub fn build_context(plan: &Plan, step: &Step) -> String {
    let mut context = String::new();
    for dep_id in &step.dependencies {
        if let Some(result) = plan.get(dep_id).and_then(|d| d.result()).and_then(|r| r.result()) {
            context.push_str(&format!("The result of a previous step was: {result}\n"));
        }
    }
    if context.is_empty() {
        context.push_str(FIRST_STEP_CONTEXT);
    }
    context
}

/// 缺失依赖或依赖环：在执行前直接失败
fn check_graph(plan: &Plan) -> Result<(), RunFailure> {
    let graph = DependencyGraph::new(plan);
    if let Some((step, dependency)) = graph.missing_dependencies().first() {
        return Err(RunFailure::MissingDependency {
            step: step.clone(),
            dependency: dependency.clone(),
        });
    }
    let cyclic = graph.cyclic_steps();
    if !cyclic.is_empty() {
        return Err(RunFailure::DependencyDeadlock(cyclic));
    }
    Ok(())
}

fn blocked_steps(state: &RunState, from: usize) -> Vec<StepId> {
    let mut seen = HashSet::new();
    state.schedule[from.saturating_sub(1)..]
        .iter()
        .filter(|id| state.plan.get(id).is_some_and(|s| s.is_schedulable()))
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

fn mutate(
    plan: &mut Plan,
    id: &str,
    f: impl FnOnce(&mut Step) -> Result<(), PlanError>,
) -> Result<(), PlanError> {
    let step = plan
        .get_mut(id)
        .ok_or_else(|| PlanError::StepNotFound(id.to_string()))?;
    f(step)
}
