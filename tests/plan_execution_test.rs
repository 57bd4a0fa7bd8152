//! 计划执行集成测试：依赖顺序、上下文传递、失败恢复与插入位置

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use butler::core::{PlanExecutor, RunEvent, RunFailure, FIRST_STEP_CONTEXT};
use butler::plan::{Plan, PlanBuilder, Step, StepOrigin, StepStatus};
use butler::planner::{PlanGenerator, PlannerError};
use butler::tools::{AgentOutput, Tool, ToolExecutor, ToolRegistry};
use butler::Coordinator;
use tokio::sync::mpsc;

/// 一次工具调用的记录
#[derive(Debug, Clone)]
struct Call {
    tool: String,
    instruction: String,
    context: String,
}

/// 指令以 "fail:" 开头时失败（其后为错误信息），否则返回 "result of <instruction>"
struct RecordingTool {
    name: String,
    log: Arc<Mutex<Vec<Call>>>,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records every call"
    }

    async fn execute(&self, instruction: &str, context: &str) -> AgentOutput {
        self.log.lock().unwrap().push(Call {
            tool: self.name.clone(),
            instruction: instruction.to_string(),
            context: context.to_string(),
        });
        match instruction.strip_prefix("fail:") {
            Some(error) => AgentOutput::failed(error.trim()),
            None => AgentOutput::completed(format!("result of {instruction}")),
        }
    }
}

struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Never finishes in time"
    }

    async fn execute(&self, _instruction: &str, _context: &str) -> AgentOutput {
        tokio::time::sleep(Duration::from_secs(10)).await;
        AgentOutput::completed("too late")
    }
}

/// 按脚本返回计划的规划器；记录每次重规划收到的失败步骤与历史
#[derive(Default)]
struct ScriptedPlanner {
    initial: Mutex<Option<Vec<Step>>>,
    recoveries: Mutex<VecDeque<Vec<Step>>>,
    seen: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedPlanner {
    fn new(initial: Vec<Step>, recoveries: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            initial: Mutex::new(Some(initial)),
            recoveries: Mutex::new(recoveries.into()),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl PlanGenerator for ScriptedPlanner {
    async fn generate_initial(&self, _goal: &str) -> Result<Vec<Step>, PlannerError> {
        Ok(self.initial.lock().unwrap().take().unwrap_or_default())
    }

    async fn generate_recovery(
        &self,
        _goal: &str,
        history: &[String],
        failed_step: &Step,
    ) -> Result<Vec<Step>, PlannerError> {
        self.seen
            .lock()
            .unwrap()
            .push((failed_step.id.clone(), history.to_vec()));
        self.recoveries
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PlannerError::Llm("no more recovery plans".to_string()))
    }
}

struct Harness {
    log: Arc<Mutex<Vec<Call>>>,
    tools: Arc<ToolExecutor>,
}

fn harness() -> Harness {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    for name in ["search", "browser", "calendar", "phone"] {
        registry.register(RecordingTool {
            name: name.to_string(),
            log: log.clone(),
        });
    }
    registry.register(SlowTool);
    Harness {
        log,
        tools: Arc::new(ToolExecutor::with_timeout(registry, Duration::from_millis(100))),
    }
}

#[tokio::test]
async fn test_end_to_end_success() {
    let h = harness();
    let planner = ScriptedPlanner::new(
        PlanBuilder::new()
            .step("A", "Find restaurant", "search", "find")
            .step("B", "Add to calendar", "calendar", "add")
            .sequential("A", "B")
            .into_steps(),
        vec![],
    );
    let coordinator = Coordinator::new(
        planner.clone(),
        PlanExecutor::new(h.tools.clone(), planner.clone()),
    );

    let report = coordinator.run_goal("dinner").await;
    assert!(report.is_completed());
    assert_eq!(report.executed, vec!["A", "B"]);

    let calls = h.log.lock().unwrap().clone();
    assert_eq!(calls[0].context, FIRST_STEP_CONTEXT);
    assert!(calls[1].context.contains("result of find"));
    assert_eq!(
        report.history.entries(),
        &[
            "SUCCESS: 'Find restaurant'. Result: result of find".to_string(),
            "SUCCESS: 'Add to calendar'. Result: result of add".to_string(),
        ]
    );
    assert!(planner.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_end_to_end_recovery() {
    let h = harness();
    let planner = ScriptedPlanner::new(
        PlanBuilder::new()
            .step("A", "Find restaurant", "search", "find")
            .step("B", "Book online", "browser", "fail: no availability")
            .sequential("A", "B")
            .into_steps(),
        vec![vec![Step::with_id("C", "Book by phone", "phone", "call")]],
    );
    let coordinator = Coordinator::new(
        planner.clone(),
        PlanExecutor::new(h.tools.clone(), planner.clone()),
    );

    let report = coordinator.run_goal("dinner").await;
    assert!(report.is_completed(), "{:?}", report.status);
    assert_eq!(report.executed, vec!["A", "B", "C"]);

    let c = report.plan.get("C").unwrap();
    assert_eq!(c.dependencies, vec!["A".to_string()]);
    assert_eq!(c.origin, StepOrigin::Recovery);
    assert_eq!(c.status(), StepStatus::Completed);
    assert_eq!(report.plan.get("B").unwrap().status(), StepStatus::Failed);

    // 恢复步骤拿到的是 A 的结果
    let calls = h.log.lock().unwrap().clone();
    assert!(calls[2].context.contains("result of find"));

    let seen = planner.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "B");
    assert_eq!(
        seen[0].1.last().map(String::as_str),
        Some("ATTEMPTED: 'Book online' but it FAILED with error: no availability")
    );
}

#[tokio::test]
async fn test_recovery_is_spliced_right_after_failure() {
    let h = harness();
    // S3 与 S2 无关，应在恢复步骤之后照常执行；S4 依赖失败的 S2，被恢复计划取代
    let plan = PlanBuilder::new()
        .step("S1", "Search", "search", "find")
        .step("S2", "Book", "browser", "fail: form broken")
        .step("S3", "Unrelated", "search", "weather")
        .step("S4", "Confirm", "calendar", "add")
        .sequential("S1", "S2")
        .sequential("S2", "S4")
        .build()
        .unwrap();
    let recovery = PlanBuilder::new()
        .step("R1", "Call", "phone", "call")
        .step("R2", "Calendar", "calendar", "add")
        .sequential("R1", "R2")
        .into_steps();
    let planner = ScriptedPlanner::new(vec![], vec![recovery]);
    let executor = PlanExecutor::new(h.tools.clone(), planner);

    let report = executor.run("dinner", plan).await;
    assert!(report.is_completed(), "{:?}", report.status);
    assert_eq!(report.executed, vec!["S1", "S2", "R1", "R2", "S3"]);

    assert_eq!(report.plan.get("R1").unwrap().dependencies, vec!["S1".to_string()]);
    assert_eq!(report.plan.get("R2").unwrap().dependencies, vec!["R1".to_string()]);

    let s4 = report.plan.get("S4").unwrap();
    assert!(s4.is_superseded());
    assert_eq!(s4.status(), StepStatus::Pending);

    // 步骤按创建顺序保存，恢复步骤追加在后
    let ids: Vec<_> = report.plan.steps().iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["S1", "S2", "S3", "S4", "R1", "R2"]);
}

#[tokio::test]
async fn test_failed_recovery_step_triggers_another_recovery() {
    let h = harness();
    let plan = PlanBuilder::new()
        .step("A", "Search", "search", "find")
        .step("B", "Book", "browser", "fail: broken")
        .sequential("A", "B")
        .build()
        .unwrap();
    let planner = ScriptedPlanner::new(
        vec![],
        vec![
            vec![Step::with_id("R1", "Call", "phone", "fail: no answer")],
            vec![Step::with_id("R2", "Remind user", "calendar", "remind")],
        ],
    );
    let report = PlanExecutor::new(h.tools.clone(), planner.clone())
        .run("dinner", plan)
        .await;

    assert!(report.is_completed(), "{:?}", report.status);
    assert_eq!(report.executed, vec!["A", "B", "R1", "R2"]);
    // R1 锚定在 B 的依赖 A 上；R2 锚定在 R1 的最后一个依赖（同样是 A）
    assert_eq!(report.plan.get("R2").unwrap().dependencies, vec!["A".to_string()]);
    assert_eq!(planner.seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_no_recovery_plan_fails_run() {
    let h = harness();
    let plan = PlanBuilder::new()
        .step("A", "Book", "browser", "fail: broken")
        .build()
        .unwrap();
    let planner = ScriptedPlanner::new(vec![], vec![vec![]]);
    let report = PlanExecutor::new(h.tools.clone(), planner).run("dinner", plan).await;

    assert!(matches!(
        report.failure(),
        Some(RunFailure::RecoveryUnavailable { step, .. }) if step == "A"
    ));
    assert_eq!(report.history.len(), 1);
}

#[tokio::test]
async fn test_unknown_tool_is_a_step_failure() {
    let h = harness();
    let plan = Plan::new(vec![Step::with_id("A", "Teleport", "teleporter", "go")]).unwrap();
    let planner = ScriptedPlanner::new(
        vec![],
        vec![vec![Step::with_id("R", "Walk", "search", "walk")]],
    );
    let report = PlanExecutor::new(h.tools.clone(), planner.clone())
        .run("travel", plan)
        .await;

    assert!(report.is_completed());
    let a = report.plan.get("A").unwrap();
    assert_eq!(a.result().and_then(|r| r.error()), Some("Unknown tool: teleporter"));
    // 失败步骤没有依赖，恢复步骤保持为根
    assert!(report.plan.get("R").unwrap().dependencies.is_empty());
}

#[tokio::test]
async fn test_step_timeout_is_a_step_failure() {
    let h = harness();
    let plan = Plan::new(vec![Step::with_id("A", "Wait", "slow", "wait")]).unwrap();
    let planner = ScriptedPlanner::new(vec![], vec![]);
    let report = PlanExecutor::new(h.tools.clone(), planner).run("wait", plan).await;

    let a = report.plan.get("A").unwrap();
    assert_eq!(a.status(), StepStatus::Failed);
    assert!(a
        .result()
        .and_then(|r| r.error())
        .unwrap_or_default()
        .starts_with("Tool timeout: slow"));
    assert!(matches!(
        report.failure(),
        Some(RunFailure::RecoveryUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_dependencies_run_before_dependents_regardless_of_order() {
    let h = harness();
    let plan = PlanBuilder::new()
        .step("D", "Last", "calendar", "d")
        .step("C", "Third", "calendar", "c")
        .step("B", "Second", "search", "b")
        .step("A", "First", "search", "a")
        .sequential("A", "B")
        .sequential("B", "C")
        .sequential("C", "D")
        .build()
        .unwrap();
    let planner = ScriptedPlanner::new(vec![], vec![]);
    let report = PlanExecutor::new(h.tools.clone(), planner).run("chain", plan).await;

    assert!(report.is_completed());
    assert_eq!(report.executed, vec!["A", "B", "C", "D"]);
}

#[tokio::test]
async fn test_missing_dependency_is_reported_without_running() {
    let h = harness();
    let plan = Plan::new(vec![
        Step::with_id("A", "First", "search", "a"),
        Step::with_id("B", "Second", "search", "b").depends_on("ghost"),
    ])
    .unwrap();
    let planner = ScriptedPlanner::new(vec![], vec![]);
    let report = PlanExecutor::new(h.tools.clone(), planner).run("x", plan).await;

    assert!(matches!(
        report.failure(),
        Some(RunFailure::MissingDependency { step, dependency }) if step == "B" && dependency == "ghost"
    ));
    assert!(report.executed.is_empty());
    assert!(h.log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_events_follow_execution() {
    let h = harness();
    let plan = PlanBuilder::new()
        .step("A", "Search", "search", "find")
        .step("B", "Book", "browser", "fail: broken")
        .sequential("A", "B")
        .build()
        .unwrap();
    let planner = ScriptedPlanner::new(vec![], vec![vec![Step::with_id("R", "Call", "phone", "call")]]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let executor = PlanExecutor::new(h.tools.clone(), planner).with_events(tx);

    let report = executor.run("dinner", plan).await;
    drop(executor);
    assert!(report.is_completed());

    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }
    let started: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::StepStarted { step, .. } => Some(step.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["A", "B", "R"]);
    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::RecoverySpliced { failed, steps } if failed == "B" && steps == &vec!["R".to_string()]
    )));
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunFinished { completed: true, .. })
    ));
}
