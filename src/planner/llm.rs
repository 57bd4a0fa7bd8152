//! 基于 LLM 的计划生成器
//!
//! 用目标（重规划时加上历史与失败步骤详情）和工具目录拼提示词，要求模型只输出 JSON 步骤数组；
//! 解析前去掉 Markdown 代码围栏，再把模型给的整数 id 映射为新的 StepId，未知依赖直接丢弃。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::llm::{LlmClient, Message};
use crate::plan::{Step, StepId, StepOrigin};
use crate::planner::{PlanGenerator, PlannerError};
use crate::tools::ToolRegistry;

const SYSTEM_PROMPT: &str = "You are an expert AI task coordinator. \
Always respond with valid JSON only. NO MARKDOWN, NO CODE FENCES.";

/// 模型输出的单个步骤（id 与依赖为整数，仅在本次回复内有效）
#[derive(Debug, Deserialize)]
struct RawStep {
    id: i64,
    step_name: String,
    tool_module_name: String,
    #[serde(default)]
    dependencies: Vec<i64>,
    prompt_message: String,
    #[serde(default)]
    path_name: Option<String>,
}

pub struct LlmPlanGenerator {
    llm: Arc<dyn LlmClient>,
    /// (工具 id, 描述)，按 id 排序
    tools: Vec<(String, String)>,
}

impl LlmPlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, registry: &ToolRegistry) -> Self {
        Self::with_tools(llm, registry.tool_descriptions())
    }

    pub fn with_tools(llm: Arc<dyn LlmClient>, tools: Vec<(String, String)>) -> Self {
        Self { llm, tools }
    }

    fn tool_catalogue(&self) -> String {
        let mut s = String::from("**Available Tools:**\n");
        for (name, desc) in &self.tools {
            s.push_str(&format!("- \"{name}\": {desc}\n"));
        }
        s
    }

    pub fn initial_prompt(&self, goal: &str) -> String {
        format!(
            r#"You are an expert AI task coordinator. Your sole responsibility is to decompose a user's goal into an ideal, optimistic "happy path" sequence of steps. Do not create any fallback plans.

{tools}
**Your Task & Rules:**
1.  Create the most direct and efficient `primary` path to achieve the user's goal.
2.  Assume everything will work perfectly.
3.  Use Integer IDs & Dependencies, starting from 1.
4.  Output ONLY a valid JSON array of step objects. NO MARKDOWN, NO CODE FENCES.

**JSON Schema for Each Step Object:**
{{
    "id": "integer", "step_name": "string", "tool_module_name": "string",
    "dependencies": "array of integers", "prompt_message": "string", "path_name": "string (always 'primary')"
}}

---
**User's Goal:** "{goal}"
"#,
            tools = self.tool_catalogue(),
        )
    }

    pub fn recovery_prompt(&self, goal: &str, history: &[String], failed: &Step) -> String {
        let history = history
            .iter()
            .map(|h| format!("- {h}"))
            .collect::<Vec<_>>()
            .join("\n");
        let error = failed
            .result()
            .and_then(|r| r.error())
            .unwrap_or("No error message.");
        format!(
            r#"You are an expert AI problem-solving coordinator. A multi-step plan has failed. Your task is to create a short, new sequence of "recovery" steps to overcome the failure.

**Original User Goal:** "{goal}"

**Execution History (What has happened so far):**
{history}

**Failed Step Details:**
- Step Name: "{name}"
- Tool Used: "{tool}"
- Action Attempted: "{instruction}"
- Error Result: "{error}"

{tools}
**Your Task & Rules:**
1.  Analyze the failure and the history.
2.  Propose a new plan to achieve the original goal via the next best method.
3.  **This new plan must be complete.** If the original goal included a final confirmation step (like adding to a calendar), you MUST include that step in this recovery plan, making it dependent on your new recovery actions.
4.  The `path_name` for all new steps must be 'recovery'.
5.  Use Integer IDs & Dependencies, starting from 1.
6.  Output ONLY a valid JSON array of step objects. NO MARKDOWN, NO CODE FENCES.

**JSON Schema for Each Step Object:**
{{
    "id": "integer", "step_name": "string", "tool_module_name": "string",
    "dependencies": "array of integers", "prompt_message": "string", "path_name": "string (always 'recovery')"
}}
"#,
            name = failed.name,
            tool = failed.tool_id,
            instruction = failed.instruction,
            tools = self.tool_catalogue(),
        )
    }

    async fn generate(&self, prompt: String) -> Result<Vec<Step>, PlannerError> {
        let messages = [Message::system(SYSTEM_PROMPT), Message::user(prompt)];
        let raw = self.llm.complete(&messages).await.map_err(PlannerError::Llm)?;
        let steps = parse_plan(&raw).inspect_err(|e| {
            tracing::warn!(error = %e, output = %raw, "Could not parse plan from LLM output");
        })?;
        tracing::info!(steps = steps.len(), "Plan generated and ids mapped");
        Ok(steps)
    }
}

#[async_trait]
impl PlanGenerator for LlmPlanGenerator {
    async fn generate_initial(&self, goal: &str) -> Result<Vec<Step>, PlannerError> {
        self.generate(self.initial_prompt(goal)).await
    }

    async fn generate_recovery(
        &self,
        goal: &str,
        history: &[String],
        failed_step: &Step,
    ) -> Result<Vec<Step>, PlannerError> {
        self.generate(self.recovery_prompt(goal, history, failed_step))
            .await
    }
}

static FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 去掉 Markdown 代码围栏（```json ... ```）；没有围栏时原样返回
pub fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    let re = FENCE_RE.get_or_init(|| Regex::new(r"(?is)^```(?:json)?\s*\r?\n(.*)\r?\n```$").ok());
    if let Some(inner) = re
        .as_ref()
        .and_then(|re| re.captures(s))
        .and_then(|c| c.get(1))
    {
        return inner.as_str().trim();
    }

    // 围栏前后还有说明文字
    match (s.find("```"), s.rfind("```")) {
        (Some(first), Some(last)) if last >= first + 3 => {
            let inner = s.get(first + 3..last).unwrap_or(s).trim_start();
            let inner = inner
                .strip_prefix("json")
                .or_else(|| inner.strip_prefix("JSON"))
                .unwrap_or(inner);
            inner.trim()
        }
        _ => s,
    }
}

/// 解析模型输出为步骤列表：整数 id → 新 StepId，依赖中未知 id 被丢弃
pub fn parse_plan(raw: &str) -> Result<Vec<Step>, PlannerError> {
    let json = strip_code_fences(raw);
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| PlannerError::Parse(e.to_string()))?;
    if !value.is_array() {
        return Err(PlannerError::Invalid(
            "model did not return a JSON array of steps".to_string(),
        ));
    }
    let raw_steps: Vec<RawStep> =
        serde_json::from_value(value).map_err(|e| PlannerError::Invalid(e.to_string()))?;

    let mut id_map: HashMap<i64, StepId> = HashMap::new();
    let mut steps = Vec::with_capacity(raw_steps.len());
    for raw in &raw_steps {
        let origin = match raw.path_name.as_deref() {
            Some("recovery") => StepOrigin::Recovery,
            _ => StepOrigin::Primary,
        };
        let step = Step::new(&raw.step_name, &raw.tool_module_name, &raw.prompt_message).origin(origin);
        if id_map.insert(raw.id, step.id.clone()).is_some() {
            return Err(PlannerError::Invalid(format!("duplicate step id {}", raw.id)));
        }
        steps.push(step);
    }

    for (step, raw) in steps.iter_mut().zip(&raw_steps) {
        for dep in &raw.dependencies {
            match id_map.get(dep) {
                Some(id) if *id != step.id => step.add_dependency(id.clone()),
                Some(_) => {}
                None => tracing::debug!(step = %step.name, dependency = *dep, "Dropping unknown dependency"),
            }
        }
    }

    Ok(steps)
}
