//! 电话工具：把外呼 + 等待结果包装成计划可调度的 Tool

use std::sync::Arc;

use async_trait::async_trait;

use crate::calls::{CallError, CallRequest, CallResult, CallbackError};
use crate::planner::strip_code_fences;
use crate::tools::{AgentOutput, Tool};

pub const CALLING_TOOL_ID: &str = "calling_agent";

/// 发起通话并等到结果：进程内的 CallService，或远端 butler-calls 服务
#[async_trait]
pub trait CallRunner: Send + Sync {
    async fn start_and_wait(&self, request: CallRequest) -> Result<CallResult, CallError>;
}

pub struct CallingTool {
    service: Arc<dyn CallRunner>,
}

impl CallingTool {
    pub fn new(service: Arc<dyn CallRunner>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CallingTool {
    fn name(&self) -> &str {
        CALLING_TOOL_ID
    }

    fn description(&self) -> &str {
        "Places a real phone call to a business and waits for the outcome. The instruction must be a JSON object \
         with business_name, business_phone (E.164), user_name, intent (reserve/reschedule/cancel/info) and details."
    }

    async fn execute(&self, instruction: &str, _context: &str) -> AgentOutput {
        let request: CallRequest = match serde_json::from_str(strip_code_fences(instruction)) {
            Ok(r) => r,
            Err(e) => return AgentOutput::failed(format!("Invalid call request: {e}")),
        };

        match self.service.start_and_wait(request).await {
            Ok(result) if result.is_completed() => AgentOutput::completed(result.message),
            Ok(result) => AgentOutput::failed(format!("{} ({})", result.message, result.status)),
            Err(CallError::Callback(CallbackError::Timeout { timeout, .. })) => AgentOutput::failed(
                format!("Call outcome unknown: no post-call result within {timeout:?}"),
            ),
            Err(e) => AgentOutput::failed(e.to_string()),
        }
    }
}
