//! 组件构建器：按配置组装工具注册表、LLM、规划器与执行器
//!
//! CLI 与 HTTP 服务共享同一套组装逻辑。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::calls::{CallRunner, CallingTool, RemoteCallService};
use crate::config::AppConfig;
use crate::core::{Coordinator, PlanExecutor, RunEvent};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::planner::{LlmPlanGenerator, PlanGenerator};
use crate::tools::{
    MockBrowserTool, MockCalendarTool, MockCallingTool, MockSearchTool, ToolExecutor, ToolRegistry,
};

pub struct ButlerBuilder {
    config: AppConfig,
    mock_tools: bool,
    calls: Option<Arc<dyn CallRunner>>,
    llm: Option<Arc<dyn LlmClient>>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl ButlerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            mock_tools: true,
            calls: None,
            llm: None,
            events: None,
        }
    }

    /// 是否注册演示用的 mock 工具（默认注册）
    pub fn with_mock_tools(mut self, enable: bool) -> Self {
        self.mock_tools = enable;
        self
    }

    /// 注册真实的电话工具（进程内 CallService 或远端 butler-calls）
    pub fn with_call_service(mut self, service: Arc<dyn CallRunner>) -> Self {
        self.calls = Some(service);
        self
    }

    /// 配置了 calls.service_url 时接入远端电话服务
    pub fn with_configured_calls(self) -> Self {
        if self.config.calls.service_url.is_none() {
            return self;
        }
        match RemoteCallService::from_config(&self.config.calls) {
            Ok(remote) => {
                tracing::info!(
                    url = self.config.calls.service_url.as_deref().unwrap_or_default(),
                    "Real calling tool enabled"
                );
                self.with_call_service(Arc::new(remote))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Calling service unavailable, real calls disabled");
                self
            }
        }
    }

    /// 指定 LLM 客户端，不再按配置选择
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 执行器的过程事件发往 tx
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();

        if self.mock_tools {
            tools.register(MockSearchTool::default());
            tools.register(MockBrowserTool::default());
            tools.register(MockCalendarTool::default());
            tools.register(MockCallingTool::default());
        }

        if let Some(service) = &self.calls {
            tools.register(CallingTool::new(service.clone()));
        }

        tools
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        self.llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config))
    }

    /// 规划器的工具目录与执行器的注册表来自同一份注册表
    pub fn build_coordinator(&self) -> Coordinator {
        let registry = self.build_tool_registry();
        let planner: Arc<dyn PlanGenerator> =
            Arc::new(LlmPlanGenerator::new(self.build_llm(), &registry));
        let tools = Arc::new(ToolExecutor::new(
            registry,
            self.config.tools.step_timeout_secs,
        ));
        let mut executor = PlanExecutor::new(tools, planner.clone())
            .max_requeues_per_step(self.config.executor.max_requeues_per_step);
        if let Some(tx) = &self.events {
            executor = executor.with_events(tx.clone());
        }
        Coordinator::new(planner, executor)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// 便捷函数：加载配置（失败时退回默认值）并创建构建器
pub fn create_butler_builder(config_path: Option<PathBuf>) -> ButlerBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    ButlerBuilder::new(config)
}
