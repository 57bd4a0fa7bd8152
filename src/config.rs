//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BUTLER__*` 覆盖（双下划线表示嵌套，如 `BUTLER__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub executor: ExecutorSection,
    pub calls: CallsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单个步骤的工具调用超时（秒）
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

fn default_step_timeout_secs() -> u64 {
    120
}

/// [executor] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    /// 单个步骤因依赖未满足被重排的上限，超过即判定死锁
    #[serde(default = "default_max_requeues")]
    pub max_requeues_per_step: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_requeues_per_step: default_max_requeues(),
        }
    }
}

fn default_max_requeues() -> usize {
    64
}

/// [calls] 段：外呼服务商、结果等待与保留时间、HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct CallsSection {
    /// 等待通话结果的超时（秒）
    #[serde(default = "default_call_timeout_secs")]
    pub default_timeout_secs: u64,
    /// 未被认领的结果保留时间（秒）
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// 已解析键的墓碑保留时间（秒）
    #[serde(default = "default_resolved_ttl_secs")]
    pub resolved_ttl_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_provider_url")]
    pub provider_url: String,
    pub agent_id: Option<String>,
    pub agent_phone_number_id: Option<String>,
    pub test_call_number: Option<String>,
    #[serde(default)]
    pub force_test_call_number: bool,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// butler-calls 的地址（如 http://localhost:8001）；设置后 `butler run` 注册真实的电话工具
    pub service_url: Option<String>,
}

impl Default for CallsSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_call_timeout_secs(),
            retention_secs: default_retention_secs(),
            resolved_ttl_secs: default_resolved_ttl_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            provider_url: default_provider_url(),
            agent_id: None,
            agent_phone_number_id: None,
            test_call_number: None,
            force_test_call_number: false,
            bind_addr: default_bind_addr(),
            service_url: None,
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    300
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_resolved_ttl_secs() -> u64 {
    600
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_provider_url() -> String {
    "https://api.elevenlabs.io/v1/convai/twilio/outbound-call".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8001".to_string()
}

/// 从 config 目录加载配置，环境变量 BUTLER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BUTLER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BUTLER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
