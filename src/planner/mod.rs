//! 规划层：PlanGenerator 抽象与基于 LLM 的实现

pub mod llm;
pub mod traits;

pub use llm::{parse_plan, strip_code_fences, LlmPlanGenerator};
pub use traits::{PlanGenerator, PlannerError};
