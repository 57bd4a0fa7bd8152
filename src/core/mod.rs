//! 核心编排层：步骤执行、失败恢复、目标协调与组件构建

pub mod builder;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod executor;
pub mod recovery;

pub use builder::{create_butler_builder, ButlerBuilder};
pub use coordinator::Coordinator;
pub use error::RunFailure;
pub use events::RunEvent;
pub use executor::{build_context, PlanExecutor, RunReport, RunStatus, FIRST_STEP_CONTEXT};
pub use recovery::{Recovery, RecoveryController};
