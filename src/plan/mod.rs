//! 计划层：步骤、计划、运行历史与依赖图

pub mod builder;
pub mod graph;
pub mod types;

pub use builder::PlanBuilder;
pub use graph::DependencyGraph;
pub use types::*;
