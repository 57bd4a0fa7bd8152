pub mod executor;
pub mod mock;
pub mod output;
pub mod registry;

pub use executor::ToolExecutor;
pub use mock::{MockBrowserTool, MockCalendarTool, MockCallingTool, MockLatency, MockSearchTool};
pub use output::{AgentOutput, OutputStatus};
pub use registry::{Tool, ToolRegistry};
