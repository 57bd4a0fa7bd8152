//! 电话模块：外呼、通话结果分类，以及 webhook 与等待任务之间的回调关联

pub mod classifier;
pub mod contracts;
pub mod correlator;
pub mod metrics;
pub mod placer;
pub mod postcall;
pub mod remote;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod tool;
pub mod tracker;

pub use classifier::{OutcomeClassifier, PatternClassifier};
pub use contracts::{
    CallArtifact, CallError, CallIntent, CallRequest, CallResult, CallStatus, NextAction,
};
pub use correlator::{CallbackCorrelator, CallbackError, Delivery, Outcome};
pub use metrics::{CallMetrics, MetricsSnapshot};
pub use placer::{CallPlacer, HttpCallPlacer};
pub use postcall::{correlation_key, parse_payload, PostCallPayload, PostCallProcessor};
pub use remote::RemoteCallService;
pub use service::CallService;
pub use tool::{CallRunner, CallingTool, CALLING_TOOL_ID};
pub use tracker::{CallRecord, CallState, CallTracker};
