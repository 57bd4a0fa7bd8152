//! 电话服务：发起外呼并等待 webhook 结果；处理 webhook 并唤醒等待者

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::calls::{
    correlation_key, CallError, CallMetrics, CallPlacer, CallRecord, CallRequest, CallResult,
    CallRunner, CallTracker, CallbackCorrelator, CallbackError, Delivery, MetricsSnapshot,
    PostCallProcessor,
};
use crate::config::CallsSection;

/// 默认的通话记录保留时间
const DEFAULT_RECORD_RETENTION: Duration = Duration::from_secs(3600);

pub struct CallService {
    placer: Arc<dyn CallPlacer>,
    correlator: Arc<CallbackCorrelator<CallResult>>,
    processor: PostCallProcessor,
    timeout: Duration,
    tracker: CallTracker,
    metrics: CallMetrics,
    record_retention: Duration,
}

impl CallService {
    pub fn new(
        placer: Arc<dyn CallPlacer>,
        correlator: Arc<CallbackCorrelator<CallResult>>,
        processor: PostCallProcessor,
        timeout: Duration,
    ) -> Self {
        Self {
            placer,
            correlator,
            processor,
            timeout,
            tracker: CallTracker::new(),
            metrics: CallMetrics::new(),
            record_retention: DEFAULT_RECORD_RETENTION,
        }
    }

    /// 按 [calls] 配置构建（默认分类器）
    pub fn from_config(cfg: &CallsSection, placer: Arc<dyn CallPlacer>) -> Self {
        let mut service = Self::new(
            placer,
            Arc::new(CallbackCorrelator::new(
                Duration::from_secs(cfg.retention_secs),
                Duration::from_secs(cfg.resolved_ttl_secs),
            )),
            PostCallProcessor::default(),
            Duration::from_secs(cfg.default_timeout_secs),
        );
        service.record_retention = Duration::from_secs(cfg.retention_secs);
        service
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn correlator(&self) -> &Arc<CallbackCorrelator<CallResult>> {
        &self.correlator
    }

    /// 校验请求并发起外呼，返回关联键
    pub async fn start_call(&self, request: CallRequest) -> Result<String, CallError> {
        let request = request.validate()?;
        match self.placer.place_call(&request).await {
            Ok(key) => {
                self.metrics.record_placed();
                self.tracker.record_started(&key, &request);
                Ok(key)
            }
            Err(e) => {
                self.metrics.record_placement_failure();
                tracing::warn!(
                    idempotency_key = %request.idempotency_key(),
                    error = %e,
                    "Call placement failed"
                );
                Err(e)
            }
        }
    }

    pub async fn wait_for_result(&self, key: &str) -> Result<CallResult, CallError> {
        let result = self.correlator.wait(key, self.timeout).await;
        if let Err(e) = &result {
            if matches!(e, CallbackError::Timeout { .. }) {
                self.metrics.record_timeout();
            }
            self.tracker.record_error(key, e.to_string());
        }
        Ok(result?)
    }

    /// 发起外呼并等待结果；webhook 先于等待到达也不会丢
    pub async fn start_and_wait(&self, request: CallRequest) -> Result<CallResult, CallError> {
        let key = self.start_call(request).await?;
        let result = self.wait_for_result(&key).await;
        if let Err(e) = &result {
            tracing::warn!(call_id = %key, error = %e, "No post-call result");
        }
        result
    }

    /// 处理 webhook：成功则投递结果；无法处理但能认出关联键时投递错误
    pub fn handle_postcall(&self, payload: &Value) -> Result<CallResult, CallError> {
        match self.processor.process(payload) {
            Ok(mut result) => {
                self.metrics.record_result(result.status);
                match result.call_id.clone() {
                    Some(key) => {
                        result.idempotency_key = self.tracker.record_outcome(&key, result.status);
                        let delivery = self.correlator.deliver(&key, result.clone());
                        tracing::info!(call_id = %key, ?delivery, "Post-call result delivered");
                    }
                    None => tracing::warn!("Post-call result has no call id, nobody to notify"),
                }
                Ok(result)
            }
            Err(e) => {
                self.metrics.record_rejected_payload();
                if let Some(key) = correlation_key(payload) {
                    self.tracker.record_error(&key, e.to_string());
                    let delivery: Delivery = self.correlator.deliver_error(&key, e.to_string());
                    tracing::warn!(call_id = %key, ?delivery, error = %e, "Post-call payload rejected");
                }
                Err(e)
            }
        }
    }

    /// 已发起通话的记录
    pub fn call(&self, call_id: &str) -> Option<CallRecord> {
        self.tracker.get(call_id)
    }

    pub fn calls_for_idempotency_key(&self, key: &str) -> Vec<CallRecord> {
        self.tracker.find_by_idempotency_key(key)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.tracker.active_count(),
            self.correlator.pending_count(),
            self.correlator.stored_count(),
        )
    }

    /// 清理过期的关联槽位与结束的通话记录
    pub fn purge_expired(&self) {
        self.correlator.purge_expired();
        self.tracker.purge_finished(self.record_retention);
    }
}

#[async_trait]
impl CallRunner for CallService {
    async fn start_and_wait(&self, request: CallRequest) -> Result<CallResult, CallError> {
        CallService::start_and_wait(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::{CallIntent, CallState, CallStatus};
    use serde_json::json;

    struct FixedPlacer(&'static str);

    #[async_trait]
    impl CallPlacer for FixedPlacer {
        async fn place_call(&self, _request: &CallRequest) -> Result<String, CallError> {
            Ok(self.0.to_string())
        }
    }

    fn service(timeout: Duration) -> Arc<CallService> {
        Arc::new(CallService::new(
            Arc::new(FixedPlacer("conv_1")),
            Arc::new(CallbackCorrelator::new(
                Duration::from_secs(60),
                Duration::from_secs(60),
            )),
            PostCallProcessor::default(),
            timeout,
        ))
    }

    fn request() -> CallRequest {
        CallRequest {
            business_name: "Bellissimo".into(),
            business_phone: "+14155550123".into(),
            user_name: "Sam".into(),
            intent: CallIntent::Reserve,
            details: "2 people at 19:00".into(),
            callback_phone: None,
        }
    }

    #[tokio::test]
    async fn test_webhook_before_wait() {
        let svc = service(Duration::from_secs(1));
        svc.handle_postcall(&json!({"call_id": "conv_1", "summary": "Booked a table for 2"}))
            .unwrap();
        let result = svc.start_and_wait(request()).await.unwrap();
        assert_eq!(result.status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn test_webhook_after_wait() {
        let svc = service(Duration::from_secs(5));
        let waiting = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.start_and_wait(request()).await })
        };
        while !svc.correlator().is_waiting("conv_1") {
            tokio::task::yield_now().await;
        }
        svc.handle_postcall(&json!({"call_id": "conv_1", "summary": "Went to voicemail"}))
            .unwrap();
        let result = waiting.await.unwrap().unwrap();
        assert_eq!(result.status, CallStatus::Voicemail);
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_error() {
        let svc = service(Duration::from_millis(20));
        let err = svc.start_and_wait(request()).await.unwrap_err();
        assert!(matches!(err, CallError::Callback(CallbackError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_placed() {
        let svc = service(Duration::from_millis(20));
        let mut req = request();
        req.business_phone = "nope".into();
        assert!(matches!(
            svc.start_call(req).await,
            Err(CallError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_payload_wakes_waiter_with_error() {
        let svc = service(Duration::from_secs(1));
        let err = svc
            .handle_postcall(&json!({
                "type": "post_call_transcription",
                "conversation_id": "conv_1",
                "data": "garbled"
            }))
            .unwrap_err();
        assert!(matches!(err, CallError::Payload(_)));

        let err = svc.wait_for_result("conv_1").await.unwrap_err();
        assert!(matches!(err, CallError::Callback(CallbackError::Failed(_))));
        assert_eq!(svc.metrics().payloads_rejected, 1);
    }

    #[tokio::test]
    async fn test_started_call_is_tracked_until_result() {
        let svc = service(Duration::from_secs(1));
        let key = svc.start_call(request()).await.unwrap();
        let record = svc.call(&key).unwrap();
        assert_eq!(record.state, CallState::Active);
        assert_eq!(record.idempotency_key, request().idempotency_key());
        assert_eq!(svc.metrics().active_calls, 1);

        let result = svc
            .handle_postcall(&json!({"call_id": "conv_1", "summary": "Booked a table for 2"}))
            .unwrap();
        assert_eq!(result.idempotency_key, Some(request().idempotency_key()));
        assert_eq!(svc.call(&key).unwrap().state, CallState::Completed);
        assert_eq!(
            svc.calls_for_idempotency_key(&request().idempotency_key()).len(),
            1
        );

        let m = svc.metrics();
        assert_eq!((m.calls_placed, m.results_received, m.results_completed), (1, 1, 1));
        assert_eq!(m.active_calls, 0);
        assert_eq!(m.stored_results, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_counted_and_recorded() {
        let svc = service(Duration::from_millis(10));
        assert!(svc.start_and_wait(request()).await.is_err());
        let record = svc.call("conv_1").unwrap();
        assert_eq!(record.state, CallState::Failed);
        assert!(record.error.unwrap_or_default().starts_with("No callback"));
        assert_eq!(svc.metrics().waits_timed_out, 1);
    }

    #[tokio::test]
    async fn test_placement_failure_is_counted() {
        struct Down;

        #[async_trait]
        impl CallPlacer for Down {
            async fn place_call(&self, _request: &CallRequest) -> Result<String, CallError> {
                Err(CallError::Placement("provider down".into()))
            }
        }

        let svc = CallService::new(
            Arc::new(Down),
            Arc::new(CallbackCorrelator::new(
                Duration::from_secs(60),
                Duration::from_secs(60),
            )),
            PostCallProcessor::default(),
            Duration::from_millis(10),
        );
        assert!(svc.start_call(request()).await.is_err());
        let m = svc.metrics();
        assert_eq!((m.calls_placed, m.placement_failures), (0, 1));
    }
}
