//! Observability middleware for dispatch.
//!
//! Times every dispatch, records the outcome on a `tracing` span and through
//! the `metrics` facade, and hands an [`AuditRecord`] to the configured sink
//! on a spawned task. Sink failures are logged and never reach the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tower::{Layer, Service};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::{AuditOutcome, AuditRecord};
use crate::service::dispatch::DispatchRequest;
use crate::service::operation::DispatchError;
use crate::traits::AuditSink;

// ---------------------------------------------------------------------------
// AuditLayer
// ---------------------------------------------------------------------------

/// Tower layer that times, counts, and audits dispatches.
#[derive(Clone, Default)]
pub struct AuditLayer {
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditLayer {
    /// `None` keeps spans and metrics but writes no audit records.
    #[must_use]
    pub fn new(sink: Option<Arc<dyn AuditSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditService {
            inner,
            sink: self.sink.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuditService<S> {
    inner: S,
    sink: Option<Arc<dyn AuditSink>>,
}

impl<S> Service<DispatchRequest> for AuditService<S>
where
    S: Service<DispatchRequest, Response = Value, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: DispatchRequest) -> Self::Future {
        let action = request.action.clone();
        let caller = request.caller.clone();
        let sink = self.sink.clone();

        let span = info_span!(
            "dispatch",
            action = %action,
            tenant = %caller.tenant_id,
            caller_kind = caller.kind.as_str(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;

                let outcome = match &result {
                    Ok(_) => AuditOutcome::Success,
                    Err(err) => AuditOutcome::Failure { kind: err.kind() },
                };

                let current = tracing::Span::current();
                current.record("duration_ms", duration_ms);
                current.record("outcome", outcome.as_str());

                metrics::counter!(
                    "stencil_dispatch_total",
                    "action" => action.clone(),
                    "outcome" => outcome.as_str(),
                )
                .increment(1);
                #[allow(clippy::cast_precision_loss)]
                metrics::histogram!("stencil_dispatch_duration_ms", "action" => action.clone())
                    .record(duration_ms as f64);

                tracing::info!(
                    action = %action,
                    duration_ms,
                    outcome = outcome.as_str(),
                    "dispatch complete"
                );

                if let Some(sink) = sink {
                    let entry = AuditRecord {
                        id: Uuid::new_v4(),
                        action,
                        tenant_id: caller.tenant_id,
                        user_id: caller.user_id,
                        caller_kind: caller.kind,
                        outcome,
                        error: result.as_ref().err().map(DispatchError::public_message),
                        duration_ms,
                        at: Utc::now(),
                    };
                    tokio::spawn(async move {
                        if let Err(err) = sink.record(&entry).await {
                            warn!(action = %entry.action, error = %err, "audit write failed");
                        }
                    });
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use stencil_core::Caller;
    use tower::ServiceExt;

    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::service::operation::ErrorKind;

    /// Echoes the input back, or fails when the action is `"fail"`.
    #[derive(Clone)]
    struct EchoService;

    impl Service<DispatchRequest> for EchoService {
        type Response = Value;
        type Error = DispatchError;
        type Future = Pin<Box<dyn Future<Output = Result<Value, DispatchError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: DispatchRequest) -> Self::Future {
            Box::pin(async move {
                if request.action == "fail" {
                    Err(DispatchError::Permission {
                        action: request.action,
                    })
                } else {
                    Ok(request.input)
                }
            })
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn record(&self, _entry: &AuditRecord) -> anyhow::Result<()> {
            anyhow::bail!("audit store unavailable")
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn passes_through_and_audits_success_and_failure() {
        let sink = Arc::new(MemoryAuditSink::new());
        let svc = AuditLayer::new(Some(sink.clone())).layer(EchoService);

        let out = svc
            .clone()
            .oneshot(DispatchRequest::new("echo", json!({"a": 1}), Caller::human("u1", "t1")))
            .await
            .unwrap();
        assert_eq!(out, json!({"a": 1}));

        let err = svc
            .oneshot(DispatchRequest::new("fail", json!({}), Caller::human("u1", "t1")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        settle().await;
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.action == "echo" && r.outcome.is_success()));
        assert!(records.iter().any(|r| r.action == "fail"
            && r.outcome
                == AuditOutcome::Failure {
                    kind: ErrorKind::Permission
                }
            && r.error.is_some()));
    }

    #[tokio::test]
    async fn failing_sink_does_not_affect_result() {
        let svc = AuditLayer::new(Some(Arc::new(BrokenSink))).layer(EchoService);
        let out = svc
            .oneshot(DispatchRequest::new("echo", json!(1), Caller::system("t1")))
            .await
            .unwrap();
        assert_eq!(out, json!(1));
        settle().await;
    }

    #[tokio::test]
    async fn no_sink_still_passes_through() {
        let svc = AuditLayer::new(None).layer(EchoService);
        assert!(svc
            .oneshot(DispatchRequest::new("echo", json!(null), Caller::system("t1")))
            .await
            .is_ok());
    }
}
