//! Request interceptors
//!
//! Every background request passes through an interceptor pipeline before
//! it reaches the keyring or the dispatcher. Interceptors can block a
//! request up front and observe its outcome afterwards.

mod audit_log;
mod origin_policy;
mod unlock_throttle;

pub use audit_log::AuditLogInterceptor;
pub use origin_policy::{OriginPolicy, OriginPolicyInterceptor};
pub use unlock_throttle::UnlockThrottleInterceptor;

use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Origin attributed to the wallet's own UI surfaces
pub const INTERNAL_ORIGIN: &str = "wallet://internal";

/// What an interceptor gets to see about a request; never the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Operation name, e.g. `Unlock` or `RequestOperations`
    pub operation: String,
    pub origin: String,
    /// Process-unique; pairs an `intercept` with its `on_complete`
    pub id: u64,
}

impl RequestContext {
    pub fn new(operation: impl Into<String>, origin: impl Into<String>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            operation: operation.into(),
            origin: origin.into(),
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.origin == INTERNAL_ORIGIN
    }
}

#[derive(Debug)]
pub enum InterceptorDecision {
    Allow,
    Block(Error),
}

#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn intercept(&self, context: &RequestContext) -> InterceptorDecision;

    async fn on_complete(&self, context: &RequestContext, outcome: &Result<Value>, duration_ms: u64);
}

/// Ordered interceptor chain
#[derive(Clone, Default)]
pub struct InterceptorPipeline {
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run `request` unless an interceptor blocks it
    ///
    /// Every interceptor observes the outcome, blocked requests included.
    pub async fn run<F, Fut>(&self, context: &RequestContext, request: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let started = Instant::now();
        let mut blocked = None;
        for interceptor in &self.interceptors {
            if let InterceptorDecision::Block(e) = interceptor.intercept(context).await {
                tracing::warn!(
                    operation = %context.operation,
                    origin = %context.origin,
                    code = e.code(),
                    "Request blocked"
                );
                blocked = Some(e);
                break;
            }
        }

        let outcome = match blocked {
            Some(e) => Err(e),
            None => request().await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        join_all(
            self.interceptors
                .iter()
                .map(|interceptor| interceptor.on_complete(context, &outcome, duration_ms)),
        )
        .await;
        outcome
    }
}

impl std::fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorPipeline")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        block: bool,
        seen: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl RequestInterceptor for Recorder {
        async fn intercept(&self, _context: &RequestContext) -> InterceptorDecision {
            if self.block {
                InterceptorDecision::Block(Error::Blocked("no".into()))
            } else {
                InterceptorDecision::Allow
            }
        }

        async fn on_complete(&self, context: &RequestContext, outcome: &Result<Value>, _duration_ms: u64) {
            self.seen.lock().push((context.operation.clone(), outcome.is_ok()));
        }
    }

    #[tokio::test]
    async fn allowed_request_runs_and_is_observed() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = InterceptorPipeline::new().with(recorder.clone());
        let ctx = RequestContext::new("GetAccounts", INTERNAL_ORIGIN);

        let value = pipeline.run(&ctx, || async { Ok(json!(1)) }).await.unwrap();
        assert_eq!(value, json!(1));
        assert_eq!(*recorder.seen.lock(), vec![("GetAccounts".to_string(), true)]);
    }

    #[tokio::test]
    async fn blocked_request_never_runs() {
        let blocker = Arc::new(Recorder {
            block: true,
            ..Default::default()
        });
        let observer = Arc::new(Recorder::default());
        let pipeline = InterceptorPipeline::new().with(blocker).with(observer.clone());
        let ctx = RequestContext::new("Unlock", INTERNAL_ORIGIN);

        let err = pipeline
            .run(&ctx, || async { Err(Error::Declined) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Blocked(_)));
        assert_eq!(*observer.seen.lock(), vec![("Unlock".to_string(), false)]);
    }
}
