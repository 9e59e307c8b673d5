//! Unlock throttle interceptor
//!
//! After too many wrong passwords in a row, password-checked requests are
//! refused until a cooldown passes.

use crate::config::UnlockSettings;
use crate::error::VaultError;
use crate::interceptors::{InterceptorDecision, RequestContext, RequestInterceptor};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Requests that check the wallet password
const PASSWORD_OPERATIONS: &[&str] = &["Unlock", "RevealMnemonic", "RemoveAccount"];

#[derive(Debug, Default)]
struct Failures {
    count: u32,
    last: Option<Instant>,
    /// Requests admitted whose password check has not finished yet
    pending: HashSet<u64>,
}

impl Failures {
    /// Attempts that may be in flight at once right now
    fn allowance(&self, free_attempts: u32, cooldown: Duration) -> usize {
        if self.count < free_attempts {
            return (free_attempts - self.count) as usize;
        }
        match self.last {
            Some(last) if last.elapsed() < cooldown => 0,
            _ => 1,
        }
    }
}

pub struct UnlockThrottleInterceptor {
    free_attempts: u32,
    cooldown: Duration,
    failures: RwLock<Failures>,
}

impl UnlockThrottleInterceptor {
    pub fn new(settings: &UnlockSettings) -> Self {
        Self::with_cooldown(settings.free_attempts, Duration::from_secs(settings.cooldown_seconds))
    }

    pub fn with_cooldown(free_attempts: u32, cooldown: Duration) -> Self {
        Self {
            free_attempts,
            cooldown,
            failures: RwLock::new(Failures::default()),
        }
    }

    fn applies_to(context: &RequestContext) -> bool {
        PASSWORD_OPERATIONS.contains(&context.operation.as_str())
    }
}

#[async_trait]
impl RequestInterceptor for UnlockThrottleInterceptor {
    /// Admits a password attempt only while one is still available,
    /// counting attempts already in flight against it
    async fn intercept(&self, context: &RequestContext) -> InterceptorDecision {
        if !Self::applies_to(context) {
            return InterceptorDecision::Allow;
        }

        let mut failures = self.failures.write().await;
        let allowance = failures.allowance(self.free_attempts, self.cooldown);
        if allowance == 0 {
            let remaining = failures
                .last
                .map(|last| self.cooldown.saturating_sub(last.elapsed()))
                .unwrap_or_default();
            return InterceptorDecision::Block(Error::Blocked(format!(
                "Too many failed attempts. Please wait {} more seconds.",
                remaining.as_secs().max(1)
            )));
        }
        if failures.pending.len() >= allowance {
            return InterceptorDecision::Block(Error::Blocked(
                "Another password check is in progress.".to_string(),
            ));
        }

        failures.pending.insert(context.id);
        InterceptorDecision::Allow
    }

    async fn on_complete(&self, context: &RequestContext, outcome: &Result<Value>, _duration_ms: u64) {
        if !Self::applies_to(context) {
            return;
        }

        let mut failures = self.failures.write().await;
        failures.pending.remove(&context.id);
        match outcome {
            Ok(_) => {
                if failures.count > 0 {
                    tracing::debug!(previous = failures.count, "Password accepted; failure count reset");
                }
                failures.count = 0;
                failures.last = None;
            }
            Err(Error::Vault(VaultError::InvalidPassword)) => {
                failures.count += 1;
                failures.last = Some(Instant::now());
                tracing::warn!(
                    failures = failures.count,
                    free_attempts = self.free_attempts,
                    "Wrong password"
                );
            }
            Err(_) => {}
        }
    }
}
