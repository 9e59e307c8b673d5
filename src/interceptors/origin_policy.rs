//! Origin allow-list enforcement for background requests.

use crate::config::{PolicyDefaultMode, PolicySettings};
use crate::error::ProtocolError;
use crate::interceptors::{InterceptorDecision, RequestContext, RequestInterceptor, INTERNAL_ORIGIN};
use crate::Result;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

const ANY_ORIGIN: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyMode {
    /// Wallet UI may call anything; pages only what a rule allows
    InternalOnly,
    /// Every origin, the wallet UI included, needs a rule
    DefaultDeny,
}

impl From<PolicyDefaultMode> for PolicyMode {
    fn from(mode: PolicyDefaultMode) -> Self {
        match mode {
            PolicyDefaultMode::InternalOnly => PolicyMode::InternalOnly,
            PolicyDefaultMode::DefaultDeny => PolicyMode::DefaultDeny,
        }
    }
}

#[derive(Debug, Clone)]
struct OriginRule {
    origins: Vec<String>,
    rule_id: Option<String>,
}

impl OriginRule {
    fn admits(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == ANY_ORIGIN || o == origin)
    }
}

#[derive(Debug, Clone)]
pub struct OriginPolicy {
    mode: PolicyMode,
    rules: HashMap<String, OriginRule>,
}

impl OriginPolicy {
    /// Wallet UI only; no page may call anything
    pub fn internal_only() -> Self {
        Self {
            mode: PolicyMode::InternalOnly,
            rules: HashMap::new(),
        }
    }

    /// Allow `origins` to call `operation`, on top of the current rules
    pub fn allow(mut self, operation: &str, origins: &[&str]) -> Self {
        let rule = self.rules.entry(operation.to_string()).or_insert(OriginRule {
            origins: Vec::new(),
            rule_id: None,
        });
        rule.origins.extend(origins.iter().map(|o| o.to_string()));
        self
    }

    /// Load `policy.json` from the configured directory
    pub async fn load(settings: &PolicySettings) -> crate::Result<Self> {
        let Some(dir) = settings.policy_dir.as_deref() else {
            if settings.require_file {
                return Err(crate::Error::Config(
                    "policy.require_file is set but no policy_dir is configured".to_string(),
                ));
            }
            return Ok(Self::from_mode(settings.default_mode));
        };
        Self::load_from_dir(Path::new(dir), settings).await
    }

    pub async fn load_from_dir(dir: &Path, settings: &PolicySettings) -> crate::Result<Self> {
        let policy_path = dir.join("policy.json");
        if !policy_path.exists() {
            if settings.require_file {
                return Err(crate::Error::Config(format!(
                    "Missing required {}",
                    policy_path.display()
                )));
            }
            return Ok(Self::from_mode(settings.default_mode));
        }

        let contents = tokio::fs::read_to_string(&policy_path)
            .await
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> crate::Result<Self> {
        let parsed: PolicyFile = serde_json::from_str(contents)?;

        let mode = match parsed.mode.as_str() {
            "internal-only" => PolicyMode::InternalOnly,
            "default-deny" => PolicyMode::DefaultDeny,
            other => {
                warn!(mode = other, "Unknown policy mode, defaulting to internal-only");
                PolicyMode::InternalOnly
            }
        };

        let mut rules = HashMap::new();
        for rule in parsed.rules {
            if !is_valid_operation_name(&rule.operation) {
                warn!(
                    operation = %rule.operation,
                    "Invalid operation name in policy.json; skipping rule"
                );
                continue;
            }
            let origins: Vec<String> = rule
                .origins
                .into_iter()
                .filter(|o| {
                    let ok = is_valid_origin(o);
                    if !ok {
                        warn!(origin = %o, "Invalid origin in policy.json; skipping");
                    }
                    ok
                })
                .collect();

            rules.insert(
                rule.operation,
                OriginRule {
                    origins,
                    rule_id: rule.rule_id,
                },
            );
        }

        Ok(Self { mode, rules })
    }

    fn from_mode(mode: PolicyDefaultMode) -> Self {
        Self {
            mode: mode.into(),
            rules: HashMap::new(),
        }
    }

    pub fn is_allowed(&self, operation: &str, origin: &str) -> bool {
        if let Some(rule) = self.rules.get(operation) {
            if rule.admits(origin) {
                debug!(operation, origin, rule_id = ?rule.rule_id, "Origin allowed by rule");
                return true;
            }
        }
        self.mode == PolicyMode::InternalOnly && origin == INTERNAL_ORIGIN
    }
}

/// Rejects requests whose origin may not call the requested operation
#[derive(Debug, Clone)]
pub struct OriginPolicyInterceptor {
    policy: OriginPolicy,
}

impl OriginPolicyInterceptor {
    pub fn new(policy: OriginPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl RequestInterceptor for OriginPolicyInterceptor {
    async fn intercept(&self, context: &RequestContext) -> InterceptorDecision {
        if self.policy.is_allowed(&context.operation, &context.origin) {
            return InterceptorDecision::Allow;
        }
        InterceptorDecision::Block(
            ProtocolError::OriginNotAllowed {
                origin: context.origin.clone(),
                operation: context.operation.clone(),
            }
            .into(),
        )
    }

    async fn on_complete(&self, _context: &RequestContext, _outcome: &Result<Value>, _duration_ms: u64) {}
}

#[derive(Debug, Clone, Deserialize)]
struct PolicyFile {
    mode: String,
    rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct PolicyRule {
    operation: String,
    origins: Vec<String>,
    rule_id: Option<String>,
}

fn is_valid_operation_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_uppercase() => bytes.all(|ch| ch.is_ascii_alphanumeric()),
        _ => false,
    }
}

fn is_valid_origin(origin: &str) -> bool {
    if origin == ANY_ORIGIN {
        return true;
    }
    match origin.split_once("://") {
        Some((scheme, host)) => {
            !scheme.is_empty() && !host.is_empty() && !origin.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
