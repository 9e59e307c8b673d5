//! Background runner
//!
//! Builds the background from configuration (storage, keyring, interceptor
//! pipeline, dispatcher) and serves UI surfaces and the page relay.

use crate::background::{Background, Confirmer};
use crate::config::Config;
use crate::dispatch::{ChainClient, OperationDispatcher};
use crate::gateway::{forward_notifications, Channel, Exposure, GatewayServer};
use crate::interceptors::{
    AuditLogInterceptor, InterceptorPipeline, OriginPolicy, OriginPolicyInterceptor,
    UnlockThrottleInterceptor,
};
use crate::vault::{JsonFileStorage, Keyring, MemoryStorage, SecretStorage, SecretVault};
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Wires configuration into a running background
pub struct BackgroundRunner {
    config: Config,
}

impl BackgroundRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Secret storage selected by `vault.storage_path`
    pub fn storage(&self) -> Arc<dyn SecretStorage> {
        match &self.config.vault.storage_path {
            Some(path) => {
                info!(path = %path, "Using file-backed secret storage");
                Arc::new(JsonFileStorage::new(path))
            }
            None => {
                info!("Using in-memory secret storage; secrets will not survive restart");
                Arc::new(MemoryStorage::new())
            }
        }
    }

    pub fn keyring(&self, storage: Arc<dyn SecretStorage>) -> Keyring {
        Keyring::new(SecretVault::new(storage), self.config.vault.kdf)
    }

    /// Build the request pipeline with all interceptors
    pub async fn build_pipeline(&self) -> Result<InterceptorPipeline> {
        // 1. Origin policy; runs first so nothing else sees a rejected origin
        let policy = OriginPolicy::load(&self.config.policy).await?;
        let mut pipeline =
            InterceptorPipeline::new().with(Arc::new(OriginPolicyInterceptor::new(policy)));
        info!(
            default_mode = ?self.config.policy.default_mode,
            policy_dir = ?self.config.policy.policy_dir,
            "Added origin policy interceptor"
        );

        // 2. Unlock throttle
        let unlock = &self.config.unlock;
        pipeline = pipeline.with(Arc::new(UnlockThrottleInterceptor::new(unlock)));
        info!(
            free_attempts = unlock.free_attempts,
            cooldown_seconds = unlock.cooldown_seconds,
            "Added unlock throttle interceptor"
        );

        // 3. Audit log interceptor
        if let Some(audit_path) = &self.config.audit_log_path {
            pipeline = pipeline.with(Arc::new(AuditLogInterceptor::new(audit_path)));
            info!(audit_path = audit_path, "Added audit log interceptor");
        }

        Ok(pipeline)
    }

    /// Build the background on storage chosen by the configuration
    pub async fn start<C: ChainClient + 'static>(
        &self,
        chain: Arc<C>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Result<Arc<Background<C>>> {
        self.start_with_storage(chain, confirmer, self.storage()).await
    }

    pub async fn start_with_storage<C: ChainClient + 'static>(
        &self,
        chain: Arc<C>,
        confirmer: Arc<dyn Confirmer>,
        storage: Arc<dyn SecretStorage>,
    ) -> Result<Arc<Background<C>>> {
        let keyring = Arc::new(self.keyring(storage));
        let dispatcher = Arc::new(OperationDispatcher::new(chain, &self.config.dispatch));
        let pipeline = self.build_pipeline().await?;
        info!(
            interceptors = pipeline.len(),
            initialized = keyring.is_initialized().await?,
            "Background ready"
        );
        Ok(Arc::new(Background::new(keyring, dispatcher, pipeline, confirmer)))
    }
}

/// Serve a wallet UI surface until it disconnects
pub async fn serve_ui<C: ChainClient + 'static>(background: &Arc<Background<C>>, channel: Arc<dyn Channel>) {
    let forwarder = forward_notifications(channel.clone(), background.subscribe());
    GatewayServer::new(background.ui_handler(), Exposure::Trusted)
        .serve(channel)
        .await;
    forwarder.abort();
}

/// Serve the relay's upstream connection until it disconnects
pub async fn serve_relay<C: ChainClient + 'static>(background: &Arc<Background<C>>, channel: Arc<dyn Channel>) {
    GatewayServer::new(background.page_handler(), Exposure::Untrusted)
        .serve(channel)
        .await;
}
