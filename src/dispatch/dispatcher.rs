//! Operation dispatcher
//!
//! Estimate with a dry-run signer, apply the user's overrides, then forge,
//! sign and inject through the global counter queue.

use crate::config::DispatchSettings;
use crate::dispatch::{
    apply_overrides, map_estimates, ChainClient, Estimate, FeeOverrides, OperationBatch,
    OperationParams, SigningCounterQueue,
};
use crate::error::DispatchError;
use crate::wallet::{DryRunSigner, OperationSigner};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Output of a dry run: the bytes that would be signed and their estimates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunOutcome {
    #[serde(serialize_with = "crate::dispatch::serialize_hex")]
    pub bytes: Vec<u8>,
    pub estimates: Vec<Estimate>,
}

/// A batch that reached the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub op_hash: String,
    pub counters: Vec<u64>,
    pub operations: Vec<OperationParams>,
}

pub struct OperationDispatcher<C: ChainClient + 'static> {
    client: Arc<C>,
    queue: Arc<SigningCounterQueue>,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl<C: ChainClient + 'static> OperationDispatcher<C> {
    pub fn new(client: Arc<C>, settings: &DispatchSettings) -> Self {
        let queue = Arc::new(SigningCounterQueue::new(client.clone()));
        Self::with_queue(client, queue, settings)
    }

    /// Share an existing queue, keeping one submission pipeline per process
    pub fn with_queue(client: Arc<C>, queue: Arc<SigningCounterQueue>, settings: &DispatchSettings) -> Self {
        Self {
            client,
            queue,
            confirmation_timeout: settings.confirmation_timeout(),
            poll_interval: settings.poll_interval(),
        }
    }

    pub fn queue(&self) -> &Arc<SigningCounterQueue> {
        &self.queue
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Forge and estimate without a real signature
    ///
    /// Returns `None` when any step fails; estimation is best effort.
    pub async fn dry_run(&self, signer: &dyn OperationSigner, operations: &[OperationParams]) -> Option<DryRunOutcome> {
        match self.try_dry_run(signer, operations).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(source = signer.address(), error = %e, "Estimation failed; continuing without estimates");
                None
            }
        }
    }

    async fn try_dry_run(&self, signer: &dyn OperationSigner, operations: &[OperationParams]) -> Result<DryRunOutcome> {
        let estimation_failed = |e: crate::dispatch::ChainError| DispatchError::EstimationFailed(e.0);

        let mut batch = OperationBatch::new(signer.address(), operations.to_vec());
        let onchain = self
            .client
            .onchain_counter(signer.address())
            .await
            .map_err(estimation_failed)?;
        let predicted: Vec<u64> = (1..=operations.len() as u64).map(|i| onchain + i).collect();
        batch.assign_counters(&predicted);

        let dry = DryRunSigner::for_signer(signer);
        let forged = self.client.forge(&batch).await.map_err(estimation_failed)?;
        let signed = dry.sign(&forged).await?;
        let estimates = self
            .client
            .estimate(&batch, &signed)
            .await
            .map_err(estimation_failed)?;

        debug!(source = signer.address(), estimates = estimates.len(), "Dry run complete");
        Ok(DryRunOutcome {
            bytes: dry.captured().unwrap_or_default(),
            estimates,
        })
    }

    /// Estimate, apply overrides and submit one batch
    pub async fn send(
        &self,
        signer: &dyn OperationSigner,
        operations: Vec<OperationParams>,
        overrides: &FeeOverrides,
    ) -> Result<SendOutcome> {
        if operations.is_empty() {
            return Err(DispatchError::EmptyBatch.into());
        }

        let mut operations = operations;
        if let Some(dry) = self.dry_run(signer, &operations).await {
            map_estimates(&mut operations, &dry.estimates);
        }
        apply_overrides(&mut operations, overrides);

        let source = signer.address().to_string();
        let client = &self.client;
        let count = operations.len();
        let outcome = self
            .queue
            .submit(&source, count, |counters| async move {
                let mut batch = OperationBatch::new(signer.address(), operations);
                batch.assign_counters(&counters);

                let forged = client
                    .forge(&batch)
                    .await
                    .map_err(|e| DispatchError::SubmissionFailed(e.0))?;
                let signed = signer.sign(&forged).await?;
                let op_hash = client
                    .inject(&signed)
                    .await
                    .map_err(|e| DispatchError::SubmissionFailed(e.0))?;

                Ok::<_, crate::Error>(SendOutcome {
                    op_hash,
                    counters,
                    operations: batch.operations,
                })
            })
            .await?;

        info!(
            source = signer.address(),
            op_hash = %outcome.op_hash,
            operations = count,
            "Batch injected"
        );
        Ok(outcome)
    }

    /// Poll until `op_hash` is included or the confirmation timeout passes
    ///
    /// A timeout is reported as `ConfirmationTimedOut`; counters are left
    /// as they are.
    pub async fn wait_for_confirmation(&self, op_hash: &str) -> Result<()> {
        let poll = async {
            loop {
                match self.client.is_included(op_hash).await {
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(e) => debug!(op_hash, error = %e, "Inclusion check failed"),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.confirmation_timeout, poll).await {
            Ok(()) => {
                info!(op_hash, "Operation included");
                Ok(())
            }
            Err(_) => {
                warn!(op_hash, timeout_ms = self.confirmation_timeout.as_millis() as u64, "Confirmation timed out");
                Err(DispatchError::ConfirmationTimedOut {
                    op_hash: op_hash.to_string(),
                }
                .into())
            }
        }
    }
}

impl<C: ChainClient + 'static> std::fmt::Debug for OperationDispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDispatcher")
            .field("confirmation_timeout", &self.confirmation_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
