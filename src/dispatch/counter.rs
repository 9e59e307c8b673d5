//! Per-signer counter bookkeeping behind one global submission queue
//!
//! Every batch submission in the process goes through a single FIFO lock.
//! While holding it, the queue assigns the signer's next counters, runs the
//! caller's submission, then either releases the counters (success) or
//! rolls the signer back to its last released counter (failure).

use crate::dispatch::CounterSource;
use crate::error::DispatchError;
use crate::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counter bookkeeping for one signer; `pending >= released` always holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterState {
    /// Highest counter handed out
    pub pending: u64,
    /// Highest counter known to be consumed by a successful submission
    pub released: u64,
}

impl CounterState {
    fn settled_at(counter: u64) -> Self {
        Self {
            pending: counter,
            released: counter,
        }
    }
}

/// Where a signer currently is in the submission pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignerPhase {
    Idle,
    /// At least one submission is waiting for the pipeline
    Queued,
    Submitting,
}

/// How the signer's most recent submission ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Settlement {
    Released,
    RolledBack,
}

#[derive(Debug, Default)]
struct Activity {
    waiting: usize,
    submitting: bool,
    last: Option<Settlement>,
}

type ActivityTable = Mutex<HashMap<String, Activity>>;

pub struct SigningCounterQueue {
    source: Arc<dyn CounterSource>,
    pipeline: tokio::sync::Mutex<HashMap<String, CounterState>>,
    activity: ActivityTable,
}

impl SigningCounterQueue {
    pub fn new(source: Arc<dyn CounterSource>) -> Self {
        Self {
            source,
            pipeline: tokio::sync::Mutex::new(HashMap::new()),
            activity: Mutex::new(HashMap::new()),
        }
    }

    /// Run `submit` with `count` fresh contiguous counters for `signer`
    ///
    /// `submit` receives the counters in order. If it fails, the counters
    /// are returned to the pool and the next submission reuses them. If the
    /// returned future is dropped mid-submission, the signer's entry is
    /// forgotten and re-read from chain on next use.
    pub async fn submit<F, Fut, T>(&self, signer: &str, count: usize, submit: F) -> Result<T>
    where
        F: FnOnce(Vec<u64>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if count == 0 {
            return Err(DispatchError::EmptyBatch.into());
        }

        let ticket = WaitTicket::new(&self.activity, signer);
        let table = self.pipeline.lock().await;
        drop(ticket);
        let mut in_flight = InFlight::begin(table, &self.activity, signer);

        let state = match in_flight.table.get(signer).copied() {
            Some(state) => state,
            None => {
                let onchain = self
                    .source
                    .onchain_counter(signer)
                    .await
                    .map_err(DispatchError::from)?;
                debug!(signer, counter = onchain, "Bootstrapped counter from chain");
                CounterState::settled_at(onchain)
            }
        };

        let first = state.pending + 1;
        let counters: Vec<u64> = (first..first + count as u64).collect();
        let advanced = CounterState {
            pending: state.pending + count as u64,
            released: state.released,
        };
        in_flight.table.insert(signer.to_string(), advanced);
        debug!(signer, first, last = advanced.pending, "Assigned counters");

        match submit(counters).await {
            Ok(value) => {
                in_flight.settle(CounterState::settled_at(advanced.pending), Settlement::Released);
                info!(signer, counter = advanced.pending, "Counters released");
                Ok(value)
            }
            Err(e) => {
                in_flight.settle(CounterState::settled_at(state.released), Settlement::RolledBack);
                warn!(signer, counter = state.released, error = %e, "Counters rolled back");
                Err(e)
            }
        }
    }

    /// Current bookkeeping for `signer`; waits for an in-flight submission
    pub async fn counter_state(&self, signer: &str) -> Option<CounterState> {
        self.pipeline.lock().await.get(signer).copied()
    }

    pub fn phase(&self, signer: &str) -> SignerPhase {
        match self.activity.lock().get(signer) {
            Some(a) if a.submitting => SignerPhase::Submitting,
            Some(a) if a.waiting > 0 => SignerPhase::Queued,
            _ => SignerPhase::Idle,
        }
    }

    /// Submissions for `signer` waiting behind the pipeline
    pub fn waiting(&self, signer: &str) -> usize {
        self.activity.lock().get(signer).map_or(0, |a| a.waiting)
    }

    pub fn last_settlement(&self, signer: &str) -> Option<Settlement> {
        self.activity.lock().get(signer).and_then(|a| a.last)
    }
}

impl std::fmt::Debug for SigningCounterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCounterQueue").finish_non_exhaustive()
    }
}

struct WaitTicket<'a> {
    activity: &'a ActivityTable,
    signer: &'a str,
}

impl<'a> WaitTicket<'a> {
    fn new(activity: &'a ActivityTable, signer: &'a str) -> Self {
        activity.lock().entry(signer.to_string()).or_default().waiting += 1;
        Self { activity, signer }
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        if let Some(a) = self.activity.lock().get_mut(self.signer) {
            a.waiting = a.waiting.saturating_sub(1);
        }
    }
}

struct InFlight<'a> {
    table: tokio::sync::MutexGuard<'a, HashMap<String, CounterState>>,
    activity: &'a ActivityTable,
    signer: &'a str,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn begin(
        table: tokio::sync::MutexGuard<'a, HashMap<String, CounterState>>,
        activity: &'a ActivityTable,
        signer: &'a str,
    ) -> Self {
        activity.lock().entry(signer.to_string()).or_default().submitting = true;
        Self {
            table,
            activity,
            signer,
            settled: false,
        }
    }

    fn settle(&mut self, state: CounterState, settlement: Settlement) {
        self.table.insert(self.signer.to_string(), state);
        if let Some(a) = self.activity.lock().get_mut(self.signer) {
            a.last = Some(settlement);
        }
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            // Unknown whether the batch reached the chain
            if self.table.remove(self.signer).is_some() {
                warn!(signer = self.signer, "Submission abandoned; counter will be re-read");
            }
        }
        if let Some(a) = self.activity.lock().get_mut(self.signer) {
            a.submitting = false;
        }
    }
}
