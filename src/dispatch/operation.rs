//! Operation parameters, estimates and the fee/limit rules applied to them

use serde::{Deserialize, Serialize};

/// One operation of a batch
///
/// Chain-specific encoding is the chain client's business; the dispatcher
/// only touches the counter and the fee/limit fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationParams {
    /// Operation kind, e.g. `transaction` or `delegation`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Amount in the chain's smallest unit, as a decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Assigned by the counter queue; callers leave it empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<u64>,
}

impl OperationParams {
    pub fn transfer(destination: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            kind: "transaction".to_string(),
            destination: Some(destination.into()),
            amount: Some(amount.into()),
            ..Default::default()
        }
    }
}

/// Node-reported cost of one operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub gas_limit: u64,
    pub storage_limit: u64,
    pub suggested_fee: u64,
}

/// User-supplied overrides for a whole batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeOverrides {
    /// Total fee for the batch
    #[serde(default)]
    pub fee: Option<u64>,
    /// Storage limit; honoured for single-operation batches only
    #[serde(default)]
    pub storage_limit: Option<u64>,
}

/// Operations from one source, counter-assigned and submitted together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationBatch {
    pub source: String,
    pub operations: Vec<OperationParams>,
}

impl OperationBatch {
    pub fn new(source: impl Into<String>, operations: Vec<OperationParams>) -> Self {
        Self {
            source: source.into(),
            operations,
        }
    }

    /// Stamp `counters` onto the operations in order
    pub fn assign_counters(&mut self, counters: &[u64]) {
        for (op, counter) in self.operations.iter_mut().zip(counters) {
            op.counter = Some(*counter);
        }
    }

    pub fn counters(&self) -> Vec<u64> {
        self.operations.iter().filter_map(|op| op.counter).collect()
    }
}

/// Estimate belonging to operation `index`
///
/// A batch that needs a reveal gets one extra leading estimate for it, so
/// when there is exactly one more estimate than operations the list is
/// read shifted by one.
pub fn estimate_for(estimates: &[Estimate], operation_count: usize, index: usize) -> Option<&Estimate> {
    if estimates.len() == operation_count + 1 {
        estimates.get(index + 1)
    } else {
        estimates.get(index)
    }
}

/// Fill fee and limits from `estimates` where the caller left them empty
pub fn map_estimates(operations: &mut [OperationParams], estimates: &[Estimate]) {
    let count = operations.len();
    for (index, op) in operations.iter_mut().enumerate() {
        if let Some(estimate) = estimate_for(estimates, count, index) {
            op.fee.get_or_insert(estimate.suggested_fee);
            op.gas_limit.get_or_insert(estimate.gas_limit);
            op.storage_limit.get_or_insert(estimate.storage_limit);
        }
    }
}

pub fn apply_overrides(operations: &mut [OperationParams], overrides: &FeeOverrides) {
    if let Some(total) = overrides.fee {
        let last = operations.len().saturating_sub(1);
        for (index, op) in operations.iter_mut().enumerate() {
            op.fee = Some(if index == last { total } else { 0 });
        }
    }
    if let Some(storage_limit) = overrides.storage_limit {
        if let [only] = operations {
            only.storage_limit = Some(storage_limit);
        }
    }
}
