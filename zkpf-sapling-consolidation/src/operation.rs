//! Async wallet operation bookkeeping: identity, state, timing and status.

use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::amount::format_money;
use crate::builder::ConsolidationTransaction;
use crate::error::OperationError;

/// Operation identifier, rendered as `opid-<uuid>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OperationId(String);

impl OperationId {
    pub fn new() -> Self {
        Self(format!("opid-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for OperationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Lifecycle state of an operation.
///
/// `Ready -> Executing -> {Success, Failed}`, with `Cancelled` reachable from
/// either non-terminal state. Terminal states are never left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum OperationState {
    #[serde(rename = "queued")]
    Ready,
    #[serde(rename = "executing")]
    Executing,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl OperationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "queued",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Ready, Executing)
                | (Ready, Cancelled)
                | (Executing, Success)
                | (Executing, Failed)
                | (Executing, Cancelled)
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn serialize_money<S: Serializer>(zats: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_money(*zats as i64))
}

/// What a consolidation run produced.
///
/// `num_tx_created` always equals the number of transaction ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationResult {
    pub num_tx_created: usize,
    /// Sum of consolidated output values, in zatoshis; rendered in coin units.
    #[serde(serialize_with = "serialize_money")]
    pub amount_consolidated: u64,
    pub consolidation_txids: Vec<String>,
}

impl ConsolidationResult {
    pub fn record(&mut self, tx: &ConsolidationTransaction) {
        self.consolidation_txids.push(tx.txid.to_string());
        self.num_tx_created = self.consolidation_txids.len();
        self.amount_consolidated = self.amount_consolidated.saturating_add(tx.output_value);
    }

    pub fn is_empty(&self) -> bool {
        self.consolidation_txids.is_empty()
    }
}

/// Point-in-time status of an operation, as reported to RPC clients.
#[derive(Clone, Debug, Serialize)]
pub struct OperationStatus {
    pub id: OperationId,
    pub status: OperationState,
    pub creation_time: u64,
    pub method: &'static str,
    pub target_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ConsolidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_secs: Option<f64>,
}

impl OperationStatus {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Mutable state shared between the worker running an operation and the
/// threads querying or cancelling it.
#[derive(Debug)]
pub(crate) struct OperationRecord {
    pub state: OperationState,
    pub creation_time: u64,
    started: Option<Instant>,
    elapsed: Option<Duration>,
    pub result: Option<ConsolidationResult>,
    pub error: Option<OperationError>,
}

impl OperationRecord {
    pub fn new() -> Self {
        Self {
            state: OperationState::Ready,
            creation_time: unix_now(),
            started: None,
            elapsed: None,
            result: None,
            error: None,
        }
    }

    /// Apply `next` if allowed; returns whether the state changed.
    pub fn transition(&mut self, next: OperationState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn start_clock(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop_clock(&mut self) {
        if let Some(started) = self.started {
            self.elapsed = Some(started.elapsed());
        }
    }

    pub fn execution_secs(&self) -> Option<f64> {
        self.elapsed.map(|d| d.as_secs_f64())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::TxId;

    #[test]
    fn transitions_are_monotonic() {
        let mut record = OperationRecord::new();
        assert!(!record.transition(OperationState::Success));
        assert!(record.transition(OperationState::Executing));
        assert!(!record.transition(OperationState::Ready));
        assert!(record.transition(OperationState::Cancelled));
        assert!(!record.transition(OperationState::Success));
        assert!(!record.transition(OperationState::Executing));
        assert_eq!(record.state, OperationState::Cancelled);
    }

    #[test]
    fn ready_can_be_cancelled_directly() {
        let mut record = OperationRecord::new();
        assert!(record.transition(OperationState::Cancelled));
        assert!(record.state.is_terminal());
    }

    #[test]
    fn result_counts_match_recorded_transactions() {
        let mut result = ConsolidationResult::default();
        for (i, value) in [4_990_000u64, 290_000].into_iter().enumerate() {
            result.record(&ConsolidationTransaction {
                txid: TxId([i as u8 + 1; 32]),
                expiry_height: 450,
                fee: 10_000,
                spend_count: 1,
                output_value: value,
                raw: Vec::new(),
            });
        }
        assert_eq!(result.num_tx_created, 2);
        assert_eq!(result.consolidation_txids.len(), 2);
        assert_eq!(result.amount_consolidated, 5_280_000);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["amount_consolidated"], "0.0528");
        assert_eq!(json["num_tx_created"], 2);
    }

    #[test]
    fn operation_ids_are_unique_and_prefixed() {
        let a = OperationId::new();
        let b = OperationId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("opid-"));
    }

    #[test]
    fn state_serializes_as_rpc_strings() {
        assert_eq!(serde_json::to_value(OperationState::Ready).unwrap(), "queued");
        assert_eq!(
            serde_json::to_value(OperationState::Cancelled).unwrap(),
            "cancelled"
        );
    }
}
