//! The Sapling consolidation operation.
//!
//! One run walks the wallet's spendable addresses and, for each, spends up to
//! [`MAX_NOTES_PER_TX`](crate::grouping::MAX_NOTES_PER_TX) confirmed notes into
//! a single output back to that address. Transactions are handed to the
//! pending-transaction sink as they are built; nothing is broadcast here.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::amount::format_money;
use crate::builder::{assemble_group, AssemblyParams, TransactionProver};
use crate::config::ConsolidationConfig;
use crate::consensus::ConsensusProvider;
use crate::error::OperationError;
use crate::grouping::{group_notes, WalletSnapshot};
use crate::operation::{
    ConsolidationResult, OperationId, OperationRecord, OperationState, OperationStatus,
};
use crate::wallet::{read_snapshot, ConsolidationWallet, PendingTxSink};
use crate::witness::fetch_witnesses;
use crate::{ConsolidationError, Result};

/// RPC method name reported in operation status.
pub const OPERATION_METHOD: &str = "saplingconsolidation";

/// Host services a consolidation run needs.
#[derive(Clone)]
pub struct ConsolidationContext {
    pub wallet: Arc<dyn ConsolidationWallet>,
    pub consensus: Arc<dyn ConsensusProvider>,
    pub prover: Arc<dyn TransactionProver>,
    pub sink: Arc<dyn PendingTxSink>,
}

#[derive(Clone, Copy, Debug)]
struct RunSettings {
    fee: u64,
    expiry_delta: u32,
    max_notes_per_tx: usize,
    min_confirmations: u32,
}

impl From<&ConsolidationConfig> for RunSettings {
    fn from(config: &ConsolidationConfig) -> Self {
        Self {
            fee: config.fee,
            expiry_delta: config.expiry_delta,
            max_notes_per_tx: config.max_notes_per_tx,
            min_confirmations: config.min_confirmations,
        }
    }
}

/// A single cancellable consolidation run targeting one block height.
pub struct SaplingConsolidation {
    id: OperationId,
    target_height: u32,
    ctx: ConsolidationContext,
    settings: RunSettings,
    cancel: CancellationToken,
    record: RwLock<OperationRecord>,
}

impl SaplingConsolidation {
    pub fn new(target_height: u32, ctx: ConsolidationContext, config: &ConsolidationConfig) -> Self {
        Self {
            id: OperationId::new(),
            target_height,
            ctx,
            settings: RunSettings::from(config),
            cancel: CancellationToken::new(),
            record: RwLock::new(OperationRecord::new()),
        }
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn target_height(&self) -> u32 {
        self.target_height
    }

    /// Request cancellation.
    ///
    /// A queued operation becomes CANCELLED immediately and will not run. A
    /// running one becomes CANCELLED now and stops before its next submission.
    /// Terminal operations are unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let mut record = self.record.write().expect("operation record lock poisoned");
        if record.transition(OperationState::Cancelled) {
            debug!(op_id = %self.id, "consolidation cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> OperationState {
        self.record.read().expect("operation record lock poisoned").state
    }

    pub fn result(&self) -> Option<ConsolidationResult> {
        self.record
            .read()
            .expect("operation record lock poisoned")
            .result
            .clone()
    }

    pub fn error(&self) -> Option<OperationError> {
        self.record
            .read()
            .expect("operation record lock poisoned")
            .error
            .clone()
    }

    pub fn status(&self) -> OperationStatus {
        let record = self.record.read().expect("operation record lock poisoned");
        OperationStatus {
            id: self.id.clone(),
            status: record.state,
            creation_time: record.creation_time,
            method: OPERATION_METHOD,
            target_height: self.target_height,
            result: record.result.clone(),
            error: record.error.clone(),
            execution_secs: record.execution_secs(),
        }
    }

    /// Run the operation on the current thread.
    ///
    /// Does nothing unless the operation is still queued and not cancelled.
    pub fn start(&self) {
        if self.is_cancelled() {
            self.cancel();
            return;
        }
        {
            let mut record = self.record.write().expect("operation record lock poisoned");
            if !record.transition(OperationState::Executing) {
                return;
            }
            record.start_clock();
        }

        let mut partial = ConsolidationResult::default();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(&mut partial)));

        let (state, error) = {
            let mut record = self.record.write().expect("operation record lock poisoned");
            record.stop_clock();

            match outcome {
                Ok(Ok(())) => {
                    record.result = Some(partial);
                    if !self.is_cancelled() {
                        record.transition(OperationState::Success);
                    }
                }
                Ok(Err(err)) => {
                    if !partial.is_empty() {
                        record.result = Some(partial);
                    }
                    record.error = Some(OperationError::from(&err));
                    record.transition(OperationState::Failed);
                }
                Err(_) => {
                    if !partial.is_empty() {
                        record.result = Some(partial);
                    }
                    record.error = Some(OperationError::from(&ConsolidationError::Unknown));
                    record.transition(OperationState::Failed);
                }
            }
            if self.is_cancelled() {
                record.transition(OperationState::Cancelled);
            }
            (record.state, record.error.clone())
        };

        match error {
            None => info!(
                "{}: Sapling consolidation transactions created. (status={}, success)",
                self.id, state
            ),
            Some(error) => warn!(
                "{}: Sapling consolidation transactions created. (status={}, error={})",
                self.id, state, error.message
            ),
        }
    }

    /// Run the operation on Tokio's blocking pool.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.start())
    }

    fn run(&self, result: &mut ConsolidationResult) -> Result<()> {
        let target = self.target_height;
        let expiry_height = target.saturating_add(self.settings.expiry_delta);

        debug!(op_id = %self.id, target_height = target, "beginning Sapling consolidation");

        if let Some(next_activation) = self.ctx.consensus.next_activation_height(target) {
            if expiry_height >= next_activation {
                debug!(
                    op_id = %self.id,
                    next_activation,
                    "consolidation transactions would expire across a network upgrade, skipping this round"
                );
                return Ok(());
            }
        }

        let wallet = self.ctx.wallet.as_ref();
        let snapshot = read_snapshot(wallet, |view| {
            WalletSnapshot::capture(view, self.settings.min_confirmations)
        })?;
        let groups = group_notes(&snapshot, self.settings.max_notes_per_tx);
        drop(snapshot);

        debug!(op_id = %self.id, groups = groups.len(), "selected notes for consolidation");

        let params = AssemblyParams {
            target_height: target,
            expiry_height,
            fee: self.settings.fee,
        };

        for group in &groups {
            let witnesses = fetch_witnesses(wallet, &group.notes)?;
            let Some(tx) = assemble_group(self.ctx.prover.as_ref(), group, &witnesses, &params)?
            else {
                continue;
            };

            if self.is_cancelled() {
                debug!(op_id = %self.id, txid = %tx.txid, "cancelled, discarding built transaction");
                break;
            }

            self.ctx.sink.submit(&tx)?;
            debug!(
                op_id = %self.id,
                txid = %tx.txid,
                spends = tx.spend_count,
                "added pending Sapling consolidation transaction"
            );
            result.record(&tx);
        }

        debug!(
            op_id = %self.id,
            "created {} transactions with total Sapling output amount={}",
            result.num_tx_created,
            format_money(result.amount_consolidated as i64)
        );
        Ok(())
    }
}
