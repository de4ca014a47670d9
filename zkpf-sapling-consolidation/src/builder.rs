//! Transaction assembly for one address group.
//!
//! The core only composes a [`TransactionRequest`]; proof construction and
//! binding signatures belong to an external [`TransactionProver`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{SaplingAddress, SpendingKey};
use crate::amount::format_money;
use crate::error::BuilderError;
use crate::grouping::AddressGroup;
use crate::wallet::{Anchor, MerkleWitness, NoteReference, TxId};
use crate::witness::WitnessSet;
use crate::Result;

/// Fixed fee paid by every consolidation transaction, in zatoshis.
pub const DEFAULT_FEE: u64 = 10_000;

/// Blocks after the target height at which consolidation transactions expire.
pub const CONSOLIDATION_EXPIRY_DELTA: u32 = 450;

/// One note to spend, with the anchor and witness proving its inclusion.
#[derive(Clone, Debug)]
pub struct SpendRequest {
    pub note: NoteReference,
    pub anchor: Anchor,
    pub witness: MerkleWitness,
}

/// The single shielded output of a consolidation transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputRequest {
    pub address: SaplingAddress,
    pub value: u64,
}

/// A fully specified, balanced request for the external prover.
#[derive(Clone, Debug)]
pub struct TransactionRequest {
    pub target_height: u32,
    pub expiry_height: u32,
    pub fee: u64,
    /// Authorizes every spend; the output's outgoing viewing key comes from it too.
    pub spending_key: SpendingKey,
    pub spends: Vec<SpendRequest>,
    pub output: OutputRequest,
}

impl TransactionRequest {
    pub fn anchor(&self) -> Option<Anchor> {
        self.spends.first().map(|s| s.anchor)
    }

    pub fn spent_value(&self) -> u64 {
        self.spends.iter().map(|s| s.note.value).sum()
    }
}

/// Incrementally composes a [`TransactionRequest`].
#[derive(Debug)]
pub struct TransactionRequestBuilder {
    target_height: u32,
    expiry_height: u32,
    fee: u64,
    spending_key: SpendingKey,
    spends: Vec<SpendRequest>,
    output: Option<OutputRequest>,
}

impl TransactionRequestBuilder {
    pub fn new(target_height: u32, spending_key: SpendingKey) -> Self {
        Self {
            target_height,
            expiry_height: target_height.saturating_add(CONSOLIDATION_EXPIRY_DELTA),
            fee: DEFAULT_FEE,
            spending_key,
            spends: Vec::new(),
            output: None,
        }
    }

    pub fn set_expiry_height(&mut self, expiry_height: u32) -> &mut Self {
        self.expiry_height = expiry_height;
        self
    }

    pub fn set_fee(&mut self, fee: u64) -> &mut Self {
        self.fee = fee;
        self
    }

    /// Add a spend. Every spend must reference the same anchor.
    pub fn add_sapling_spend(
        &mut self,
        note: NoteReference,
        anchor: Anchor,
        witness: MerkleWitness,
    ) -> std::result::Result<&mut Self, BuilderError> {
        if let Some(first) = self.spends.first() {
            if first.anchor != anchor {
                return Err(BuilderError::Other(
                    "anchor does not match previous spends".into(),
                ));
            }
        }
        self.spends.push(SpendRequest {
            note,
            anchor,
            witness,
        });
        Ok(self)
    }

    /// Set the single shielded output.
    pub fn add_sapling_output(
        &mut self,
        address: SaplingAddress,
        value: u64,
    ) -> std::result::Result<&mut Self, BuilderError> {
        if self.output.is_some() {
            return Err(BuilderError::Other(
                "consolidation transactions carry exactly one output".into(),
            ));
        }
        self.output = Some(OutputRequest { address, value });
        Ok(self)
    }

    pub fn spent_value(&self) -> u64 {
        self.spends.iter().map(|s| s.note.value).sum()
    }

    pub fn spend_count(&self) -> usize {
        self.spends.len()
    }

    /// Finish the request, checking that spends balance the output plus fee.
    pub fn build(self) -> std::result::Result<TransactionRequest, BuilderError> {
        if self.spends.is_empty() {
            return Err(BuilderError::NoSpends);
        }
        let output = self
            .output
            .ok_or_else(|| BuilderError::Other("missing shielded output".into()))?;

        let spent: u64 = self.spends.iter().map(|s| s.note.value).sum();
        let required = output.value.saturating_add(self.fee);
        if spent != required {
            return Err(BuilderError::InsufficientFunds {
                available: spent,
                required,
            });
        }

        Ok(TransactionRequest {
            target_height: self.target_height,
            expiry_height: self.expiry_height,
            fee: self.fee,
            spending_key: self.spending_key,
            spends: self.spends,
            output,
        })
    }
}

/// A built, signed consolidation transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationTransaction {
    pub txid: TxId,
    pub expiry_height: u32,
    pub fee: u64,
    pub spend_count: usize,
    /// Value of the consolidated output.
    pub output_value: u64,
    /// Serialized transaction bytes.
    #[serde(with = "hex::serde")]
    pub raw: Vec<u8>,
}

/// External transaction builder: proofs, signatures, serialization.
pub trait TransactionProver: Send + Sync {
    fn build(
        &self,
        request: &TransactionRequest,
    ) -> std::result::Result<ConsolidationTransaction, BuilderError>;
}

/// Per-run assembly parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssemblyParams {
    pub target_height: u32,
    pub expiry_height: u32,
    pub fee: u64,
}

/// Build the consolidation transaction for one group.
///
/// Spends are added in group order up to the first note without a witness;
/// later notes are left for a future round even if they are witnessed. The
/// output pays the spent value minus the fee back to the group's address.
/// Returns `Ok(None)` when the very first note has no witness, since there is
/// nothing to spend. Builder failures are returned, never retried.
pub fn assemble_group(
    prover: &dyn TransactionProver,
    group: &AddressGroup,
    witnesses: &WitnessSet,
    params: &AssemblyParams,
) -> Result<Option<ConsolidationTransaction>> {
    let mut builder = TransactionRequestBuilder::new(params.target_height, group.spending_key.clone());
    builder.set_expiry_height(params.expiry_height);

    for (note, witness) in group.notes.iter().zip(&witnesses.witnesses) {
        let Some(witness) = witness else {
            debug!(outpoint = ?note.outpoint, "missing witness, stopping spend list");
            break;
        };
        builder.add_sapling_spend(note.clone(), witnesses.anchor, witness.clone())?;
    }

    if builder.spend_count() == 0 {
        debug!(address = %group.address, "no witnessed notes in group, skipping");
        return Ok(None);
    }

    let spent = builder.spent_value();
    let output_value = spent
        .checked_sub(params.fee)
        .ok_or(BuilderError::InsufficientFunds {
            available: spent,
            required: params.fee,
        })?;

    builder.set_fee(params.fee);
    builder.add_sapling_output(group.address, output_value)?;

    debug!(
        amount = %format_money(output_value as i64),
        spends = builder.spend_count(),
        "building consolidation transaction"
    );

    let request = builder.build()?;
    let tx = prover.build(&request)?;
    Ok(Some(tx))
}
