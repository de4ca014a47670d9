//! Contracts the consolidation core consumes from the host wallet.
//!
//! The wallet is passed in explicitly as a [`ConsolidationWallet`] handle;
//! all note, address and witness queries go through a [`WalletView`] that is
//! only reachable inside [`ConsolidationWallet::with_snapshot`]. The wallet
//! decides how that scope is made consistent (a lock pair, a database read
//! transaction, ...). Implementations must not hold that scope across calls
//! back into the transaction builder.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{IncomingViewingKey, SaplingAddress, SpendingKey};
use crate::builder::ConsolidationTransaction;
use crate::error::WalletError;
use crate::{ConsolidationError, Result};

/// Transaction identifier.
///
/// Displayed byte-reversed, matching how node RPCs render transaction hashes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({self})")
    }
}

/// Locator of a Sapling output within the wallet's note index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SaplingOutPoint {
    pub txid: TxId,
    pub output_index: u32,
}

/// A wallet-owned Sapling note, as read from the note index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteReference {
    pub outpoint: SaplingOutPoint,
    /// Address the note was received on.
    pub address: SaplingAddress,
    /// Plaintext note value in zatoshis.
    pub value: u64,
    pub confirmations: u32,
}

/// Sapling note commitment tree root shared by every spend in a transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Anchor(pub [u8; 32]);

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anchor({})", hex::encode(self.0))
    }
}

/// Authentication path of one note commitment relative to an [`Anchor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleWitness {
    pub position: u64,
    /// Sibling hashes from leaf to root.
    pub auth_path: Vec<[u8; 32]>,
}

/// Read access to one coherent wallet/chain state.
pub trait WalletView {
    /// Unspent notes with at least `min_confirmations` confirmations, in the
    /// wallet's enumeration order.
    fn filtered_notes(&self, min_confirmations: u32) -> Vec<NoteReference>;

    /// Every Sapling address the wallet knows about.
    fn sapling_addresses(&self) -> BTreeSet<SaplingAddress>;

    fn incoming_viewing_key(&self, address: &SaplingAddress) -> Option<IncomingViewingKey>;

    /// Spending key for `address`, if the wallet holds one.
    fn spending_key(&self, address: &SaplingAddress) -> Option<SpendingKey>;

    /// Anchor plus one optional witness per outpoint, positionally aligned.
    fn note_witnesses(&self, outpoints: &[SaplingOutPoint]) -> (Anchor, Vec<Option<MerkleWitness>>);

    /// Whether the note is still present and unspent.
    fn is_unspent(&self, outpoint: &SaplingOutPoint) -> bool;
}

/// Handle to the host wallet.
pub trait ConsolidationWallet: Send + Sync {
    /// Run `f` against a consistent view of wallet and chain state.
    fn with_snapshot(&self, f: &mut dyn FnMut(&dyn WalletView));

    /// Generate the wallet's next HD Sapling key and return its default address.
    fn generate_new_sapling_key(&self) -> std::result::Result<SaplingAddress, WalletError>;
}

/// Append-only destination for built consolidation transactions.
pub trait PendingTxSink: Send + Sync {
    fn submit(&self, tx: &ConsolidationTransaction) -> std::result::Result<(), WalletError>;
}

/// Run `f` inside the wallet's snapshot scope and return its value.
pub fn read_snapshot<R>(
    wallet: &dyn ConsolidationWallet,
    f: impl FnOnce(&dyn WalletView) -> R,
) -> Result<R> {
    let mut f = Some(f);
    let mut out = None;
    wallet.with_snapshot(&mut |view| {
        if let Some(f) = f.take() {
            out = Some(f(view));
        }
    });
    out.ok_or_else(|| ConsolidationError::Runtime("wallet snapshot scope was not entered".into()))
}
