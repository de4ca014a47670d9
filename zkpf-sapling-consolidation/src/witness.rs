//! Anchor and witness acquisition for a selected note list.

use tracing::debug;

use crate::wallet::{read_snapshot, Anchor, ConsolidationWallet, MerkleWitness, NoteReference};
use crate::{ConsolidationError, Result};

/// One anchor and a positionally aligned witness per requested note.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessSet {
    pub anchor: Anchor,
    /// `None` at position `i` means note `i` cannot be spent this round.
    pub witnesses: Vec<Option<MerkleWitness>>,
}

impl WitnessSet {
    /// Number of leading notes that have a witness.
    ///
    /// Spends are added up to the first gap and no further.
    pub fn spendable_prefix(&self) -> usize {
        self.witnesses
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.witnesses.len())
    }

    pub fn is_complete(&self) -> bool {
        self.spendable_prefix() == self.witnesses.len()
    }
}

/// Fetch the anchor and witnesses for `notes` under one wallet snapshot.
///
/// Notes are re-validated in the same snapshot: a note that was spent or
/// dropped since selection gets no witness, whatever the tree returned for it.
pub fn fetch_witnesses(
    wallet: &dyn ConsolidationWallet,
    notes: &[NoteReference],
) -> Result<WitnessSet> {
    let outpoints: Vec<_> = notes.iter().map(|n| n.outpoint).collect();

    let (anchor, witnesses, unspent) = read_snapshot(wallet, |view| {
        let (anchor, witnesses) = view.note_witnesses(&outpoints);
        let unspent: Vec<bool> = outpoints.iter().map(|op| view.is_unspent(op)).collect();
        (anchor, witnesses, unspent)
    })?;

    if witnesses.len() != notes.len() {
        return Err(ConsolidationError::WitnessMisaligned {
            expected: notes.len(),
            actual: witnesses.len(),
        });
    }

    let witnesses = witnesses
        .into_iter()
        .zip(unspent)
        .map(|(witness, unspent)| witness.filter(|_| unspent))
        .collect();

    let set = WitnessSet { anchor, witnesses };
    debug!(
        notes = notes.len(),
        witnessed = set.spendable_prefix(),
        anchor = ?set.anchor,
        "fetched Sapling anchor and witnesses"
    );
    Ok(set)
}
