//! Note selection: partition eligible notes by receiving-key equivalence.

use std::collections::{HashMap, HashSet};

use crate::address::{IncomingViewingKey, SaplingAddress, SpendingKey};
use crate::wallet::{NoteReference, SaplingOutPoint, WalletView};

/// Maximum number of notes spent by one consolidation transaction.
pub const MAX_NOTES_PER_TX: usize = 25;

/// Minimum confirmations for a note to be eligible. Leaves room for an anchor
/// ten blocks behind the tip.
pub const MIN_CONFIRMATIONS: u32 = 11;

/// An address the wallet can spend from.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub address: SaplingAddress,
    pub spending_key: SpendingKey,
    pub ivk: IncomingViewingKey,
}

/// Everything note selection needs, copied out of one wallet snapshot.
#[derive(Clone, Debug, Default)]
pub struct WalletSnapshot {
    pub notes: Vec<NoteReference>,
    pub candidates: Vec<Candidate>,
    note_ivks: HashMap<SaplingAddress, IncomingViewingKey>,
}

impl WalletSnapshot {
    /// Copy eligible notes and spendable addresses out of `view`.
    ///
    /// Addresses without a spending key or an incoming viewing key are not
    /// candidates.
    pub fn capture(view: &dyn WalletView, min_confirmations: u32) -> Self {
        let notes = view.filtered_notes(min_confirmations);

        let candidates = view
            .sapling_addresses()
            .into_iter()
            .filter_map(|address| {
                let spending_key = view.spending_key(&address)?;
                let ivk = view.incoming_viewing_key(&address)?;
                Some(Candidate {
                    address,
                    spending_key,
                    ivk,
                })
            })
            .collect();

        let mut note_ivks = HashMap::new();
        for note in &notes {
            if note_ivks.contains_key(&note.address) {
                continue;
            }
            if let Some(ivk) = view.incoming_viewing_key(&note.address) {
                note_ivks.insert(note.address, ivk);
            }
        }

        Self {
            notes,
            candidates,
            note_ivks,
        }
    }

    /// Incoming viewing key of the address a note was received on.
    pub fn note_ivk(&self, note: &NoteReference) -> Option<&IncomingViewingKey> {
        self.note_ivks.get(&note.address)
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() || self.candidates.is_empty()
    }
}

/// Notes selected for one consolidation transaction.
#[derive(Clone, Debug)]
pub struct AddressGroup {
    /// Destination of the consolidated output.
    pub address: SaplingAddress,
    pub spending_key: SpendingKey,
    /// Selected notes, in wallet enumeration order.
    pub notes: Vec<NoteReference>,
    /// Sum of the selected note values.
    pub total_value: u64,
}

/// Build one group per candidate address.
///
/// Each group takes, in enumeration order, the first `max_notes` notes whose
/// incoming viewing key equals the candidate's. A note is claimed by the first
/// group that selects it, so diversified addresses sharing a viewing key never
/// select the same note twice. Candidates with no matching notes produce no
/// group.
pub fn group_notes(snapshot: &WalletSnapshot, max_notes: usize) -> Vec<AddressGroup> {
    let mut claimed: HashSet<SaplingOutPoint> = HashSet::new();
    let mut groups = Vec::new();

    for candidate in &snapshot.candidates {
        let mut notes = Vec::new();
        let mut total_value = 0u64;

        for note in &snapshot.notes {
            if notes.len() >= max_notes {
                break;
            }
            if claimed.contains(&note.outpoint) {
                continue;
            }
            if snapshot.note_ivk(note) != Some(&candidate.ivk) {
                continue;
            }
            claimed.insert(note.outpoint);
            total_value = total_value.saturating_add(note.value);
            notes.push(note.clone());
        }

        if notes.is_empty() {
            continue;
        }

        groups.push(AddressGroup {
            address: candidate.address,
            spending_key: candidate.spending_key.clone(),
            notes,
            total_value,
        });
    }

    groups
}
