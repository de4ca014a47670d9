//! Consolidation destination resolution.
//!
//! Unless an override is configured, consolidated funds go to the default
//! address of Sapling account 0, derived with the fixed ZIP 32 keypath
//! `m / 32' / coin_type' / 0'`.

use sapling::zip32::ExtendedSpendingKey;
use tracing::{error, info};
use zcash_protocol::consensus::{NetworkConstants, NetworkType};
use zip32::ChildIndex;

use crate::address::{SaplingAddress, SpendingKey};
use crate::wallet::{read_snapshot, ConsolidationWallet};
use crate::{ConsolidationError, Result};

/// ZIP 32 purpose constant for Sapling keys.
pub const ZIP32_PURPOSE: u32 = 32;

/// Account whose default address receives consolidated funds.
pub const CONSOLIDATION_ACCOUNT: u32 = 0;

/// Keys derived for one Sapling account.
#[derive(Clone, Debug)]
pub struct DerivedAccount {
    pub account: u32,
    pub address: SaplingAddress,
    pub spending_key: SpendingKey,
}

/// Derive `m / 32' / coin_type' / account'` from `seed` and return the
/// account's default address and encoded extended spending key.
pub fn derive_sapling_account(seed: &[u8], coin_type: u32, account: u32) -> DerivedAccount {
    let xsk = ExtendedSpendingKey::master(seed)
        .derive_child(ChildIndex::hardened(ZIP32_PURPOSE))
        .derive_child(ChildIndex::hardened(coin_type))
        .derive_child(ChildIndex::hardened(account));

    let (_, address) = xsk.default_address();

    DerivedAccount {
        account,
        address: SaplingAddress::from_payment_address(&address),
        spending_key: SpendingKey::from_bytes(xsk.to_bytes().to_vec()),
    }
}

/// Resolve the address consolidated notes are sent to.
///
/// A configured override wins; it is expected to have been validated when the
/// configuration was loaded, so a decode failure here is a logic error.
/// Otherwise the account 0 default address is derived from `seed`. If the
/// wallet does not yet hold the spending key for it, exactly one new wallet key
/// is generated and it must be that address: anything else means the wallet's
/// HD key index has drifted and resolution fails hard.
pub fn resolve_consolidation_destination(
    wallet: &dyn ConsolidationWallet,
    network: NetworkType,
    seed: &[u8],
    dest_override: Option<&str>,
) -> Result<SaplingAddress> {
    if let Some(encoded) = dest_override {
        return SaplingAddress::decode(network, encoded);
    }

    let account = derive_sapling_account(seed, network.coin_type(), CONSOLIDATION_ACCOUNT);

    // Held means the address resolves to an IVK and that IVK to a spending key.
    let held = read_snapshot(wallet, |view| {
        view.incoming_viewing_key(&account.address).is_some()
            && view.spending_key(&account.address).is_some()
    })?;
    if !held {
        let generated = wallet.generate_new_sapling_key()?;
        if generated != account.address {
            error!(
                expected = %account.address.encode(network),
                generated = %generated.encode(network),
                "wallet generated a key other than Sapling account 0"
            );
            return Err(ConsolidationError::KeyIndexDrift {
                expected: account.address.encode(network),
                generated: generated.encode(network),
            });
        }
        info!(
            address = %account.address.encode(network),
            "generated Sapling account 0 key for consolidation"
        );
    }

    Ok(account.address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::IncomingViewingKey;
    use crate::error::WalletError;
    use crate::wallet::{Anchor, MerkleWitness, NoteReference, SaplingOutPoint, WalletView};
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    const SEED: [u8; 32] = [3u8; 32];

    /// HD wallet that only knows the keys it generated itself.
    struct HdWallet {
        seed: Vec<u8>,
        coin_type: u32,
        keys: Mutex<BTreeMap<SaplingAddress, SpendingKey>>,
        viewing_only: Mutex<BTreeSet<SaplingAddress>>,
        next_account: Mutex<u32>,
        generated: Mutex<u32>,
    }

    impl HdWallet {
        fn new(seed: &[u8], first_account: u32) -> Self {
            Self {
                seed: seed.to_vec(),
                coin_type: NetworkType::Test.coin_type(),
                keys: Mutex::new(BTreeMap::new()),
                viewing_only: Mutex::new(BTreeSet::new()),
                next_account: Mutex::new(first_account),
                generated: Mutex::new(0),
            }
        }

        fn watch(&self, address: SaplingAddress) {
            self.viewing_only.lock().unwrap().insert(address);
        }

        fn generated(&self) -> u32 {
            *self.generated.lock().unwrap()
        }
    }

    impl WalletView for HdWallet {
        fn filtered_notes(&self, _min_confirmations: u32) -> Vec<NoteReference> {
            Vec::new()
        }

        fn sapling_addresses(&self) -> BTreeSet<SaplingAddress> {
            let mut addresses: BTreeSet<_> = self.keys.lock().unwrap().keys().copied().collect();
            addresses.extend(self.viewing_only.lock().unwrap().iter().copied());
            addresses
        }

        fn incoming_viewing_key(&self, address: &SaplingAddress) -> Option<IncomingViewingKey> {
            let known = self.keys.lock().unwrap().contains_key(address)
                || self.viewing_only.lock().unwrap().contains(address);
            known.then_some(IncomingViewingKey([7u8; 32]))
        }

        fn spending_key(&self, address: &SaplingAddress) -> Option<SpendingKey> {
            self.keys.lock().unwrap().get(address).cloned()
        }

        fn note_witnesses(
            &self,
            outpoints: &[SaplingOutPoint],
        ) -> (Anchor, Vec<Option<MerkleWitness>>) {
            (Anchor([0u8; 32]), vec![None; outpoints.len()])
        }

        fn is_unspent(&self, _outpoint: &SaplingOutPoint) -> bool {
            false
        }
    }

    impl ConsolidationWallet for HdWallet {
        fn with_snapshot(&self, f: &mut dyn FnMut(&dyn WalletView)) {
            f(self)
        }

        fn generate_new_sapling_key(&self) -> std::result::Result<SaplingAddress, WalletError> {
            let mut next = self.next_account.lock().unwrap();
            let account = derive_sapling_account(&self.seed, self.coin_type, *next);
            *next += 1;
            *self.generated.lock().unwrap() += 1;
            self.keys
                .lock()
                .unwrap()
                .insert(account.address, account.spending_key.clone());
            Ok(account.address)
        }
    }

    #[test]
    fn derivation_is_deterministic_per_account() {
        let coin_type = NetworkType::Main.coin_type();
        let a = derive_sapling_account(&SEED, coin_type, 0);
        let b = derive_sapling_account(&SEED, coin_type, 0);
        let c = derive_sapling_account(&SEED, coin_type, 1);
        assert_eq!(a.address, b.address);
        assert_eq!(a.spending_key, b.spending_key);
        assert_ne!(a.address, c.address);
    }

    #[test]
    fn derivation_depends_on_coin_type() {
        let main = derive_sapling_account(&SEED, NetworkType::Main.coin_type(), 0);
        let test = derive_sapling_account(&SEED, NetworkType::Test.coin_type(), 0);
        assert_ne!(main.address, test.address);
    }

    #[test]
    fn first_resolution_generates_account_zero_once() {
        let wallet = HdWallet::new(&SEED, 0);

        let first = resolve_consolidation_destination(&wallet, NetworkType::Test, &SEED, None)
            .unwrap();
        let second = resolve_consolidation_destination(&wallet, NetworkType::Test, &SEED, None)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(wallet.generated(), 1);
        assert_eq!(
            first,
            derive_sapling_account(&SEED, NetworkType::Test.coin_type(), 0).address
        );
    }

    #[test]
    fn viewing_only_account_zero_still_generates_its_key() {
        let wallet = HdWallet::new(&SEED, 0);
        let expected = derive_sapling_account(&SEED, NetworkType::Test.coin_type(), 0).address;
        wallet.watch(expected);

        let resolved = resolve_consolidation_destination(&wallet, NetworkType::Test, &SEED, None)
            .unwrap();

        assert_eq!(resolved, expected);
        assert_eq!(wallet.generated(), 1);
    }

    #[test]
    fn drifted_key_index_is_a_hard_error() {
        // Account 0 was never generated by this wallet; its next key is account 1.
        let wallet = HdWallet::new(&SEED, 1);
        let err = resolve_consolidation_destination(&wallet, NetworkType::Test, &SEED, None)
            .unwrap_err();
        assert!(matches!(err, ConsolidationError::KeyIndexDrift { .. }));
    }

    #[test]
    fn override_skips_derivation_and_key_generation() {
        let wallet = HdWallet::new(&SEED, 0);
        let other = derive_sapling_account(&[9u8; 32], NetworkType::Test.coin_type(), 4).address;
        let encoded = other.encode(NetworkType::Test);

        let resolved =
            resolve_consolidation_destination(&wallet, NetworkType::Test, &SEED, Some(&encoded))
                .unwrap();

        assert_eq!(resolved, other);
        assert_eq!(wallet.generated(), 0);
    }

    #[test]
    fn undecodable_override_is_rejected() {
        let wallet = HdWallet::new(&SEED, 0);
        let err = resolve_consolidation_destination(
            &wallet,
            NetworkType::Test,
            &SEED,
            Some("t1NotASaplingAddress"),
        )
        .unwrap_err();
        assert!(matches!(err, ConsolidationError::InvalidDestination(_)));
        assert_eq!(wallet.generated(), 0);
    }
}
