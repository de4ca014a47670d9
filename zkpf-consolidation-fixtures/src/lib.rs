//! In-memory wallet, prover and pending-transaction store for exercising
//! consolidation runs end to end.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use once_cell::sync::Lazy;
use zcash_protocol::consensus::{NetworkConstants, NetworkType};
use zkpf_sapling_consolidation::{
    derive_sapling_account, ActivationSchedule, Anchor, BuilderError, ConsensusProvider,
    ConsolidationContext, ConsolidationTransaction, ConsolidationWallet, IncomingViewingKey,
    MerkleWitness, NoteReference, PendingTxSink, SaplingAddress, SaplingOutPoint, SpendingKey,
    TransactionProver, TransactionRequest, TxId, WalletError, WalletView,
};

/// Seed every fixture wallet derives its keys from.
pub static FIXTURE_SEED: Lazy<[u8; 32]> =
    Lazy::new(|| *blake3::hash(b"zkpf-consolidation-fixtures seed").as_bytes());

/// Depth of the fixture note commitment tree.
pub const TREE_DEPTH: usize = 32;

#[derive(Clone, Debug)]
struct AddressKeys {
    ivk: IncomingViewingKey,
    spending_key: Option<SpendingKey>,
}

#[derive(Default)]
struct WalletState {
    addresses: HashMap<SaplingAddress, AddressKeys>,
    next_account: u32,
    notes: Vec<NoteReference>,
    positions: HashMap<SaplingOutPoint, u64>,
    unwitnessed: HashSet<SaplingOutPoint>,
    spent: HashSet<SaplingOutPoint>,
    tree_size: u64,
}

/// A wallet holding HD Sapling accounts and notes in memory.
pub struct MemoryWallet {
    network: NetworkType,
    seed: [u8; 32],
    state: RwLock<WalletState>,
    snapshots: AtomicUsize,
    key_generations: AtomicUsize,
}

impl MemoryWallet {
    pub fn new(network: NetworkType) -> Self {
        Self::with_seed(network, *FIXTURE_SEED)
    }

    pub fn with_seed(network: NetworkType, seed: [u8; 32]) -> Self {
        Self {
            network,
            seed,
            state: RwLock::new(WalletState::default()),
            snapshots: AtomicUsize::new(0),
            key_generations: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    /// Derive and hold the next HD account, returning its default address.
    pub fn add_account(&self) -> SaplingAddress {
        let mut state = self.state.write().expect("wallet lock poisoned");
        let account = state.next_account;
        state.next_account += 1;

        let derived = derive_sapling_account(&self.seed, self.network.coin_type(), account);
        state.addresses.insert(
            derived.address,
            AddressKeys {
                ivk: account_ivk(&self.seed, account),
                spending_key: Some(derived.spending_key),
            },
        );
        derived.address
    }

    /// Track an address the wallet can see but not spend from.
    pub fn add_watch_only(&self, address: SaplingAddress) {
        let ivk = IncomingViewingKey(*blake3::hash(address.as_bytes()).as_bytes());
        self.state
            .write()
            .expect("wallet lock poisoned")
            .addresses
            .insert(
                address,
                AddressKeys {
                    ivk,
                    spending_key: None,
                },
            );
    }

    /// Record a note received on `address`, appending it to the tree.
    pub fn receive(&self, address: SaplingAddress, value: u64, confirmations: u32) -> NoteReference {
        let mut state = self.state.write().expect("wallet lock poisoned");
        let position = state.tree_size;
        state.tree_size += 1;

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"note");
        hasher.update(&position.to_le_bytes());
        hasher.update(address.as_bytes());
        let note = NoteReference {
            outpoint: SaplingOutPoint {
                txid: TxId(*hasher.finalize().as_bytes()),
                output_index: 0,
            },
            address,
            value,
            confirmations,
        };
        state.positions.insert(note.outpoint, position);
        state.notes.push(note.clone());
        note
    }

    pub fn receive_many(
        &self,
        address: SaplingAddress,
        values: &[u64],
        confirmations: u32,
    ) -> Vec<NoteReference> {
        values
            .iter()
            .map(|value| self.receive(address, *value, confirmations))
            .collect()
    }

    /// The tree will return no witness for this note.
    pub fn drop_witness(&self, outpoint: SaplingOutPoint) {
        self.state
            .write()
            .expect("wallet lock poisoned")
            .unwitnessed
            .insert(outpoint);
    }

    pub fn mark_spent(&self, outpoint: SaplingOutPoint) {
        self.state
            .write()
            .expect("wallet lock poisoned")
            .spent
            .insert(outpoint);
    }

    /// Number of snapshot scopes entered so far.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub fn key_generations(&self) -> usize {
        self.key_generations.load(Ordering::SeqCst)
    }

    fn anchor(state: &WalletState) -> Anchor {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"anchor");
        hasher.update(&state.tree_size.to_le_bytes());
        Anchor(*hasher.finalize().as_bytes())
    }
}

fn account_ivk(seed: &[u8; 32], account: u32) -> IncomingViewingKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"ivk");
    hasher.update(seed);
    hasher.update(&account.to_le_bytes());
    IncomingViewingKey(*hasher.finalize().as_bytes())
}

fn auth_path(position: u64) -> Vec<[u8; 32]> {
    (0..TREE_DEPTH as u64)
        .map(|level| {
            let mut hasher = blake3::Hasher::new();
            hasher.update(&position.to_le_bytes());
            hasher.update(&level.to_le_bytes());
            *hasher.finalize().as_bytes()
        })
        .collect()
}

impl WalletView for WalletState {
    fn filtered_notes(&self, min_confirmations: u32) -> Vec<NoteReference> {
        self.notes
            .iter()
            .filter(|n| n.confirmations >= min_confirmations && !self.spent.contains(&n.outpoint))
            .cloned()
            .collect()
    }

    fn sapling_addresses(&self) -> BTreeSet<SaplingAddress> {
        self.addresses.keys().copied().collect()
    }

    fn incoming_viewing_key(&self, address: &SaplingAddress) -> Option<IncomingViewingKey> {
        self.addresses.get(address).map(|k| k.ivk)
    }

    fn spending_key(&self, address: &SaplingAddress) -> Option<SpendingKey> {
        self.addresses.get(address)?.spending_key.clone()
    }

    fn note_witnesses(&self, outpoints: &[SaplingOutPoint]) -> (Anchor, Vec<Option<MerkleWitness>>) {
        let witnesses = outpoints
            .iter()
            .map(|op| {
                if self.unwitnessed.contains(op) {
                    return None;
                }
                let position = *self.positions.get(op)?;
                Some(MerkleWitness {
                    position,
                    auth_path: auth_path(position),
                })
            })
            .collect();
        (MemoryWallet::anchor(self), witnesses)
    }

    fn is_unspent(&self, outpoint: &SaplingOutPoint) -> bool {
        self.positions.contains_key(outpoint) && !self.spent.contains(outpoint)
    }
}

impl ConsolidationWallet for MemoryWallet {
    fn with_snapshot(&self, f: &mut dyn FnMut(&dyn WalletView)) {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().expect("wallet lock poisoned");
        f(&*state)
    }

    fn generate_new_sapling_key(&self) -> Result<SaplingAddress, WalletError> {
        self.key_generations.fetch_add(1, Ordering::SeqCst);
        Ok(self.add_account())
    }
}

/// Prover that hashes the request into a transaction id.
#[derive(Default)]
pub struct MockProver {
    requests: Mutex<Vec<TransactionRequest>>,
    fail_on_call: Option<usize>,
}

impl MockProver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `call`-th build (zero based) with a proof error.
    pub fn failing_on(call: usize) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail_on_call: Some(call),
        }
    }

    pub fn requests(&self) -> Vec<TransactionRequest> {
        self.requests.lock().expect("prover lock poisoned").clone()
    }
}

impl TransactionProver for MockProver {
    fn build(&self, request: &TransactionRequest) -> Result<ConsolidationTransaction, BuilderError> {
        let mut requests = self.requests.lock().expect("prover lock poisoned");
        let call = requests.len();
        requests.push(request.clone());

        if self.fail_on_call == Some(call) {
            return Err(BuilderError::Proof("invalid spend proof".into()));
        }

        let mut hasher = blake3::Hasher::new();
        for spend in &request.spends {
            hasher.update(&spend.note.outpoint.txid.0);
            hasher.update(&spend.note.outpoint.output_index.to_le_bytes());
        }
        hasher.update(request.output.address.as_bytes());
        hasher.update(&request.output.value.to_le_bytes());
        let digest = hasher.finalize();

        Ok(ConsolidationTransaction {
            txid: TxId(*digest.as_bytes()),
            expiry_height: request.expiry_height,
            fee: request.fee,
            spend_count: request.spends.len(),
            output_value: request.output.value,
            raw: digest.as_bytes().to_vec(),
        })
    }
}

/// Pending-transaction store that keeps everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    submitted: Mutex<Vec<ConsolidationTransaction>>,
    rejection: Option<WalletError>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every submission as a pending-set failure.
    pub fn rejecting() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            rejection: Some(WalletError::PendingRejected("pending set closed".into())),
        }
    }

    /// Reject every submission with the wallet's own RPC error code.
    pub fn rejecting_with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            rejection: Some(WalletError::Rpc {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn submitted(&self) -> Vec<ConsolidationTransaction> {
        self.submitted.lock().expect("sink lock poisoned").clone()
    }
}

impl PendingTxSink for RecordingSink {
    fn submit(&self, tx: &ConsolidationTransaction) -> Result<(), WalletError> {
        if let Some(rejection) = &self.rejection {
            return Err(rejection.clone());
        }
        self.submitted
            .lock()
            .expect("sink lock poisoned")
            .push(tx.clone());
        Ok(())
    }
}

/// Shared handles to every fixture component of a context.
pub struct Fixture {
    pub wallet: Arc<MemoryWallet>,
    pub prover: Arc<MockProver>,
    pub sink: Arc<RecordingSink>,
    pub consensus: Arc<ActivationSchedule>,
}

impl Fixture {
    /// Mainnet activations, an empty wallet, a working prover and sink.
    pub fn mainnet() -> Self {
        Self::with_parts(
            MemoryWallet::new(NetworkType::Main),
            MockProver::new(),
            RecordingSink::new(),
            ActivationSchedule::mainnet(),
        )
    }

    pub fn with_parts(
        wallet: MemoryWallet,
        prover: MockProver,
        sink: RecordingSink,
        consensus: ActivationSchedule,
    ) -> Self {
        Self {
            wallet: Arc::new(wallet),
            prover: Arc::new(prover),
            sink: Arc::new(sink),
            consensus: Arc::new(consensus),
        }
    }

    pub fn context(&self) -> ConsolidationContext {
        ConsolidationContext {
            wallet: self.wallet.clone(),
            consensus: self.consensus.clone() as Arc<dyn ConsensusProvider>,
            prover: self.prover.clone(),
            sink: self.sink.clone(),
        }
    }
}
