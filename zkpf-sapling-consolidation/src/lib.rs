//! # Sapling Note Consolidation
//!
//! A background wallet operation that merges many small Sapling notes into
//! fewer, larger ones. Each run groups confirmed notes by the address that
//! can spend them, and for every group builds one transaction spending up to
//! 25 notes into a single output back to the same address, less the fee.
//!
//! ## Components
//!
//! - [`amount`]: randomized chunk amounts for migration-style transfers
//! - [`destination`]: ZIP 32 account-0 destination address resolution
//! - [`grouping`]: note selection per receiving key
//! - [`witness`]: anchor and Merkle witness acquisition
//! - [`builder`]: balanced transaction requests for the external prover
//! - [`consolidation`]: the cancellable operation state machine
//! - [`scheduler`]: runs consolidation every N blocks
//!
//! The host wallet, consensus parameters, prover and pending-transaction store
//! are supplied through the traits in [`wallet`], [`consensus`] and
//! [`builder`].

pub mod address;
pub mod amount;
pub mod builder;
pub mod config;
pub mod consensus;
pub mod consolidation;
pub mod destination;
pub mod error;
pub mod grouping;
pub mod operation;
pub mod scheduler;
pub mod wallet;
pub mod witness;

pub use address::{IncomingViewingKey, SaplingAddress, SpendingKey};
pub use amount::{choose_amount, choose_amount_os, format_money, COIN};
pub use builder::{
    assemble_group, AssemblyParams, ConsolidationTransaction, TransactionProver,
    TransactionRequest, TransactionRequestBuilder, CONSOLIDATION_EXPIRY_DELTA, DEFAULT_FEE,
};
pub use config::{ConsolidationConfig, NetworkKind};
pub use consensus::{ActivationSchedule, ConsensusProvider};
pub use consolidation::{ConsolidationContext, SaplingConsolidation, OPERATION_METHOD};
pub use destination::{derive_sapling_account, resolve_consolidation_destination, DerivedAccount};
pub use error::{BuilderError, ConsolidationError, OperationError, Result, WalletError};
pub use grouping::{group_notes, AddressGroup, WalletSnapshot, MAX_NOTES_PER_TX, MIN_CONFIRMATIONS};
pub use operation::{ConsolidationResult, OperationId, OperationState, OperationStatus};
pub use scheduler::{ConsolidationScheduler, ScheduledRun};
pub use wallet::{
    Anchor, ConsolidationWallet, MerkleWitness, NoteReference, PendingTxSink, SaplingOutPoint,
    TxId, WalletView,
};
pub use witness::{fetch_witnesses, WitnessSet};
