//! Error types for the Sapling consolidation operation.
//!
//! Every component returns [`ConsolidationError`]. The orchestrator converts
//! whatever reaches its top-level boundary into an [`OperationError`], which is
//! the `(code, message)` pair surfaced through the operation status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for consolidation operations.
pub type Result<T> = std::result::Result<T, ConsolidationError>;

/// Generic wallet failure code (`RPC_WALLET_ERROR`).
pub const RPC_WALLET_ERROR: i32 = -4;

/// Code recorded for runtime, logic and general failures.
pub const GENERIC_ERROR_CODE: i32 = -1;

/// Code recorded for failures that match no known shape.
pub const UNKNOWN_ERROR_CODE: i32 = -2;

/// Failure reported by the external transaction builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    /// Spent value does not cover the fee.
    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    /// The request has no spends to authorize.
    #[error("no spends added to transaction")]
    NoSpends,

    /// Spend or output proof construction failed.
    #[error("proof construction failed: {0}")]
    Proof(String),

    /// Anything else the builder rejects.
    #[error("{0}")]
    Other(String),
}

/// Failure reported by the external wallet store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("wallet is locked")]
    Locked,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("pending transaction rejected: {0}")]
    PendingRejected(String),

    #[error("wallet backend error: {0}")]
    Backend(String),

    /// Rejection carrying the wallet's own RPC error code.
    #[error("{message}")]
    Rpc { code: i32, message: String },
}

/// Errors raised while running a consolidation.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    /// A collaborator raised a known error object carrying its own code.
    #[error("{message}")]
    Rpc { code: i32, message: String },

    /// The transaction builder could not produce a valid transaction.
    #[error("Failed to build transaction: {0}")]
    Builder(#[from] BuilderError),

    #[error("wallet error: {0}")]
    Wallet(WalletError),

    /// Available funds are below the smallest selectable chunk.
    #[error("insufficient funds for amount selection: {available} < {minimum}")]
    InsufficientFunds { available: u64, minimum: u64 },

    /// The configured destination does not decode to a Sapling address.
    #[error("invalid consolidation destination address: {0}")]
    InvalidDestination(String),

    /// The wallet generated a key other than the derived account-0 key.
    #[error("generated Sapling key {generated} does not match derived account 0 address {expected}")]
    KeyIndexDrift { expected: String, generated: String },

    /// Witness list length does not match the requested note list.
    #[error("witness count {actual} does not match note count {expected}")]
    WitnessMisaligned { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unclassified runtime failure.
    #[error("{0}")]
    Runtime(String),

    #[error("unknown error")]
    Unknown,
}

impl From<WalletError> for ConsolidationError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Rpc { code, message } => Self::Rpc { code, message },
            other => Self::Wallet(other),
        }
    }
}

/// Classification of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Known error object with its own code, recorded verbatim.
    Structured,
    Runtime,
    Logic,
    General,
    Unknown,
}

impl ConsolidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rpc { .. } | Self::Builder(_) => ErrorKind::Structured,
            Self::Wallet(_) | Self::Runtime(_) => ErrorKind::Runtime,
            Self::InvalidDestination(_)
            | Self::KeyIndexDrift { .. }
            | Self::WitnessMisaligned { .. }
            | Self::Config(_) => ErrorKind::Logic,
            Self::InsufficientFunds { .. } => ErrorKind::General,
            Self::Unknown => ErrorKind::Unknown,
        }
    }

    /// Numeric code recorded in the operation status.
    pub fn code(&self) -> i32 {
        match self {
            Self::Rpc { code, .. } => *code,
            Self::Builder(_) => RPC_WALLET_ERROR,
            Self::Unknown => UNKNOWN_ERROR_CODE,
            _ => GENERIC_ERROR_CODE,
        }
    }
}

/// Terminal `(code, message)` pair recorded for a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(skip)]
    pub kind: Option<ErrorKind>,
    pub code: i32,
    pub message: String,
}

impl OperationError {
    pub fn unknown() -> Self {
        Self {
            kind: Some(ErrorKind::Unknown),
            code: UNKNOWN_ERROR_CODE,
            message: "unknown error".to_string(),
        }
    }
}

impl From<&ConsolidationError> for OperationError {
    fn from(err: &ConsolidationError) -> Self {
        let kind = err.kind();
        let message = match kind {
            ErrorKind::Structured => err.to_string(),
            ErrorKind::Runtime => format!("runtime error: {err}"),
            ErrorKind::Logic => format!("logic error: {err}"),
            ErrorKind::General => format!("general exception: {err}"),
            ErrorKind::Unknown => return Self::unknown(),
        };
        Self {
            kind: Some(kind),
            code: err.code(),
            message,
        }
    }
}
