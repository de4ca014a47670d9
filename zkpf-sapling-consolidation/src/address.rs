//! Sapling address and key handles.
//!
//! The consolidation core never performs key arithmetic itself. Addresses are
//! carried as their canonical 43-byte encoding, viewing keys as opaque 32-byte
//! values compared for equality, and spending keys as opaque byte strings that
//! are only ever handed on to the transaction builder.

use std::fmt;

use bech32::{Bech32, Hrp};
use zcash_protocol::consensus::{NetworkConstants, NetworkType};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{ConsolidationError, Result};

/// Length of a raw Sapling payment address (`d || pk_d`).
pub const SAPLING_ADDRESS_LEN: usize = 43;

/// A Sapling payment address in its raw encoding.
///
/// Ordering follows the byte encoding so that address sets iterate
/// deterministically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SaplingAddress([u8; SAPLING_ADDRESS_LEN]);

impl SaplingAddress {
    pub const fn from_bytes(bytes: [u8; SAPLING_ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SAPLING_ADDRESS_LEN] {
        &self.0
    }

    pub fn from_payment_address(address: &sapling::PaymentAddress) -> Self {
        Self(address.to_bytes())
    }

    /// Parse the raw bytes as a Sapling payment address, validating the
    /// diversifier and the `pk_d` point encoding.
    pub fn to_payment_address(&self) -> Option<sapling::PaymentAddress> {
        sapling::PaymentAddress::from_bytes(&self.0)
    }

    /// Bech32-encode using the network's Sapling payment address HRP.
    pub fn encode(&self, network: NetworkType) -> String {
        match Hrp::parse(network.hrp_sapling_payment_address()) {
            Ok(hrp) => bech32::encode::<Bech32>(hrp, &self.0)
                .unwrap_or_else(|_| hex::encode(self.0)),
            Err(_) => hex::encode(self.0),
        }
    }

    /// Decode a Bech32 Sapling payment address for `network`.
    ///
    /// Rejects other HRPs (including other networks' Sapling HRPs), payloads
    /// of the wrong length, and byte strings that are not valid Sapling
    /// addresses.
    pub fn decode(network: NetworkType, encoded: &str) -> Result<Self> {
        let (hrp, data) = bech32::decode(encoded)
            .map_err(|e| ConsolidationError::InvalidDestination(format!("{encoded}: {e}")))?;

        if hrp.as_str() != network.hrp_sapling_payment_address() {
            return Err(ConsolidationError::InvalidDestination(format!(
                "{encoded}: not a Sapling address for this network"
            )));
        }

        let bytes: [u8; SAPLING_ADDRESS_LEN] = data.try_into().map_err(|_| {
            ConsolidationError::InvalidDestination(format!("{encoded}: invalid address length"))
        })?;

        let address = Self(bytes);
        if address.to_payment_address().is_none() {
            return Err(ConsolidationError::InvalidDestination(format!(
                "{encoded}: invalid Sapling address encoding"
            )));
        }
        Ok(address)
    }
}

impl fmt::Debug for SaplingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SaplingAddress({})", hex::encode(&self.0[..11]))
    }
}

impl fmt::Display for SaplingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Opaque Sapling incoming viewing key.
///
/// Two addresses belong to the same equivalence class when the wallet maps
/// them to equal incoming viewing keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IncomingViewingKey(pub [u8; 32]);

/// Opaque spend-authorizing key material for one address.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SpendingKey(Vec<u8>);

impl SpendingKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SpendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpendingKey").finish_non_exhaustive()
    }
}
