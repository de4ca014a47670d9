//! Network-upgrade activation schedule.

use zcash_protocol::consensus::{NetworkConstants, NetworkType};

/// Consensus facts the consolidation operation depends on.
pub trait ConsensusProvider: Send + Sync {
    fn network_type(&self) -> NetworkType;

    /// BIP 44 coin type used in the ZIP 32 keypath.
    fn coin_type(&self) -> u32 {
        self.network_type().coin_type()
    }

    /// Lowest network-upgrade activation height strictly above `height`.
    fn next_activation_height(&self, height: u32) -> Option<u32>;
}

/// A named network-upgrade activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Activation {
    pub name: String,
    pub height: u32,
}

/// Static list of network-upgrade activation heights.
#[derive(Clone, Debug)]
pub struct ActivationSchedule {
    network: NetworkType,
    activations: Vec<Activation>,
}

const MAINNET_ACTIVATIONS: &[(&str, u32)] = &[
    ("overwinter", 347_500),
    ("sapling", 419_200),
    ("blossom", 653_600),
    ("heartwood", 903_000),
    ("canopy", 1_046_400),
    ("nu5", 1_687_104),
    ("nu6", 2_726_400),
];

const TESTNET_ACTIVATIONS: &[(&str, u32)] = &[
    ("overwinter", 207_500),
    ("sapling", 280_000),
    ("blossom", 584_000),
    ("heartwood", 903_800),
    ("canopy", 1_028_500),
    ("nu5", 1_842_420),
    ("nu6", 2_976_000),
];

impl ActivationSchedule {
    pub fn new(network: NetworkType, mut activations: Vec<Activation>) -> Self {
        activations.sort_by_key(|a| a.height);
        Self {
            network,
            activations,
        }
    }

    pub fn mainnet() -> Self {
        Self::from_table(NetworkType::Main, MAINNET_ACTIVATIONS)
    }

    pub fn testnet() -> Self {
        Self::from_table(NetworkType::Test, TESTNET_ACTIVATIONS)
    }

    /// Regtest schedule with caller-chosen activation heights.
    pub fn regtest(heights: impl IntoIterator<Item = u32>) -> Self {
        let activations = heights
            .into_iter()
            .enumerate()
            .map(|(i, height)| Activation {
                name: format!("upgrade-{i}"),
                height,
            })
            .collect();
        Self::new(NetworkType::Regtest, activations)
    }

    fn from_table(network: NetworkType, table: &[(&str, u32)]) -> Self {
        let activations = table
            .iter()
            .map(|(name, height)| Activation {
                name: (*name).to_string(),
                height: *height,
            })
            .collect();
        Self::new(network, activations)
    }
}

impl ConsensusProvider for ActivationSchedule {
    fn network_type(&self) -> NetworkType {
        self.network
    }

    fn next_activation_height(&self, height: u32) -> Option<u32> {
        self.activations
            .iter()
            .map(|a| a.height)
            .find(|&h| h > height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_activation_is_strictly_above_height() {
        let schedule = ActivationSchedule::mainnet();
        assert_eq!(schedule.next_activation_height(419_199), Some(419_200));
        assert_eq!(schedule.next_activation_height(419_200), Some(653_600));
        assert_eq!(schedule.next_activation_height(1_000_000), Some(1_046_400));
        assert_eq!(schedule.next_activation_height(3_000_000), None);
    }

    #[test]
    fn regtest_heights_are_sorted() {
        let schedule = ActivationSchedule::regtest([500, 100, 300]);
        assert_eq!(schedule.next_activation_height(0), Some(100));
        assert_eq!(schedule.next_activation_height(100), Some(300));
        assert_eq!(schedule.next_activation_height(500), None);
        assert_eq!(schedule.network_type(), NetworkType::Regtest);
    }

    #[test]
    fn coin_type_follows_network() {
        assert_eq!(ActivationSchedule::mainnet().coin_type(), 133);
        assert_eq!(ActivationSchedule::testnet().coin_type(), 1);
    }
}
