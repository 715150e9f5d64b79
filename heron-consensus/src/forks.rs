//! Soft-fork activation tracking.
//!
//! At every retarget boundary the trailing window of header versions is
//! counted; a rule whose signal version reaches the threshold activates at
//! the boundary height, permanently. The recorded activation heights are
//! the sole input to [`Forks::requires`].

use std::collections::HashMap;

use tracing::info;

use heron_chain::block::Height;
use heron_chain::parameters::{ForkSet, Network, SoftFork};
use heron_chain::work::difficulty::RETARGET_INTERVAL;
use heron_state::HeaderIndex;

use crate::parameters::{FORK_ACTIVATION_THRESHOLD, FORK_SIGNAL_WINDOW};

/// The set of soft forks and their activation heights.
#[derive(Clone, Debug)]
pub struct Forks {
    network: Network,
    activation_heights: HashMap<SoftFork, Height>,
}

impl Forks {
    pub fn new(network: Network) -> Forks {
        Forks {
            network,
            activation_heights: HashMap::new(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Whether `rule` is mandatory at `height`.
    pub fn requires(&self, rule: SoftFork, height: Height) -> bool {
        match self.activation_heights.get(&rule) {
            Some(activation) => height >= *activation,
            None => false,
        }
    }

    /// The activation height of `rule`, once reached.
    pub fn activation_height(&self, rule: SoftFork) -> Option<Height> {
        self.activation_heights.get(&rule).copied()
    }

    /// The full rule snapshot at `height`.
    pub fn active_set(&self, height: Height) -> ForkSet {
        let mut set = ForkSet::none();
        for rule in SoftFork::ALL.iter() {
            if self.requires(*rule, height) {
                set.insert(*rule);
            }
        }
        set
    }

    /// Called when `next_height` starts a new retarget interval: scan the
    /// trailing window for version signals and activate anything over
    /// threshold.
    pub fn update_at_boundary(&mut self, headers: &HeaderIndex, next_height: Height) {
        if next_height.0 % RETARGET_INTERVAL != 0 {
            return;
        }
        for rule in SoftFork::ALL.iter() {
            if self.activation_heights.contains_key(rule) {
                continue;
            }
            let signals =
                headers.version_count_at_least(FORK_SIGNAL_WINDOW, rule.signal_version());
            if signals >= FORK_ACTIVATION_THRESHOLD {
                info!(
                    rule = ?rule,
                    height = next_height.0,
                    signals,
                    "soft fork activated"
                );
                self.activation_heights.insert(*rule, next_height);
            }
        }
    }

    /// Forget activations above `height` after a reorg.
    pub fn revert_above(&mut self, height: Height) {
        self.activation_heights
            .retain(|_, activation| *activation <= height);
    }
}

#[cfg(test)]
mod tests {
    use heron_chain::block::{merkle, Header};
    use heron_chain::parameters::genesis_block;
    use heron_chain::work::difficulty::{CompactDifficulty, PROOF_OF_WORK_LIMIT_BITS};

    use super::*;

    fn index_with_versions(versions: &[i32]) -> HeaderIndex {
        let genesis = genesis_block(Network::Mainnet);
        let mut index = HeaderIndex::new();
        index.push(&genesis.header).unwrap();
        for version in versions {
            let tip = index.tip().unwrap();
            let header = Header::new(
                *version,
                tip.hash,
                merkle::Root([0; 32]),
                tip.time,
                CompactDifficulty::new(PROOF_OF_WORK_LIMIT_BITS),
                0,
            );
            index.push(&header).unwrap();
        }
        index
    }

    #[test]
    fn activation_needs_threshold_signals_at_a_boundary() {
        heron_test::init();

        let mut forks = Forks::new(Network::Mainnet);
        let strong_signal = vec![2i32; FORK_SIGNAL_WINDOW];
        let index = index_with_versions(&strong_signal);

        // Off-boundary heights never activate anything.
        forks.update_at_boundary(&index, Height(1000));
        assert!(!forks.requires(SoftFork::HeightInCoinbase, Height(1000)));

        forks.update_at_boundary(&index, Height(RETARGET_INTERVAL));
        assert!(forks.requires(SoftFork::HeightInCoinbase, Height(RETARGET_INTERVAL)));
        assert!(!forks.requires(SoftFork::HeightInCoinbase, Height(RETARGET_INTERVAL - 1)));
        assert!(!forks.requires(SoftFork::StrictDer, Height(RETARGET_INTERVAL)));

        let set = forks.active_set(Height(RETARGET_INTERVAL));
        assert!(set.height_in_coinbase);
        assert_eq!(set.min_block_version(), 2);
    }

    #[test]
    fn weak_signals_do_not_activate() {
        heron_test::init();

        let mut forks = Forks::new(Network::Mainnet);
        let mut versions = vec![2i32; FORK_ACTIVATION_THRESHOLD - 1];
        versions.resize(FORK_SIGNAL_WINDOW, 1);
        let index = index_with_versions(&versions);

        forks.update_at_boundary(&index, Height(RETARGET_INTERVAL));
        assert!(!forks.requires(SoftFork::HeightInCoinbase, Height(RETARGET_INTERVAL)));
    }

    #[test]
    fn revert_forgets_recent_activations() {
        heron_test::init();

        let mut forks = Forks::new(Network::Mainnet);
        let index = index_with_versions(&vec![6i32; FORK_SIGNAL_WINDOW]);
        forks.update_at_boundary(&index, Height(RETARGET_INTERVAL));
        assert!(forks.requires(SoftFork::LargeBlocks, Height(RETARGET_INTERVAL)));

        forks.revert_above(Height(100));
        assert!(!forks.requires(SoftFork::LargeBlocks, Height(RETARGET_INTERVAL)));
    }
}
