//! Genesis consensus parameters for each network.

use lazy_static::lazy_static;

use crate::block::{self, Block};
use crate::parameters::Network;
use crate::serialization::BitcoinDeserialize;

/// The previous block hash for the genesis block.
///
/// Both networks use the all-zero value for the parent of the genesis block.
pub const GENESIS_PREVIOUS_BLOCK_HASH: block::Hash = block::Hash::zero();

/// The raw genesis block for the production network.
const MAINNET_GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e\
67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c01010000000100000000000000000000\
00000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f\
4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f75742066\
6f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a6\
7962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

/// The raw genesis block for the test network: the same block re-mined with
/// a later timestamp and different nonce.
const TESTNET_GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e\
67768f617fc81bc3888a51323a9fb8aa4b1e5e4adae5494dffff001d1aa4ae1801010000000100000000000000000000\
00000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f\
4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f75742066\
6f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a6\
7962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

lazy_static! {
    static ref MAINNET_GENESIS: Block = Block::bitcoin_deserialize(
        &hex::decode(MAINNET_GENESIS_HEX).expect("hard-coded genesis hex decodes")[..]
    )
    .expect("hard-coded genesis block parses");
    static ref TESTNET_GENESIS: Block = Block::bitcoin_deserialize(
        &hex::decode(TESTNET_GENESIS_HEX).expect("hard-coded genesis hex decodes")[..]
    )
    .expect("hard-coded genesis block parses");
}

/// Returns the genesis block for `network`.
pub fn genesis_block(network: Network) -> &'static Block {
    match network {
        Network::Mainnet => &MAINNET_GENESIS,
        Network::Testnet => &TESTNET_GENESIS,
    }
}

/// Returns the hash for the genesis block in `network`.
pub fn genesis_hash(network: Network) -> block::Hash {
    match network {
        Network::Mainnet => "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        Network::Testnet => "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
    }
    .parse()
    .expect("hard-coded hash parses")
}

#[cfg(test)]
mod tests {
    use std::iter::FromIterator;

    use super::*;
    use crate::block::merkle;

    #[test]
    fn genesis_blocks_match_their_hashes() {
        heron_test::init();

        for network in [Network::Mainnet, Network::Testnet].iter().copied() {
            let block = genesis_block(network);
            assert_eq!(block.hash(), genesis_hash(network), "{} genesis", network);
            assert_eq!(
                block.header.previous_block_hash,
                GENESIS_PREVIOUS_BLOCK_HASH
            );
            assert_eq!(block.transactions.len(), 1);
            assert!(block.transactions[0].is_coinbase());
        }
    }

    #[test]
    fn genesis_merkle_root_is_its_coinbase_id() {
        heron_test::init();

        let block = genesis_block(Network::Mainnet);
        let root = merkle::Root::from_iter(block.transactions.iter().map(|tx| tx.hash()));
        assert_eq!(root, block.header.merkle_root);
        assert_eq!(root.0, block.transactions[0].hash().0);
    }
}
