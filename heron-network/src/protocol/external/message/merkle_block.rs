use heron_chain::block::{merkle::PartialMerkleTree, Header};
use heron_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A `merkleblock`: a header plus a partial merkle tree proving the
/// inclusion of the transactions that matched the requester's bloom
/// filter. The matching transactions follow as separate `tx` messages.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MerkleBlock {
    pub header: Header,
    pub proof: PartialMerkleTree,
}

impl BitcoinSerialize for MerkleBlock {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.header.bitcoin_serialize(&mut target)?;
        self.proof.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for MerkleBlock {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(MerkleBlock {
            header: Header::bitcoin_deserialize(&mut reader)?,
            proof: PartialMerkleTree::bitcoin_deserialize(&mut reader)?,
        })
    }
}
