//! Legacy base58check addresses.

use std::{fmt, io};

use ripemd160::{Digest, Ripemd160};
use sha2::{Digest as Sha2Digest, Sha256};

use crate::parameters::Network;
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

use super::Script;

/// Version bytes distinguishing address kinds per network.
mod magics {
    pub mod p2pkh {
        pub const MAINNET: [u8; 1] = [0x00];
        pub const TESTNET: [u8; 1] = [0x6f];
    }

    pub mod p2sh {
        pub const MAINNET: [u8; 1] = [0x05];
        pub const TESTNET: [u8; 1] = [0xc4];
    }
}

/// A Bitcoin Cash address in the legacy base58check encoding.
///
/// One version byte is prepended to a 20-byte hash; the first four bytes of
/// the sha256d of that payload are appended as a checksum, and the result is
/// base58 encoded.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub enum Address {
    /// Pay-to-public-key-hash: the hash of an ECDSA public key encoding.
    PayToPublicKeyHash {
        /// Production or test network.
        network: Network,
        /// HASH160 of the public key.
        pub_key_hash: [u8; 20],
    },
    /// Pay-to-script-hash: the hash of a redeem script.
    PayToScriptHash {
        /// Production or test network.
        network: Network,
        /// HASH160 of the redeem script.
        script_hash: [u8; 20],
    },
}

impl Address {
    /// HASH160: RIPEMD-160 of SHA-256.
    pub fn hash_payload(bytes: &[u8]) -> [u8; 20] {
        let sha = Sha256::digest(bytes);
        let ripe = Ripemd160::digest(sha.as_slice());
        let mut payload = [0u8; 20];
        payload.copy_from_slice(ripe.as_slice());
        payload
    }

    /// The standard lock script paying this address.
    pub fn lock_script(&self) -> Script {
        match self {
            Address::PayToPublicKeyHash { pub_key_hash, .. } => {
                // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
                let mut bytes = Vec::with_capacity(25);
                bytes.extend_from_slice(&[0x76, 0xa9, 0x14]);
                bytes.extend_from_slice(pub_key_hash);
                bytes.extend_from_slice(&[0x88, 0xac]);
                Script(bytes)
            }
            Address::PayToScriptHash { script_hash, .. } => {
                // OP_HASH160 <20> OP_EQUAL
                let mut bytes = Vec::with_capacity(23);
                bytes.extend_from_slice(&[0xa9, 0x14]);
                bytes.extend_from_slice(script_hash);
                bytes.push(0x87);
                Script(bytes)
            }
        }
    }

    /// The 20-byte hash this address carries, whichever kind it is.
    pub fn payload(&self) -> [u8; 20] {
        match self {
            Address::PayToPublicKeyHash { pub_key_hash, .. } => *pub_key_hash,
            Address::PayToScriptHash { script_hash, .. } => *script_hash,
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut debug_struct = f.debug_struct("Address");
        match self {
            Address::PayToPublicKeyHash {
                network,
                pub_key_hash,
            } => debug_struct
                .field("network", network)
                .field("pub_key_hash", &hex::encode(pub_key_hash))
                .finish(),
            Address::PayToScriptHash {
                network,
                script_hash,
            } => debug_struct
                .field("network", network)
                .field("script_hash", &hex::encode(script_hash))
                .finish(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut bytes = io::Cursor::new(Vec::with_capacity(21));
        let _ = self.bitcoin_serialize(&mut bytes);
        f.write_str(&bs58::encode(bytes.get_ref()).with_check().into_string())
    }
}

impl std::str::FromStr for Address {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match bs58::decode(s).with_check(None).into_vec() {
            Ok(bytes) => Self::bitcoin_deserialize(&bytes[..]),
            Err(_) => Err(SerializationError::Parse("base58check decoding error")),
        }
    }
}

impl BitcoinSerialize for Address {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Address::PayToPublicKeyHash {
                network,
                pub_key_hash,
            } => {
                match network {
                    Network::Mainnet => writer.write_all(&magics::p2pkh::MAINNET[..])?,
                    Network::Testnet => writer.write_all(&magics::p2pkh::TESTNET[..])?,
                }
                writer.write_all(pub_key_hash)
            }
            Address::PayToScriptHash {
                network,
                script_hash,
            } => {
                match network {
                    Network::Mainnet => writer.write_all(&magics::p2sh::MAINNET[..])?,
                    Network::Testnet => writer.write_all(&magics::p2sh::TESTNET[..])?,
                }
                writer.write_all(script_hash)
            }
        }
    }
}

impl BitcoinDeserialize for Address {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut version_bytes = [0; 1];
        reader.read_exact(&mut version_bytes)?;

        let mut hash_bytes = [0; 20];
        reader.read_exact(&mut hash_bytes)?;

        match version_bytes {
            magics::p2pkh::MAINNET => Ok(Address::PayToPublicKeyHash {
                network: Network::Mainnet,
                pub_key_hash: hash_bytes,
            }),
            magics::p2pkh::TESTNET => Ok(Address::PayToPublicKeyHash {
                network: Network::Testnet,
                pub_key_hash: hash_bytes,
            }),
            magics::p2sh::MAINNET => Ok(Address::PayToScriptHash {
                network: Network::Mainnet,
                script_hash: hash_bytes,
            }),
            magics::p2sh::TESTNET => Ok(Address::PayToScriptHash {
                network: Network::Testnet,
                script_hash: hash_bytes,
            }),
            _ => Err(SerializationError::Parse("unknown address version byte")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satoshi_genesis_address_parses() {
        heron_test::init();

        // The address paid by the genesis coinbase output.
        let addr: Address = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".parse().unwrap();
        match addr {
            Address::PayToPublicKeyHash { network, .. } => assert_eq!(network, Network::Mainnet),
            _ => panic!("genesis pays a public key hash"),
        }
        assert_eq!(addr.to_string(), "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
    }

    #[test]
    fn lock_script_shapes() {
        heron_test::init();

        let p2pkh = Address::PayToPublicKeyHash {
            network: Network::Mainnet,
            pub_key_hash: [0x11; 20],
        };
        assert_eq!(p2pkh.lock_script().0.len(), 25);

        let p2sh = Address::PayToScriptHash {
            network: Network::Mainnet,
            script_hash: [0x22; 20],
        };
        assert_eq!(p2sh.lock_script().0.len(), 23);
    }
}
