//! secp256k1 key and signature operations.
//!
//! Thin wrappers over the `secp256k1` crate that pin down the node's
//! parsing policy: strict DER when the signature-encoding rule is active,
//! the documented lax repairs (trailing garbage, mis-stated lengths,
//! missing zero padding) otherwise, and low-S normalization always.

use lazy_static::lazy_static;
use ripemd160::{Digest as RipemdDigest, Ripemd160};
use secp256k1::{All, Message, Secp256k1};
use sha2::{Digest, Sha256};
use thiserror::Error;

lazy_static! {
    static ref SECP256K1: Secp256k1<All> = Secp256k1::new();
}

/// HASH160: RIPEMD-160 of SHA-256, the digest behind addresses and
/// pay-to-public-key-hash scripts.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha.as_slice());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(ripe.as_slice());
    bytes
}

/// An error in key or signature handling.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed public key encoding")]
    InvalidPublicKey,
    #[error("malformed DER signature encoding")]
    InvalidSignature,
    #[error("signature does not match key and digest")]
    IncorrectSignature,
    #[error("malformed secret key")]
    InvalidSecretKey,
}

/// A parsed secp256k1 public key.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// Parse a compressed (33-byte) or uncompressed (65-byte) encoding.
    pub fn from_slice(bytes: &[u8]) -> Result<PublicKey, KeyError> {
        secp256k1::PublicKey::from_slice(bytes)
            .map(PublicKey)
            .map_err(|_| KeyError::InvalidPublicKey)
    }

    /// The compressed 33-byte encoding.
    pub fn serialize(&self) -> [u8; 33] {
        self.0.serialize()
    }

    /// Check `signature` over the 32-byte `digest`.
    pub fn verify(&self, digest: &[u8; 32], signature: &Signature) -> Result<(), KeyError> {
        let message = Message::from_slice(digest).expect("32 bytes is always a valid message");
        SECP256K1
            .verify(&message, &signature.0, &self.0)
            .map_err(|_| KeyError::IncorrectSignature)
    }
}

/// A parsed, low-S-normalized ECDSA signature.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Signature(secp256k1::Signature);

impl Signature {
    /// Parse a DER encoding.
    ///
    /// Under `strict`, only canonical DER is accepted. Otherwise the lax
    /// parser repairs the small set of encoding defects found in old chain
    /// signatures. Either way the result is normalized to low-S form before
    /// use.
    pub fn from_der(bytes: &[u8], strict: bool) -> Result<Signature, KeyError> {
        let mut signature = if strict {
            secp256k1::Signature::from_der(bytes)
        } else {
            secp256k1::Signature::from_der_lax(bytes)
        }
        .map_err(|_| KeyError::InvalidSignature)?;
        signature.normalize_s();
        Ok(Signature(signature))
    }

    /// The canonical DER encoding.
    pub fn serialize_der(&self) -> Vec<u8> {
        self.0.serialize_der().as_ref().to_vec()
    }
}

/// A secp256k1 secret key, used by the query channel's identity proof and by
/// tests.
pub struct SecretKey(secp256k1::SecretKey);

impl SecretKey {
    pub fn from_slice(bytes: &[u8]) -> Result<SecretKey, KeyError> {
        secp256k1::SecretKey::from_slice(bytes)
            .map(SecretKey)
            .map_err(|_| KeyError::InvalidSecretKey)
    }

    /// The public key for this secret key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(secp256k1::PublicKey::from_secret_key(&SECP256K1, &self.0))
    }

    /// Produce a signature over the 32-byte `digest`.
    pub fn sign(&self, digest: &[u8; 32]) -> Signature {
        let message = Message::from_slice(digest).expect("32 bytes is always a valid message");
        Signature(SECP256K1.sign(&message, &self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretKey {
        SecretKey::from_slice(&[0x42; 32]).unwrap()
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        heron_test::init();

        let secret = test_key();
        let digest = crate::sha256d::digest(b"some signed payload");
        let signature = secret.sign(&digest);

        let public = secret.public_key();
        assert_eq!(public.verify(&digest, &signature), Ok(()));

        let wrong = crate::sha256d::digest(b"a different payload");
        assert_eq!(
            public.verify(&wrong, &signature),
            Err(KeyError::IncorrectSignature)
        );
    }

    #[test]
    fn der_roundtrip_strict_and_lax() {
        heron_test::init();

        let digest = crate::sha256d::digest(b"payload");
        let signature = test_key().sign(&digest);
        let der = signature.serialize_der();

        assert_eq!(Signature::from_der(&der, true), Ok(signature));
        assert_eq!(Signature::from_der(&der, false), Ok(signature));

        // Truncated DER fails in both modes.
        assert_eq!(
            Signature::from_der(&der[..der.len() - 4], true),
            Err(KeyError::InvalidSignature)
        );
    }

    #[test]
    fn hash160_known_vector() {
        heron_test::init();

        // HASH160 of the empty string.
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }
}
