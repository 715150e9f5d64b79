//! Standard lock script templates.
//!
//! Only four shapes are relay-standard: pay-to-public-key-hash,
//! pay-to-script-hash, pay-to-public-key, and bare multisig. Anything else
//! is consensus-acceptable but refused by the mempool.

use heron_chain::transparent::Script;

use crate::opcodes::*;

/// The classification of a lock script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Template {
    /// `OP_DUP OP_HASH160 <hash20> OP_EQUALVERIFY OP_CHECKSIG`
    PayToPublicKeyHash([u8; 20]),
    /// `OP_HASH160 <hash20> OP_EQUAL`
    PayToScriptHash([u8; 20]),
    /// `<pubkey> OP_CHECKSIG`
    PayToPublicKey(Vec<u8>),
    /// `<m> <pubkey>... <n> OP_CHECKMULTISIG`
    Multisig {
        required: u8,
        pubkeys: Vec<Vec<u8>>,
    },
    /// Everything else.
    NonStandard,
}

impl Template {
    /// Whether the mempool will relay outputs of this shape.
    pub fn is_standard(&self) -> bool {
        !matches!(self, Template::NonStandard)
    }
}

fn is_pubkey_len(len: usize) -> bool {
    len == 33 || len == 65
}

/// Classify `script` against the standard templates.
pub fn classify(script: &Script) -> Template {
    let bytes = script.as_bytes();

    // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
    if bytes.len() == 25
        && bytes[0] == OP_DUP
        && bytes[1] == OP_HASH160
        && bytes[2] == 20
        && bytes[23] == OP_EQUALVERIFY
        && bytes[24] == OP_CHECKSIG
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[3..23]);
        return Template::PayToPublicKeyHash(hash);
    }

    // OP_HASH160 <20> OP_EQUAL
    if bytes.len() == 23 && bytes[0] == OP_HASH160 && bytes[1] == 20 && bytes[22] == OP_EQUAL {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[2..22]);
        return Template::PayToScriptHash(hash);
    }

    // <pubkey> OP_CHECKSIG
    if bytes.len() >= 2
        && is_pubkey_len(bytes[0] as usize)
        && bytes.len() == bytes[0] as usize + 2
        && bytes[bytes.len() - 1] == OP_CHECKSIG
    {
        return Template::PayToPublicKey(bytes[1..bytes.len() - 1].to_vec());
    }

    // <m> <pubkey>... <n> OP_CHECKMULTISIG, with small-int m and n.
    if bytes.len() >= 4
        && (OP_1..=OP_16).contains(&bytes[0])
        && bytes[bytes.len() - 1] == OP_CHECKMULTISIG
        && (OP_1..=OP_16).contains(&bytes[bytes.len() - 2])
    {
        let required = bytes[0] - OP_1 + 1;
        let total = bytes[bytes.len() - 2] - OP_1 + 1;
        let mut pubkeys = Vec::with_capacity(total as usize);
        let mut cursor = 1usize;
        while cursor < bytes.len() - 2 {
            let push = bytes[cursor] as usize;
            if !is_pubkey_len(push) || cursor + 1 + push > bytes.len() - 2 {
                return Template::NonStandard;
            }
            pubkeys.push(bytes[cursor + 1..cursor + 1 + push].to_vec());
            cursor += 1 + push;
        }
        if pubkeys.len() == total as usize && required <= total {
            return Template::Multisig { required, pubkeys };
        }
        return Template::NonStandard;
    }

    Template::NonStandard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_the_standard_shapes() {
        heron_test::init();

        let mut p2pkh = vec![OP_DUP, OP_HASH160, 20];
        p2pkh.extend_from_slice(&[0x11; 20]);
        p2pkh.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        assert_eq!(
            classify(&Script(p2pkh)),
            Template::PayToPublicKeyHash([0x11; 20])
        );

        let mut p2sh = vec![OP_HASH160, 20];
        p2sh.extend_from_slice(&[0x22; 20]);
        p2sh.push(OP_EQUAL);
        assert_eq!(classify(&Script(p2sh)), Template::PayToScriptHash([0x22; 20]));

        let mut p2pk = vec![33];
        p2pk.extend_from_slice(&[0x02; 33]);
        p2pk.push(OP_CHECKSIG);
        assert_eq!(classify(&Script(p2pk)), Template::PayToPublicKey(vec![0x02; 33]));

        let mut multisig = vec![OP_1, 33];
        multisig.extend_from_slice(&[0x03; 33]);
        multisig.push(33);
        multisig.extend_from_slice(&[0x02; 33]);
        multisig.extend_from_slice(&[OP_1 + 1, OP_CHECKMULTISIG]);
        match classify(&Script(multisig)) {
            Template::Multisig { required, pubkeys } => {
                assert_eq!(required, 1);
                assert_eq!(pubkeys.len(), 2);
            }
            other => panic!("expected multisig, got {:?}", other),
        }
    }

    #[test]
    fn rejects_near_misses() {
        heron_test::init();

        // One byte short of P2PKH.
        let mut short = vec![OP_DUP, OP_HASH160, 19];
        short.extend_from_slice(&[0x11; 19]);
        short.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        assert_eq!(classify(&Script(short)), Template::NonStandard);

        // Data-carrier outputs are not standard lock scripts here.
        assert_eq!(
            classify(&Script(vec![OP_RETURN, 0x01, 0xaa])),
            Template::NonStandard
        );
        assert!(!classify(&Script(vec![OP_RETURN])).is_standard());
    }
}
