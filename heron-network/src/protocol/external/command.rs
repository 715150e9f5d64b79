//! The 12-byte command names that label messages on the wire.

use heron_chain::SerializationError;

/// A recognized message command.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Command {
    Addr,
    Block,
    BlockTxn,
    CmpctBlock,
    FeeFilter,
    FilterAdd,
    FilterClear,
    FilterLoad,
    GetAddr,
    GetBlocks,
    GetBlockTxn,
    GetData,
    GetHeaders,
    Headers,
    Inv,
    MemPool,
    MerkleBlock,
    NotFound,
    Ping,
    Pong,
    Reject,
    SendCmpct,
    SendHeaders,
    Tx,
    Verack,
    Version,
}

impl Command {
    /// The null-padded name as it appears in a message header.
    pub fn bytes(&self) -> &'static [u8; 12] {
        match self {
            Command::Addr => b"addr\0\0\0\0\0\0\0\0",
            Command::Block => b"block\0\0\0\0\0\0\0",
            Command::BlockTxn => b"blocktxn\0\0\0\0",
            Command::CmpctBlock => b"cmpctblock\0\0",
            Command::FeeFilter => b"feefilter\0\0\0",
            Command::FilterAdd => b"filteradd\0\0\0",
            Command::FilterClear => b"filterclear\0",
            Command::FilterLoad => b"filterload\0\0",
            Command::GetAddr => b"getaddr\0\0\0\0\0",
            Command::GetBlocks => b"getblocks\0\0\0",
            Command::GetBlockTxn => b"getblocktxn\0",
            Command::GetData => b"getdata\0\0\0\0\0",
            Command::GetHeaders => b"getheaders\0\0",
            Command::Headers => b"headers\0\0\0\0\0",
            Command::Inv => b"inv\0\0\0\0\0\0\0\0\0",
            Command::MemPool => b"mempool\0\0\0\0\0",
            Command::MerkleBlock => b"merkleblock\0",
            Command::NotFound => b"notfound\0\0\0\0",
            Command::Ping => b"ping\0\0\0\0\0\0\0\0",
            Command::Pong => b"pong\0\0\0\0\0\0\0\0",
            Command::Reject => b"reject\0\0\0\0\0\0",
            Command::SendCmpct => b"sendcmpct\0\0\0",
            Command::SendHeaders => b"sendheaders\0",
            Command::Tx => b"tx\0\0\0\0\0\0\0\0\0\0",
            Command::Verack => b"verack\0\0\0\0\0\0",
            Command::Version => b"version\0\0\0\0\0",
        }
    }

    /// Parse a header's command field.
    pub fn from_bytes(bytes: &[u8; 12]) -> Result<Command, SerializationError> {
        const ALL: [Command; 26] = [
            Command::Addr,
            Command::Block,
            Command::BlockTxn,
            Command::CmpctBlock,
            Command::FeeFilter,
            Command::FilterAdd,
            Command::FilterClear,
            Command::FilterLoad,
            Command::GetAddr,
            Command::GetBlocks,
            Command::GetBlockTxn,
            Command::GetData,
            Command::GetHeaders,
            Command::Headers,
            Command::Inv,
            Command::MemPool,
            Command::MerkleBlock,
            Command::NotFound,
            Command::Ping,
            Command::Pong,
            Command::Reject,
            Command::SendCmpct,
            Command::SendHeaders,
            Command::Tx,
            Command::Verack,
            Command::Version,
        ];
        ALL.iter()
            .find(|command| command.bytes() == bytes)
            .copied()
            .ok_or(SerializationError::Parse("unrecognized command"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_round_trip() {
        heron_test::init();

        for command in &[Command::Version, Command::Inv, Command::FilterClear, Command::Tx] {
            assert_eq!(Command::from_bytes(command.bytes()).unwrap(), *command);
        }
        assert!(Command::from_bytes(b"nonsense\0\0\0\0").is_err());
    }
}
