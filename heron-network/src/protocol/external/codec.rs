//! A tokio codec mapping byte streams to message streams.

use std::fmt;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use heron_chain::block::{self, Block};
use heron_chain::parameters::Network;
use heron_chain::serialization::{
    sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError as Error,
};
use heron_chain::transaction::Transaction;

use crate::constants;
use crate::meta_addr::MetaAddr;

use super::command::Command;
use super::inv::InventoryHash;
use super::message::{
    BlockTxn, CompactBlock, GetBlockTxn, GetBlocks, GetHeaders, MerkleBlock, Message,
    RejectReason, SendCompact, Version,
};
use super::types::{Magic, Nonce, ProtocolVersion, Tweak};

/// The length of a message header.
const HEADER_LEN: usize = 24;

/// The maximum accepted message body, sized to fit a large-rule block.
const MAX_PROTOCOL_MESSAGE_LEN: usize = 32 * 1024 * 1024;

/// A codec which produces messages from byte streams and vice versa.
pub struct Codec {
    builder: Builder,
    state: DecodeState,
}

/// A builder for specifying [`Codec`] options.
pub struct Builder {
    /// The network whose magic goes on every message.
    network: Network,
    /// The protocol version to speak.
    version: ProtocolVersion,
    /// The maximum allowable message length.
    max_len: usize,
    /// An optional label for metrics.
    metrics_label: Option<String>,
}

impl Codec {
    /// Return a builder for constructing a [`Codec`].
    pub fn builder() -> Builder {
        Builder {
            network: Network::Mainnet,
            version: constants::CURRENT_VERSION,
            max_len: MAX_PROTOCOL_MESSAGE_LEN,
            metrics_label: None,
        }
    }

    /// Reconfigure the version, e.g. after completing a handshake.
    pub fn reconfigure_version(&mut self, version: ProtocolVersion) {
        self.builder.version = version;
    }
}

impl Builder {
    /// Finalize the builder and return a [`Codec`].
    pub fn finish(self) -> Codec {
        Codec {
            builder: self,
            state: DecodeState::Head,
        }
    }

    /// Configure the codec for the given [`Network`].
    pub fn for_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Configure the codec's maximum accepted payload size, in bytes.
    #[allow(dead_code)]
    pub fn with_max_body_len(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }

    /// Label this codec's metrics with a peer address.
    pub fn with_metrics_label(mut self, metrics_label: String) -> Self {
        self.metrics_label = Some(metrics_label);
        self
    }
}

// ======== Encoding =========

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = Vec::new();
        self.write_body(&item, &mut body)?;

        if body.len() > self.builder.max_len {
            return Err(Error::Parse("body length exceeded maximum size"));
        }

        if let Some(label) = self.builder.metrics_label.clone() {
            metrics::counter!("bytes.written", (body.len() + HEADER_LEN) as u64, "addr" => label);
        }

        let command = item.command();
        trace!(?item, len = body.len());

        let mut header = [0u8; HEADER_LEN];
        let mut header_writer = Cursor::new(&mut header[..]);
        header_writer.write_all(&Magic::from(self.builder.network).0[..])?;
        header_writer.write_all(command.bytes())?;
        header_writer.write_u32::<LittleEndian>(body.len() as u32)?;
        header_writer.write_all(&sha256d::Checksum::from(&body[..]).0)?;

        dst.reserve(HEADER_LEN + body.len());
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

impl Codec {
    /// Write the message body, so the header's length and checksum can be
    /// computed before anything is put on the wire.
    fn write_body<W: Write>(&self, msg: &Message, mut writer: W) -> Result<(), Error> {
        match msg {
            Message::Version(inner) => inner.bitcoin_serialize(&mut writer)?,
            Message::Verack => {}
            Message::Ping(nonce) => nonce.bitcoin_serialize(&mut writer)?,
            Message::Pong(nonce) => nonce.bitcoin_serialize(&mut writer)?,
            Message::Reject {
                message,
                ccode,
                reason,
                data,
            } => {
                message.bitcoin_serialize(&mut writer)?;
                writer.write_u8(*ccode as u8)?;
                reason.bitcoin_serialize(&mut writer)?;
                if let Some(data) = data {
                    writer.write_all(data)?;
                }
            }
            Message::GetAddr => {}
            Message::Addr(addrs) => addrs.bitcoin_serialize(&mut writer)?,
            Message::GetBlocks(inner) => {
                self.builder.version.bitcoin_serialize(&mut writer)?;
                inner.bitcoin_serialize(&mut writer)?;
            }
            Message::Inv(hashes) => hashes.bitcoin_serialize(&mut writer)?,
            Message::GetHeaders(inner) => {
                self.builder.version.bitcoin_serialize(&mut writer)?;
                inner.bitcoin_serialize(&mut writer)?;
            }
            Message::Headers(headers) => headers.bitcoin_serialize(&mut writer)?,
            Message::GetData(hashes) => hashes.bitcoin_serialize(&mut writer)?,
            Message::Block(block) => block.bitcoin_serialize(&mut writer)?,
            Message::Tx(transaction) => transaction.bitcoin_serialize(&mut writer)?,
            Message::NotFound(hashes) => hashes.bitcoin_serialize(&mut writer)?,
            Message::Mempool => {}
            Message::FilterLoad {
                filter,
                hash_functions_count,
                tweak,
                flags,
            } => {
                filter.bitcoin_serialize(&mut writer)?;
                writer.write_u32::<LittleEndian>(*hash_functions_count)?;
                writer.write_u32::<LittleEndian>(tweak.0)?;
                writer.write_u8(*flags)?;
            }
            Message::FilterAdd { data } => data.bitcoin_serialize(&mut writer)?,
            Message::FilterClear => {}
            Message::MerkleBlock(inner) => inner.bitcoin_serialize(&mut writer)?,
            Message::CompactBlock(inner) => inner.bitcoin_serialize(&mut writer)?,
            Message::GetBlockTxn(inner) => inner.bitcoin_serialize(&mut writer)?,
            Message::BlockTxn(inner) => inner.bitcoin_serialize(&mut writer)?,
            Message::SendCompact(inner) => inner.bitcoin_serialize(&mut writer)?,
            Message::FeeFilter(rate) => rate.bitcoin_serialize(&mut writer)?,
            Message::SendHeaders => {}
        }
        Ok(())
    }
}

// ======== Decoding =========

enum DecodeState {
    Head,
    Body {
        body_len: usize,
        command: Command,
        checksum: sha256d::Checksum,
    },
}

impl fmt::Debug for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeState::Head => write!(f, "DecodeState::Head"),
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => f
                .debug_struct("DecodeState::Body")
                .field("body_len", &body_len)
                .field("command", &command)
                .field("checksum", &checksum)
                .finish(),
        }
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Error> {
        match self.state {
            DecodeState::Head => {
                if src.len() < HEADER_LEN {
                    return Ok(None);
                }
                let header = src.split_to(HEADER_LEN);
                let mut reader = Cursor::new(&header[..]);

                let mut magic = [0u8; 4];
                reader.read_exact(&mut magic)?;
                if magic != Magic::from(self.builder.network).0 {
                    return Err(Error::Parse("wrong network magic"));
                }

                let mut command_bytes = [0u8; 12];
                reader.read_exact(&mut command_bytes)?;
                let command = Command::from_bytes(&command_bytes)?;

                let body_len = reader.read_u32::<LittleEndian>()? as usize;
                if body_len > self.builder.max_len {
                    return Err(Error::Parse("body length exceeded maximum size"));
                }

                let mut checksum_bytes = [0u8; 4];
                reader.read_exact(&mut checksum_bytes)?;
                let checksum = sha256d::Checksum(checksum_bytes);

                self.state = DecodeState::Body {
                    body_len,
                    command,
                    checksum,
                };
                src.reserve(body_len);
                self.decode(src)
            }
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => {
                if src.len() < body_len {
                    return Ok(None);
                }
                let body = src.split_to(body_len);
                self.state = DecodeState::Head;

                if checksum != sha256d::Checksum::from(&body[..]) {
                    return Err(Error::Parse("checksum does not match payload"));
                }
                if let Some(label) = self.builder.metrics_label.clone() {
                    metrics::counter!("bytes.read", (body_len + HEADER_LEN) as u64, "addr" => label);
                }

                self.read_body(command, Cursor::new(&body[..]))
                    .map(Some)
            }
        }
    }
}

impl Codec {
    fn read_body<R: Read>(&self, command: Command, mut reader: R) -> Result<Message, Error> {
        Ok(match command {
            Command::Version => Message::Version(Version::bitcoin_deserialize(&mut reader)?),
            Command::Verack => Message::Verack,
            Command::Ping => Message::Ping(Nonce::bitcoin_deserialize(&mut reader)?),
            Command::Pong => Message::Pong(Nonce::bitcoin_deserialize(&mut reader)?),
            Command::Reject => {
                let message = String::bitcoin_deserialize(&mut reader)?;
                let ccode = RejectReason::from_byte(u8::bitcoin_deserialize(&mut reader)?);
                let reason = String::bitcoin_deserialize(&mut reader)?;
                let data = <[u8; 32]>::bitcoin_deserialize(&mut reader).ok();
                Message::Reject {
                    message,
                    ccode,
                    reason,
                    data,
                }
            }
            Command::GetAddr => Message::GetAddr,
            Command::Addr => Message::Addr(Vec::bitcoin_deserialize(&mut reader)?),
            Command::GetBlocks => {
                let _version = ProtocolVersion::bitcoin_deserialize(&mut reader)?;
                Message::GetBlocks(GetBlocks::bitcoin_deserialize(&mut reader)?)
            }
            Command::Inv => Message::Inv(Vec::bitcoin_deserialize(&mut reader)?),
            Command::GetHeaders => {
                let _version = ProtocolVersion::bitcoin_deserialize(&mut reader)?;
                Message::GetHeaders(GetHeaders::bitcoin_deserialize(&mut reader)?)
            }
            Command::Headers => Message::Headers(Vec::bitcoin_deserialize(&mut reader)?),
            Command::GetData => Message::GetData(Vec::bitcoin_deserialize(&mut reader)?),
            Command::Block => {
                Message::Block(Arc::new(Block::bitcoin_deserialize(&mut reader)?))
            }
            Command::Tx => Message::Tx(Arc::new(Transaction::bitcoin_deserialize(&mut reader)?)),
            Command::NotFound => Message::NotFound(Vec::bitcoin_deserialize(&mut reader)?),
            Command::MemPool => Message::Mempool,
            Command::FilterLoad => {
                let filter = Vec::<u8>::bitcoin_deserialize(&mut reader)?;
                let hash_functions_count = u32::bitcoin_deserialize(&mut reader)?;
                let tweak = Tweak(u32::bitcoin_deserialize(&mut reader)?);
                let flags = u8::bitcoin_deserialize(&mut reader)?;
                Message::FilterLoad {
                    filter,
                    hash_functions_count,
                    tweak,
                    flags,
                }
            }
            Command::FilterAdd => Message::FilterAdd {
                data: Vec::<u8>::bitcoin_deserialize(&mut reader)?,
            },
            Command::FilterClear => Message::FilterClear,
            Command::MerkleBlock => {
                Message::MerkleBlock(MerkleBlock::bitcoin_deserialize(&mut reader)?)
            }
            Command::CmpctBlock => {
                Message::CompactBlock(CompactBlock::bitcoin_deserialize(&mut reader)?)
            }
            Command::GetBlockTxn => {
                Message::GetBlockTxn(GetBlockTxn::bitcoin_deserialize(&mut reader)?)
            }
            Command::BlockTxn => Message::BlockTxn(BlockTxn::bitcoin_deserialize(&mut reader)?),
            Command::SendCmpct => {
                Message::SendCompact(SendCompact::bitcoin_deserialize(&mut reader)?)
            }
            Command::FeeFilter => Message::FeeFilter(u64::bitcoin_deserialize(&mut reader)?),
            Command::SendHeaders => Message::SendHeaders,
        })
    }
}

#[cfg(test)]
mod tests {
    use heron_chain::parameters::genesis_block;

    use super::*;

    fn roundtrip(message: Message) -> Message {
        let mut codec = Codec::builder().finish();
        let mut bytes = BytesMut::new();
        codec.encode(message, &mut bytes).expect("encodes");
        codec
            .decode(&mut bytes)
            .expect("decodes")
            .expect("a full frame")
    }

    #[test]
    fn empty_payload_messages_round_trip() {
        heron_test::init();

        for message in vec![
            Message::Verack,
            Message::GetAddr,
            Message::Mempool,
            Message::FilterClear,
            Message::SendHeaders,
        ] {
            assert_eq!(roundtrip(message.clone()), message);
        }
    }

    #[test]
    fn typed_messages_round_trip() {
        heron_test::init();

        let block = Arc::new(genesis_block(Network::Mainnet).clone());
        let messages = vec![
            Message::Ping(Nonce(0x1234_5678_9abc_def0)),
            Message::Pong(Nonce(1)),
            Message::Inv(vec![
                InventoryHash::Tx(heron_chain::transaction::Hash([0x11; 32])),
                InventoryHash::Block(block::Hash([0x22; 32])),
            ]),
            Message::Block(block.clone()),
            Message::Tx(block.transactions[0].clone()),
            Message::FeeFilter(1000),
            Message::GetHeaders(GetHeaders {
                block_locator_hashes: vec![block.hash()],
                stop_hash: None,
            }),
            Message::Headers(vec![block::CountedHeader {
                header: block.header,
                transaction_count: 1,
            }]),
        ];
        for message in messages {
            assert_eq!(roundtrip(message.clone()), message);
        }
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        heron_test::init();

        let mut codec = Codec::builder().finish();
        let mut bytes = BytesMut::new();
        codec
            .encode(Message::Ping(Nonce(7)), &mut bytes)
            .expect("encodes");

        let mut partial = BytesMut::from(&bytes[..HEADER_LEN + 2]);
        let mut codec2 = Codec::builder().finish();
        assert!(codec2.decode(&mut partial).expect("no error").is_none());
    }

    #[test]
    fn corrupted_checksums_are_rejected() {
        heron_test::init();

        let mut codec = Codec::builder().finish();
        let mut bytes = BytesMut::new();
        codec
            .encode(Message::Ping(Nonce(7)), &mut bytes)
            .expect("encodes");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let mut codec2 = Codec::builder().finish();
        assert!(codec2.decode(&mut bytes).is_err());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        heron_test::init();

        let mut codec = Codec::builder().finish();
        let mut bytes = BytesMut::new();
        codec
            .encode(Message::Verack, &mut bytes)
            .expect("encodes");

        let mut testnet = Codec::builder().for_network(Network::Testnet).finish();
        assert!(testnet.decode(&mut bytes).is_err());
    }
}
