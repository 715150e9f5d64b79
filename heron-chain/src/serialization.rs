//! Consensus-critical serialization.
//!
//! The `BitcoinSerialize` and `BitcoinDeserialize` traits are analogs of the
//! Serde `Serialize` and `Deserialize` traits, but for the little-endian wire
//! format shared by the Bitcoin p2p protocol and the on-disk block format.
//! Every parse boundary returns `Result<_, SerializationError>`; nothing in
//! this module panics on malformed input.

mod deserialize;
mod error;

pub mod sha256d;

use std::net::IpAddr;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};

use crate::compactint::CompactInt;

pub use deserialize::{BitcoinDeserialize, BitcoinDeserializeInto};
pub use error::SerializationError;

pub trait BitcoinSerialize {
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error>;

    fn bitcoin_serialize_to_vec(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut data = Vec::new();
        self.bitcoin_serialize(&mut data)?;
        Ok(data)
    }
}

macro_rules! impl_serialize_for_int {
    ($($int:ty => $write:ident),+ $(,)?) => {
        $(
            impl BitcoinSerialize for $int {
                fn bitcoin_serialize<W: std::io::Write>(
                    &self,
                    mut target: W,
                ) -> Result<(), std::io::Error> {
                    target.$write::<LittleEndian>(*self)
                }
            }
        )+
    };
}

impl_serialize_for_int! {
    u16 => write_u16,
    u32 => write_u32,
    u64 => write_u64,
    i32 => write_i32,
    i64 => write_i64,
}

// No impl for `u8`: `Vec<u8>` must serialize as a length-prefixed byte string,
// and a `u8` impl would collide with the generic `Vec<T>` impl below.
impl BitcoinSerialize for bool {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        target.write_all(&[*self as u8])
    }
}

impl BitcoinSerialize for DateTime<Utc> {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        use std::convert::TryFrom;
        // Header timestamps are u32 seconds; saturate rather than wrap in 2106.
        let timestamp = u32::try_from(self.timestamp()).unwrap_or(u32::MAX);
        target.write_u32::<LittleEndian>(timestamp)
    }
}

impl BitcoinSerialize for std::net::Ipv6Addr {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        target.write_all(&self.octets())
    }
}

impl BitcoinSerialize for IpAddr {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        // The wire format is always a 16-byte address; v4 goes out mapped.
        match self {
            IpAddr::V4(addr) => addr.to_ipv6_mapped().bitcoin_serialize(&mut target),
            IpAddr::V6(addr) => addr.bitcoin_serialize(&mut target),
        }
    }
}

impl BitcoinSerialize for std::net::SocketAddr {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.ip().bitcoin_serialize(&mut target)?;
        // Ports are the single big-endian field in the protocol.
        target.write_u16::<BigEndian>(self.port())
    }
}

impl BitcoinSerialize for &[u8] {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        target.write_all(self)
    }
}

macro_rules! impl_serialize_for_array {
    ($($len:expr),+ $(,)?) => {
        $(
            impl BitcoinSerialize for [u8; $len] {
                fn bitcoin_serialize<W: std::io::Write>(
                    &self,
                    mut target: W,
                ) -> Result<(), std::io::Error> {
                    target.write_all(self)
                }
            }
        )+
    };
}

impl_serialize_for_array!(4, 12, 16, 20, 32);

impl BitcoinSerialize for Vec<u8> {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        CompactInt::from(self.len()).bitcoin_serialize(&mut target)?;
        target.write_all(self)
    }
}

impl<T> BitcoinSerialize for Vec<T>
where
    T: BitcoinSerialize,
{
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        CompactInt::from(self.len()).bitcoin_serialize(&mut target)?;
        for item in self.iter() {
            item.bitcoin_serialize(&mut target)?;
        }
        Ok(())
    }
}

impl BitcoinSerialize for String {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        CompactInt::from(self.len()).bitcoin_serialize(&mut target)?;
        target.write_all(self.as_bytes())
    }
}

impl<T, U> BitcoinSerialize for (T, U)
where
    T: BitcoinSerialize,
    U: BitcoinSerialize,
{
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.0.bitcoin_serialize(&mut target)?;
        self.1.bitcoin_serialize(&mut target)
    }
}

impl<T> BitcoinSerialize for std::sync::Arc<T>
where
    T: BitcoinSerialize,
{
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        T::bitcoin_serialize(self, target)
    }
}
