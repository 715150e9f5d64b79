use std::io;
use std::io::Read;
use std::net::{
    IpAddr::{V4, V6},
    Ipv6Addr, SocketAddr,
};
use std::sync::Arc;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use super::{CompactInt, SerializationError};

type Result<R> = std::result::Result<R, SerializationError>;

/// Preallocation cap for length-prefixed collections. A peer that claims a
/// billion entries must actually send them before we reserve the memory.
const BLIND_ALLOC_LIMIT: usize = 1024;

pub trait BitcoinDeserialize {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self>
    where
        Self: Sized;
}

/// Helper for deserializing more succinctly via type inference.
pub trait BitcoinDeserializeInto {
    /// Deserialize based on type inference.
    fn bitcoin_deserialize_into<T>(self) -> Result<T>
    where
        T: BitcoinDeserialize;
}

impl<R: io::Read> BitcoinDeserializeInto for R {
    fn bitcoin_deserialize_into<T>(self) -> Result<T>
    where
        T: BitcoinDeserialize,
    {
        T::bitcoin_deserialize(self)
    }
}

macro_rules! impl_deserialize_for_int {
    ($($int:ty => $read:ident),+ $(,)?) => {
        $(
            impl BitcoinDeserialize for $int {
                fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<$int> {
                    Ok(reader.$read::<LittleEndian>()?)
                }
            }
        )+
    };
}

impl_deserialize_for_int! {
    u16 => read_u16,
    u32 => read_u32,
    u64 => read_u64,
    i32 => read_i32,
    i64 => read_i64,
}

impl BitcoinDeserialize for u8 {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<u8> {
        Ok(reader.read_u8()?)
    }
}

impl BitcoinDeserialize for bool {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<bool> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SerializationError::Parse("invalid bool")),
        }
    }
}

macro_rules! impl_deserialize_for_array {
    ($($len:expr),+ $(,)?) => {
        $(
            impl BitcoinDeserialize for [u8; $len] {
                fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<[u8; $len]> {
                    let mut bytes = [0u8; $len];
                    reader.read_exact(&mut bytes)?;
                    Ok(bytes)
                }
            }
        )+
    };
}

impl_deserialize_for_array!(4, 12, 16, 20, 32);

impl BitcoinDeserialize for DateTime<Utc> {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<DateTime<Utc>> {
        Ok(Utc.timestamp(reader.read_u32::<LittleEndian>()? as i64, 0))
    }
}

impl<T> BitcoinDeserialize for Vec<T>
where
    T: BitcoinDeserialize,
{
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Vec<T>> {
        let len = CompactInt::bitcoin_deserialize(&mut reader)?.value() as usize;
        let mut result = Vec::with_capacity(std::cmp::min(len, BLIND_ALLOC_LIMIT));
        for _ in 0..len {
            result.push(T::bitcoin_deserialize(&mut reader)?);
        }
        Ok(result)
    }
}

impl BitcoinDeserialize for String {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<String> {
        let len = CompactInt::bitcoin_deserialize(&mut reader)?.value() as usize;
        let mut buf = Vec::with_capacity(std::cmp::min(len, BLIND_ALLOC_LIMIT));
        (&mut reader).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() < len {
            return Err(SerializationError::Parse("string shorter than its length"));
        }
        String::from_utf8(buf).map_err(|_| SerializationError::Parse("invalid utf-8"))
    }
}

impl BitcoinDeserialize for SocketAddr {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<SocketAddr> {
        let octets = <[u8; 16]>::bitcoin_deserialize(&mut reader)?;
        let v6_addr = Ipv6Addr::from(octets);

        let addr = match v6_addr.to_ipv4() {
            Some(v4_addr) => V4(v4_addr),
            None => V6(v6_addr),
        };
        Ok(SocketAddr::from((addr, reader.read_u16::<BigEndian>()?)))
    }
}

impl<T, U> BitcoinDeserialize for (T, U)
where
    T: BitcoinDeserialize,
    U: BitcoinDeserialize,
{
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<(T, U)> {
        Ok((
            T::bitcoin_deserialize(&mut reader)?,
            U::bitcoin_deserialize(&mut reader)?,
        ))
    }
}

impl<T> BitcoinDeserialize for Arc<T>
where
    T: BitcoinDeserialize,
{
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Arc<T>> {
        Ok(Arc::new(T::bitcoin_deserialize(reader)?))
    }
}
