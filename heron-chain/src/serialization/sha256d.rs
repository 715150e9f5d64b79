//! The double-SHA-256 digest that names blocks and transactions.

use std::io;

use sha2::{Digest, Sha256};

/// A write-through adapter that computes SHA-256(SHA-256(written bytes)).
///
/// Serializing a structure into this writer and calling [`Writer::finish`]
/// yields its consensus identity without an intermediate allocation.
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl Writer {
    /// Consume the writer and return the double-SHA-256 of everything written.
    pub fn finish(self) -> [u8; 32] {
        let first_round = self.hash.finalize();
        let result = Sha256::digest(first_round.as_slice());
        let mut buffer = [0u8; 32];
        buffer.copy_from_slice(result.as_slice());
        buffer
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Double-SHA-256 of a byte slice, in one call.
pub fn digest(data: &[u8]) -> [u8; 32] {
    use io::Write;

    let mut writer = Writer::default();
    writer
        .write_all(data)
        .expect("writing to a digest never fails");
    writer.finish()
}

/// A 4-byte checksum using truncated double-SHA-256 (two rounds of SHA-256).
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Checksum(pub [u8; 4]);

impl<'a> From<&'a [u8]> for Checksum {
    fn from(bytes: &'a [u8]) -> Self {
        let hash = digest(bytes);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&hash[0..4]);
        Self(checksum)
    }
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Checksum")
            .field(&hex::encode(self.0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_payload() {
        // sha256d("") = 5df6e0e2761359d30a8275058e299fcc...; verack uses this.
        assert_eq!(Checksum::from(&b""[..]).0, [0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn digest_matches_known_vector() {
        // sha256d("hello") from the Bitcoin wiki examples.
        let expected =
            hex::decode("9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50")
                .unwrap();
        assert_eq!(&digest(b"hello")[..], &expected[..]);
    }
}
