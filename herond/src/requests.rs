//! The authenticated local query channel.
//!
//! A line-oriented, length-prefixed command protocol on a separate TCP
//! port, for local tooling. Authentication is challenge/response over
//! quantized time: the server accepts a signature over any of five
//! SHA-256 digests of the current 10-second-quantized Unix time (from
//! thirty seconds back to ten ahead), checks it against the public keys in
//! the data directory's `keys` file, and proves its own identity by
//! counter-signing the accepted digest with the key in `.private_key`.

use std::convert::TryFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use heron_chain::amount::Amount;
use heron_chain::block::Height;
use heron_chain::keys::{PublicKey, SecretKey, Signature};
use heron_chain::transparent::Address;
use heron_consensus::Chain;
use heron_mempool::Mempool;

/// Longest frame in either direction; responses are truncated to fit the
/// u16 length prefix.
const MAX_FRAME: usize = 60_000;

/// The query channel server.
pub struct RequestChannel {
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    data_dir: PathBuf,
}

impl RequestChannel {
    pub fn new(chain: Arc<Chain>, mempool: Arc<Mempool>, data_dir: PathBuf) -> RequestChannel {
        RequestChannel {
            chain,
            mempool,
            data_dir,
        }
    }

    /// Serve connections on the loopback interface until shutdown.
    pub async fn serve(
        self: Arc<Self>,
        port: u16,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        info!(port, "query channel listening");
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            let (stream, addr) = listener.accept().await?;
            debug!(%addr, "query channel connection");
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(error) = server.handle(stream).await {
                    debug!(%error, "query channel connection ended");
                }
            });
        }
    }

    /// The five acceptable challenge digests right now.
    fn challenge_digests() -> Vec<[u8; 32]> {
        let now = chrono::Utc::now().timestamp();
        let quantized = now - now.rem_euclid(10);
        (-3..=1)
            .map(|step| {
                let value = (quantized + step * 10) as u32;
                let digest = Sha256::digest(&value.to_le_bytes());
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(digest.as_slice());
                bytes
            })
            .collect()
    }

    /// The authorized client keys: hex-encoded public keys, one per line.
    fn authorized_keys(&self) -> std::io::Result<Vec<PublicKey>> {
        let text = std::fs::read_to_string(self.data_dir.join("keys"))?;
        Ok(text
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                hex::decode(line)
                    .ok()
                    .and_then(|bytes| PublicKey::from_slice(&bytes).ok())
            })
            .collect())
    }

    /// The server's identity key, from `.private_key`.
    fn identity_key(&self) -> std::io::Result<SecretKey> {
        let text = std::fs::read_to_string(self.data_dir.join(".private_key"))?;
        let bytes = hex::decode(text.trim())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad key hex"))?;
        SecretKey::from_slice(&bytes)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad key bytes"))
    }

    async fn handle(&self, mut stream: TcpStream) -> std::io::Result<()> {
        // --- authentication ---------------------------------------------
        let signature_bytes = read_frame(&mut stream).await?;
        let signature = match Signature::from_der(&signature_bytes, true) {
            Ok(signature) => signature,
            Err(_) => {
                warn!("query channel: unparseable signature");
                return Ok(());
            }
        };

        let digests = Self::challenge_digests();
        let keys = self.authorized_keys()?;
        let accepted = digests.iter().find(|digest| {
            keys.iter()
                .any(|key| key.verify(digest, &signature).is_ok())
        });
        let accepted = match accepted {
            Some(digest) => *digest,
            None => {
                warn!("query channel: signature matched no authorized key");
                return Ok(());
            }
        };

        // Prove our identity over the digest the client chose.
        let identity = self.identity_key()?;
        let reply = identity.sign(&accepted).serialize_der();
        write_frame(&mut stream, &reply).await?;
        debug!("query channel client authenticated");

        // --- command loop -----------------------------------------------
        loop {
            let frame = match read_frame(&mut stream).await {
                Ok(frame) => frame,
                Err(_) => return Ok(()),
            };
            let line = String::from_utf8_lossy(&frame);
            let response = self.dispatch(line.trim());
            write_frame(&mut stream, response.as_bytes()).await?;
        }
    }

    fn dispatch(&self, line: &str) -> String {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        match command {
            "stat" => self.cmd_stat(),
            "addr" => match parts.next() {
                Some(address) => self.cmd_addr(address),
                None => "error: addr <base58>".to_string(),
            },
            "blkd" => match (parse(parts.next()), parse(parts.next())) {
                (Some(height), Some(count)) => self.cmd_block_details(height, count),
                _ => "error: blkd <height> <count>".to_string(),
            },
            "bkst" => match (parse(parts.next()), parse(parts.next())) {
                (Some(height), Some(hours)) => self.cmd_block_stats(height, hours),
                _ => "error: bkst <height> <hours>".to_string(),
            },
            "trxn" => self.cmd_transactions(),
            "head" => self.cmd_header(),
            "blok" => self.cmd_block(),
            "blkn" => self.cmd_block_number(),
            _ => format!("error: unknown command {:?}", command),
        }
    }

    fn cmd_stat(&self) -> String {
        let (height, hash) = self.chain.tip();
        format!(
            "stat: height {} hash {} headers {} mempool {} txns / {} bytes",
            height.0,
            hash,
            self.chain.header_height().0,
            self.mempool.count(),
            self.mempool.total_size(),
        )
    }

    fn cmd_addr(&self, address: &str) -> String {
        let address: Address = match address.parse() {
            Ok(address) => address,
            Err(_) => return "error: unparseable address".to_string(),
        };
        let outputs = self
            .chain
            .utxo()
            .outputs_for_script(&address.lock_script());

        let mut unspent_total = 0u64;
        let mut lines = Vec::new();
        for (outpoint, output, spent) in outputs {
            match spent {
                Some(height) => lines.push(format!(
                    "  {}:{} {} spent at {}",
                    outpoint.hash, outpoint.index, output.value, height.0
                )),
                None => {
                    unspent_total += output.value.satoshis();
                    lines.push(format!(
                        "  {}:{} {} unspent",
                        outpoint.hash, outpoint.index, output.value
                    ));
                }
            }
        }
        let balance = Amount::try_from(unspent_total)
            .map(|amount| amount.to_string())
            .unwrap_or_else(|_| unspent_total.to_string());
        format!("addr: {} balance {}\n{}", address, balance, lines.join("\n"))
    }

    fn cmd_block_details(&self, height: u32, count: u32) -> String {
        let mut lines = Vec::new();
        for height in height..height.saturating_add(count.min(100)) {
            match self.chain.store().block_at(Height(height)) {
                Ok(block) => lines.push(format!(
                    "blkd: {} {} {} txns {} bytes",
                    height,
                    block.hash(),
                    block.transactions.len(),
                    block.serialized_size(),
                )),
                Err(_) => break,
            }
        }
        lines.join("\n")
    }

    fn cmd_block_stats(&self, start: u32, hours: u32) -> String {
        let (tip, _) = self.chain.tip();
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours as i64);

        let mut blocks = 0u32;
        let mut bytes = 0usize;
        let mut transactions = 0usize;
        for height in start..=tip.0 {
            match self.chain.store().block_at(Height(height)) {
                Ok(block) if block.header.time >= cutoff => {
                    blocks += 1;
                    bytes += block.serialized_size();
                    transactions += block.transactions.len();
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        format!(
            "bkst: {} blocks {} txns {} bytes since {} hours",
            blocks, transactions, bytes, hours
        )
    }

    fn cmd_transactions(&self) -> String {
        let ids = self.mempool.ready_ids();
        let mut lines = vec![format!("trxn: {} entries", ids.len())];
        for id in ids.into_iter().take(500) {
            lines.push(format!("  {}", id));
        }
        lines.join("\n")
    }

    fn cmd_header(&self) -> String {
        let (height, hash) = self.chain.tip();
        match self.chain.store().header_at(height) {
            Ok(header) => format!(
                "head: {} {} version {} time {} bits {:#010x}",
                height.0,
                hash,
                header.version,
                header.time.timestamp(),
                header.difficulty_threshold.bits(),
            ),
            Err(error) => format!("error: {}", error),
        }
    }

    fn cmd_block(&self) -> String {
        let (height, _) = self.chain.tip();
        self.cmd_block_details(height.0, 1)
    }

    fn cmd_block_number(&self) -> String {
        let (height, _) = self.chain.tip();
        format!("blkn: {}", height.0)
    }
}

fn parse(part: Option<&str>) -> Option<u32> {
    part.and_then(|part| part.parse().ok())
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u16_le().await? as usize;
    if len > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await?;
    Ok(frame)
}

async fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> std::io::Result<()> {
    let frame = &frame[..frame.len().min(MAX_FRAME)];
    stream.write_u16_le(frame.len() as u16).await?;
    stream.write_all(frame).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_digests_cover_the_window() {
        heron_test::init();

        let digests = RequestChannel::challenge_digests();
        assert_eq!(digests.len(), 5);
        // All distinct: five different quantized times.
        let unique: std::collections::HashSet<_> = digests.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn client_signature_verifies_against_a_challenge() {
        heron_test::init();

        let client = SecretKey::from_slice(&[0x71; 32]).unwrap();
        let digests = RequestChannel::challenge_digests();
        let signature = client.sign(&digests[3]);

        let accepted = digests.iter().find(|digest| {
            client.public_key().verify(digest, &signature).is_ok()
        });
        assert_eq!(accepted, Some(&digests[3]));
    }
}
