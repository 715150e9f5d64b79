use std::time::Duration;

/// Mempool policy knobs.
#[derive(Clone, Debug)]
pub struct Config {
    /// The minimum accepted fee rate, in satoshis per 1000 bytes.
    pub min_fee_rate: u64,
    /// The fee rate required while the pool is above its watermark.
    pub low_fee_rate: u64,
    /// The byte size above which the pool starts evicting.
    pub size_watermark: usize,
    /// How long a pending transaction may wait for its parents.
    pub pending_expiry: Duration,
    /// How long any transaction may sit in the pool.
    pub pool_expiry: Duration,
    /// How many failed fetch attempts before an announced id is dropped.
    pub max_request_attempts: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            min_fee_rate: 1000,
            low_fee_rate: 2000,
            size_watermark: 100 * 1024 * 1024,
            pending_expiry: Duration::from_secs(60),
            pool_expiry: Duration::from_secs(60 * 60 * 24),
            max_request_attempts: 3,
        }
    }
}
