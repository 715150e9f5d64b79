use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use heron_chain::parameters::Network;

/// Configuration for the state stores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// The root directory for all persisted state.
    ///
    /// Block files live under `blocks/`, the UTXO tables and journal under
    /// `outputs/`.
    pub data_dir: PathBuf,

    /// The network this state belongs to.
    pub network: Network,

    /// How many blocks below the tip a fully spent UTXO entry must be
    /// before `purge` may evict it.
    pub purge_depth: u32,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>, network: Network) -> Config {
        Config {
            data_dir: data_dir.into(),
            network,
            purge_depth: 1000,
        }
    }

    pub(crate) fn blocks_dir(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    pub(crate) fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }
}
