use serde::{Deserialize, Serialize};

/// The length of the chain back to the genesis block.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Height(pub u32);

impl Height {
    /// The genesis block's height.
    pub const MIN: Height = Height(0);

    /// A sanity bound well above any reachable height.
    pub const MAX: Height = Height(500_000_000 - 1);

    /// The height `count` blocks above `self`, if it stays in range.
    pub fn add(self, count: u32) -> Option<Height> {
        match self.0.checked_add(count) {
            Some(height) if height <= Height::MAX.0 => Some(Height(height)),
            _ => None,
        }
    }

    /// The height `count` blocks below `self`, saturating at genesis.
    pub fn saturating_sub(self, count: u32) -> Height {
        Height(self.0.saturating_sub(count))
    }
}
