//! The shared requested-hash table.
//!
//! One reservation per object: two peers are never asked for the same
//! block or transaction at once. Reservations expire after a few seconds
//! so a slow peer can be routed around, and block requests are bounded
//! globally.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::constants::{MAX_BLOCK_REQUESTS, REQUEST_EXPIRY};
use crate::protocol::external::InventoryHash;

struct Reservation {
    peer: u64,
    at: Instant,
}

/// Who has been asked for what, and when.
pub struct RequestTable {
    entries: Mutex<HashMap<InventoryHash, Reservation>>,
}

impl Default for RequestTable {
    fn default() -> Self {
        RequestTable::new()
    }
}

impl RequestTable {
    pub fn new() -> RequestTable {
        RequestTable {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve `item` for `peer`. Fails if another peer holds a live
    /// reservation; an expired one is taken over.
    pub fn try_reserve(&self, item: InventoryHash, peer: u64, now: Instant) -> bool {
        let mut entries = self.entries.lock().expect("poisoned lock");
        match entries.get(&item) {
            Some(existing)
                if existing.peer != peer
                    && now.duration_since(existing.at) < REQUEST_EXPIRY =>
            {
                false
            }
            _ => {
                entries.insert(item, Reservation { peer, at: now });
                true
            }
        }
    }

    /// Whether a new block request fits under the global in-flight bound.
    pub fn can_request_block(&self, now: Instant) -> bool {
        let entries = self.entries.lock().expect("poisoned lock");
        let in_flight = entries
            .iter()
            .filter(|(item, reservation)| {
                matches!(item, InventoryHash::Block(_))
                    && now.duration_since(reservation.at) < REQUEST_EXPIRY
            })
            .count();
        in_flight < MAX_BLOCK_REQUESTS
    }

    /// Drop the reservation for an object that arrived or was abandoned.
    pub fn release(&self, item: &InventoryHash) {
        self.entries.lock().expect("poisoned lock").remove(item);
    }

    /// Release every reservation held by a departing peer.
    pub fn release_peer(&self, peer: u64) {
        self.entries
            .lock()
            .expect("poisoned lock")
            .retain(|_, reservation| reservation.peer != peer);
    }

    /// Prune expired reservations.
    pub fn expire(&self, now: Instant) {
        self.entries
            .lock()
            .expect("poisoned lock")
            .retain(|_, reservation| now.duration_since(reservation.at) < REQUEST_EXPIRY);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("poisoned lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use heron_chain::block;

    use super::*;

    fn item(fill: u8) -> InventoryHash {
        InventoryHash::Block(block::Hash([fill; 32]))
    }

    #[test]
    fn one_reservation_per_object() {
        heron_test::init();

        let table = RequestTable::new();
        let now = Instant::now();

        assert!(table.try_reserve(item(1), 10, now));
        assert!(!table.try_reserve(item(1), 11, now), "second peer is refused");
        assert!(table.try_reserve(item(1), 10, now), "same peer may refresh");

        // After the expiry another peer takes over.
        let later = now + REQUEST_EXPIRY + Duration::from_millis(1);
        assert!(table.try_reserve(item(1), 11, later));
    }

    #[test]
    fn block_requests_are_bounded_globally() {
        heron_test::init();

        let table = RequestTable::new();
        let now = Instant::now();
        for fill in 0..MAX_BLOCK_REQUESTS {
            assert!(table.can_request_block(now));
            assert!(table.try_reserve(item(fill as u8), 1, now));
        }
        assert!(!table.can_request_block(now));

        table.release(&item(0));
        assert!(table.can_request_block(now));
    }

    #[test]
    fn departing_peers_release_their_reservations() {
        heron_test::init();

        let table = RequestTable::new();
        let now = Instant::now();
        table.try_reserve(item(1), 7, now);
        table.try_reserve(item(2), 7, now);
        table.try_reserve(item(3), 8, now);

        table.release_peer(7);
        assert_eq!(table.len(), 1);
    }
}
