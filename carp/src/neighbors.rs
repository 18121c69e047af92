//! Neighbor liveness tracking.
//!
//! One entry per known neighbor, keyed by network address. Expiry only ever
//! advances on update, and stale entries are removed by explicit purge
//! passes rather than eagerly during reads: a read between the expiry
//! instant and the next purge sees the entry but reports it as not live.

use alloc::collections::BTreeMap;

use crate::time::{Duration, Timestamp};
use crate::traits::LinkResolver;
use crate::types::{LinkAddress, NodeAddress, LINK_ADDRESS_UNKNOWN, MAX_NEIGHBORS};

/// A single tracked neighbor.
#[derive(Clone, Copy, Debug)]
pub struct NeighborEntry {
    /// Link-layer address, [`LINK_ADDRESS_UNKNOWN`] until resolved.
    pub link_address: LinkAddress,
    /// Instant after which this entry is stale.
    pub expire_at: Timestamp,
    /// Last observed quality of the link from this neighbor, quantized to
    /// 1/255 steps. Zero until a reception carries a quality figure.
    pub link_quality: u8,
}

/// Table of known neighbors and their liveness.
///
/// A `BTreeMap` keeps iteration order deterministic, which matters for
/// reproducible simulation runs.
#[derive(Clone, Debug, Default)]
pub struct NeighborTable {
    entries: BTreeMap<NodeAddress, NeighborEntry>,
}

impl NeighborTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity from a neighbor, extending its liveness.
    ///
    /// The expiry becomes `max(current, now + lifetime)`: updates never
    /// rewind liveness. New entries attempt link-address resolution; a
    /// failed resolution leaves the sentinel in place and is retried on
    /// the next update. Inserting beyond [`MAX_NEIGHBORS`] is refused.
    pub fn update<L: LinkResolver>(
        &mut self,
        addr: NodeAddress,
        lifetime: Duration,
        now: Timestamp,
        resolver: &mut L,
    ) {
        let candidate = now.saturating_add(lifetime);
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.expire_at = entry.expire_at.max(candidate);
            if entry.link_address == LINK_ADDRESS_UNKNOWN {
                if let Some(link) = resolver.resolve(addr) {
                    entry.link_address = link;
                }
            }
            return;
        }

        if self.entries.len() >= MAX_NEIGHBORS {
            return;
        }
        let link_address = resolver.resolve(addr).unwrap_or(LINK_ADDRESS_UNKNOWN);
        self.entries.insert(
            addr,
            NeighborEntry {
                link_address,
                expire_at: candidate,
                link_quality: 0,
            },
        );
    }

    /// Record an observed link quality for a neighbor already in the table.
    pub fn observe_link_quality(&mut self, addr: NodeAddress, quality: u8) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.link_quality = quality;
        }
    }

    /// Whether the address is a live neighbor at `now`.
    ///
    /// An unpurged stale entry is present but not live.
    pub fn is_neighbor(&self, addr: NodeAddress, now: Timestamp) -> bool {
        self.entries
            .get(&addr)
            .is_some_and(|entry| entry.expire_at > now)
    }

    /// Whether an entry exists at all, live or stale.
    pub fn contains(&self, addr: NodeAddress) -> bool {
        self.entries.contains_key(&addr)
    }

    /// Remaining liveness for a neighbor, zero if absent or already stale.
    pub fn expire_time(&self, addr: NodeAddress, now: Timestamp) -> Duration {
        self.entries
            .get(&addr)
            .map(|entry| entry.expire_at.saturating_sub(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Get a neighbor's entry.
    pub fn get(&self, addr: NodeAddress) -> Option<&NeighborEntry> {
        self.entries.get(&addr)
    }

    /// Remove every entry whose expiry has passed.
    ///
    /// Safe to call at any time; returns the number of removed entries.
    pub fn purge(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expire_at > now);
        before - self.entries.len()
    }

    /// Number of tracked entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = &NodeAddress> {
        self.entries.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_impls::{DerivedResolver, MockResolver};
    use crate::traits::LinkResolver;

    const LIFETIME: Duration = Duration::from_secs(90);

    #[test]
    fn test_insert_and_query() {
        let mut table = NeighborTable::new();
        let mut resolver = DerivedResolver;
        let now = Timestamp::ZERO;

        table.update(10, LIFETIME, now, &mut resolver);
        assert!(table.is_neighbor(10, now));
        assert!(!table.is_neighbor(11, now));
        assert_eq!(table.expire_time(10, now), LIFETIME);
        assert_eq!(table.expire_time(11, now), Duration::ZERO);
    }

    #[test]
    fn test_expiry_never_rewinds() {
        let mut table = NeighborTable::new();
        let mut resolver = DerivedResolver;

        // Long lifetime first, then a shorter one at the same instant:
        // the earlier expiry must win the max and stay put.
        table.update(10, Duration::from_secs(100), Timestamp::ZERO, &mut resolver);
        table.update(10, Duration::from_secs(10), Timestamp::ZERO, &mut resolver);
        assert_eq!(
            table.expire_time(10, Timestamp::ZERO),
            Duration::from_secs(100)
        );

        // A later update with a lifetime that extends past the current
        // expiry advances it.
        let later = Timestamp::from_secs(50);
        table.update(10, Duration::from_secs(100), later, &mut resolver);
        assert_eq!(table.expire_time(10, later), Duration::from_secs(100));
    }

    #[test]
    fn test_stale_entry_present_until_purged() {
        let mut table = NeighborTable::new();
        let mut resolver = DerivedResolver;

        table.update(10, Duration::from_secs(1), Timestamp::ZERO, &mut resolver);
        let after = Timestamp::from_secs(2);

        // Stale but unpurged: present, not live, zero remaining.
        assert!(table.contains(10));
        assert!(!table.is_neighbor(10, after));
        assert_eq!(table.expire_time(10, after), Duration::ZERO);

        assert_eq!(table.purge(after), 1);
        assert!(!table.contains(10));
        assert_eq!(table.purge(after), 0);
    }

    #[test]
    fn test_unresolved_link_retried() {
        let mut table = NeighborTable::new();
        let mut resolver = MockResolver::new();

        table.update(10, LIFETIME, Timestamp::ZERO, &mut resolver);
        assert_eq!(table.get(10).unwrap().link_address, LINK_ADDRESS_UNKNOWN);

        // Resolution becomes possible later; the next update picks it up.
        resolver.insert(10, [1, 2, 3, 4, 5, 6]);
        table.update(10, LIFETIME, Timestamp::from_secs(1), &mut resolver);
        assert_eq!(table.get(10).unwrap().link_address, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_one_entry_per_address() {
        let mut table = NeighborTable::new();
        let mut resolver = DerivedResolver;

        for _ in 0..5 {
            table.update(10, LIFETIME, Timestamp::ZERO, &mut resolver);
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let mut table = NeighborTable::new();
        let mut resolver = DerivedResolver;

        for addr in 0..(MAX_NEIGHBORS as u32 + 10) {
            table.update(addr, LIFETIME, Timestamp::ZERO, &mut resolver);
        }
        assert_eq!(table.len(), MAX_NEIGHBORS);
        // Existing entries still update past the bound.
        table.update(0, LIFETIME, Timestamp::from_secs(1), &mut resolver);
        assert!(table.is_neighbor(0, Timestamp::from_secs(1)));
    }

    #[test]
    fn test_link_quality_observation() {
        let mut table = NeighborTable::new();
        let mut resolver = DerivedResolver;

        // Observations for unknown neighbors are dropped.
        table.observe_link_quality(10, 200);
        assert!(table.get(10).is_none());

        table.update(10, LIFETIME, Timestamp::ZERO, &mut resolver);
        assert_eq!(table.get(10).unwrap().link_quality, 0);
        table.observe_link_quality(10, 200);
        assert_eq!(table.get(10).unwrap().link_quality, 200);
    }

    #[test]
    fn test_resolver_trait_object_compat() {
        // The table only needs the trait, not a concrete resolver.
        fn update_via<R: LinkResolver>(table: &mut NeighborTable, r: &mut R) {
            table.update(7, LIFETIME, Timestamp::ZERO, r);
        }
        let mut table = NeighborTable::new();
        update_via(&mut table, &mut DerivedResolver);
        assert!(table.contains(7));
    }
}
