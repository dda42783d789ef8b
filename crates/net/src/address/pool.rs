//! Bounded circular buffer of `AddressItem` plus a reserved-authority set
//! (spec §3 "Address pool", §4.9 "Hosts"). All operations are strand-guarded
//! by virtue of being called only from `Net`'s network strand — the type
//! itself is a plain (non-async-aware) data structure behind a lock so it
//! can also be unit-tested without a strand.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;

use rand::Rng;
use tokio::sync::Mutex;

use super::{AddressItem, Authority};
use crate::error::Code;

/// The subset of settings (spec §6) that govern which addresses the pool
/// will accept at load or at save time.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    pub enable_ipv6: bool,
    pub enable_loopback: bool,
    pub services_minimum: u64,
    pub services_maximum: u64,
    pub invalid_services: u64,
    pub manual: Vec<Authority>,
    pub blacklist: Vec<IpAddr>,
    pub whitelist: Vec<IpAddr>,
}

impl FilterPolicy {
    pub fn permits(&self, item: &AddressItem) -> bool {
        if item.authority.is_unspecified() {
            return false;
        }
        if item.authority.is_ipv6() && !self.enable_ipv6 {
            return false;
        }
        if item.authority.is_loopback() && !self.enable_loopback {
            return false;
        }
        if item.services & self.services_minimum != self.services_minimum {
            return false;
        }
        if item.services & !self.services_maximum != 0 {
            return false;
        }
        if item.services & self.invalid_services != 0 {
            return false;
        }
        if self.manual.contains(&item.authority) {
            return false;
        }
        let ip = item.authority.ip();
        if self.blacklist.contains(&ip) {
            return false;
        }
        if !self.whitelist.is_empty() && !self.whitelist.contains(&ip) {
            return false;
        }
        true
    }
}

struct Inner {
    buffer: VecDeque<AddressItem>,
    reserved: HashSet<Authority>,
    capacity: usize,
}

pub struct Hosts {
    inner: Mutex<Inner>,
    policy: FilterPolicy,
}

impl Hosts {
    pub fn new(capacity: usize, policy: FilterPolicy) -> Self {
        Hosts {
            inner: Mutex::new(Inner {
                buffer: VecDeque::with_capacity(capacity),
                reserved: HashSet::new(),
                capacity,
            }),
            policy,
        }
    }

    /// Loads the pool from a file in `authority/timestamp/services` format
    /// (spec §6), dropping lines the filter policy rejects. Missing files
    /// are treated as an empty pool, matching "process start with no prior
    /// state" rather than an error.
    pub async fn load(&self, contents: &str) {
        let mut inner = self.inner.lock().await;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(item) = AddressItem::parse_line(line)
                && self.policy.permits(&item)
                && !inner.buffer.iter().any(|e| e.authority == item.authority)
            {
                Self::push_bounded(&mut inner, item);
            }
        }
    }

    /// Serialises the pool back to the file format. An empty pool returns
    /// `None`, signalling the caller should delete the file (spec §6).
    pub async fn save_to_text(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        if inner.buffer.is_empty() {
            return None;
        }
        Some(
            inner
                .buffer
                .iter()
                .map(|item| item.to_line())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    fn push_bounded(inner: &mut Inner, item: AddressItem) {
        if inner.buffer.len() == inner.capacity && inner.capacity > 0 {
            inner.buffer.pop_front(); // I1: newest push evicts oldest
        }
        if inner.capacity > 0 {
            inner.buffer.push_back(item);
        }
    }

    /// Pops the first non-reserved entry. `AddressNotFound` once the pool
    /// is drained of eligible entries.
    pub async fn take(&self) -> Result<AddressItem, Code> {
        let mut inner = self.inner.lock().await;
        let position = inner
            .buffer
            .iter()
            .position(|item| !inner.reserved.contains(&item.authority));
        match position {
            Some(idx) => Ok(inner.buffer.remove(idx).expect("index just located")),
            None => Err(Code::AddressNotFound),
        }
    }

    /// Pushes `item` back, replacing a pre-existing matching entry if one
    /// is present (same authority, possibly stale timestamp/services).
    pub async fn restore(&self, item: AddressItem) {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .buffer
            .iter_mut()
            .find(|e| e.authority == item.authority)
        {
            *existing = item;
        } else {
            Self::push_bounded(&mut inner, item);
        }
    }

    /// Copies up to `max_address` items starting at a random index, where
    /// the count is `min(max_address, |pool| / rand(lower..upper))` (spec
    /// §4.9 `fetch`).
    pub async fn fetch(&self, max_address: usize, lower: u32, upper: u32) -> Vec<AddressItem> {
        let inner = self.inner.lock().await;
        if inner.buffer.is_empty() {
            return Vec::new();
        }
        let divisor = if upper > lower {
            rand::rng().random_range(lower..upper).max(1)
        } else {
            lower.max(1)
        };
        let count = max_address.min(inner.buffer.len() / divisor as usize).max(0);
        if count == 0 {
            return Vec::new();
        }
        let start = rand::rng().random_range(0..inner.buffer.len());
        (0..count)
            .map(|i| inner.buffer[(start + i) % inner.buffer.len()])
            .collect()
    }

    /// Accepts each item not already reserved/pooled and permitted by the
    /// filter policy; returns the number accepted (spec §4.9 `save`).
    pub async fn save(&self, items: &[AddressItem]) -> usize {
        let mut accepted = 0;
        let mut inner = self.inner.lock().await;
        for item in items {
            if !self.policy.permits(item) {
                continue;
            }
            if inner.reserved.contains(&item.authority) {
                continue;
            }
            if inner.buffer.iter().any(|e| e.authority == item.authority) {
                continue;
            }
            Self::push_bounded(&mut inner, *item);
            accepted += 1;
        }
        accepted
    }

    pub async fn reserve(&self, authority: Authority) -> bool {
        self.inner.lock().await.reserved.insert(authority)
    }

    pub async fn unreserve(&self, authority: Authority) -> bool {
        self.inner.lock().await.reserved.remove(&authority)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.buffer.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::nth_address_item as item;

    fn permissive_policy() -> FilterPolicy {
        FilterPolicy {
            enable_ipv6: true,
            enable_loopback: true,
            services_minimum: 0,
            services_maximum: u64::MAX,
            invalid_services: 0,
            manual: Vec::new(),
            blacklist: Vec::new(),
            whitelist: Vec::new(),
        }
    }

    #[tokio::test]
    async fn take_skips_reserved_entries() {
        let hosts = Hosts::new(10, permissive_policy());
        hosts.restore(item(1)).await;
        hosts.restore(item(2)).await;
        hosts.reserve(item(1).authority).await;
        let taken = hosts.take().await.unwrap();
        assert_eq!(taken.authority, item(2).authority);
    }

    #[tokio::test]
    async fn take_on_drained_pool_is_address_not_found() {
        let hosts = Hosts::new(10, permissive_policy());
        assert_eq!(hosts.take().await.unwrap_err(), Code::AddressNotFound);
    }

    #[tokio::test]
    async fn newest_push_evicts_oldest_at_capacity() {
        let hosts = Hosts::new(2, permissive_policy());
        hosts.restore(item(1)).await;
        hosts.restore(item(2)).await;
        hosts.restore(item(3)).await;
        assert_eq!(hosts.len().await, 2);
        assert_eq!(hosts.take().await.unwrap().authority, item(2).authority);
    }

    #[tokio::test]
    async fn save_rejects_services_above_the_maximum() {
        let mut policy = permissive_policy();
        policy.services_maximum = 0b0001; // only bit 0 is a recognised service
        let hosts = Hosts::new(10, policy);
        let mut unsupported = item(1);
        unsupported.services = 0b0010; // a bit the node does not recognise
        let accepted = hosts.save(&[unsupported]).await;
        assert_eq!(accepted, 0);
        assert_eq!(hosts.len().await, 0);
    }

    #[tokio::test]
    async fn save_rejects_unspecified_addresses() {
        let hosts = Hosts::new(10, permissive_policy());
        let wildcard = AddressItem::new("0.0.0.0:0".parse().unwrap(), 111, 1);
        let accepted = hosts.save(&[wildcard]).await;
        assert_eq!(accepted, 0);
        assert_eq!(hosts.len().await, 0);
    }

    #[tokio::test]
    async fn save_rejects_blacklisted_and_duplicate_entries() {
        let mut policy = permissive_policy();
        policy.blacklist.push(item(9).authority.ip());
        let hosts = Hosts::new(10, policy);
        hosts.restore(item(1)).await;
        let accepted = hosts.save(&[item(1), item(2), item(9)]).await;
        assert_eq!(accepted, 1); // item(1) duplicate, item(9) blacklisted
        assert_eq!(hosts.len().await, 2);
    }

    #[tokio::test]
    async fn empty_pool_serializes_to_none() {
        let hosts = Hosts::new(10, permissive_policy());
        assert!(hosts.save_to_text().await.is_none());
    }

    /// R2: loading a pool file then saving it back yields the same set of
    /// `(authority, timestamp, services)` triples as the input (order may
    /// differ since `load` appends in file order but `save_to_text` walks
    /// the ring buffer from its current head).
    #[tokio::test]
    async fn load_then_save_round_trips_as_a_set() {
        let input = "10.0.0.1:8333/111/1\n10.0.0.2:8333/222/3\n10.0.0.3:8333/0/0";
        let hosts = Hosts::new(10, permissive_policy());
        hosts.load(input).await;
        let output = hosts.save_to_text().await.unwrap();

        let mut expected: Vec<_> = input.lines().map(|l| l.trim().to_string()).collect();
        let mut actual: Vec<_> = output.lines().map(|l| l.to_string()).collect();
        expected.sort();
        actual.sort();
        assert_eq!(expected, actual);
    }

    /// S5: an empty pool with `host_pool_capacity` large enough, fed a
    /// single seed response of 200 valid (non-blacklisted) addresses,
    /// reaches the `minimum_address_count = 100` sufficiency threshold
    /// after one `save`.
    #[tokio::test]
    async fn save_reaches_seed_sufficiency_threshold() {
        const MINIMUM_ADDRESS_COUNT: usize = 100;
        let hosts = Hosts::new(256, permissive_policy());
        let batch: Vec<_> = (0..200).map(item).collect();
        let accepted = hosts.save(&batch).await;
        assert_eq!(accepted, 200);
        assert!(hosts.len().await >= MINIMUM_ADDRESS_COUNT);
    }
}
