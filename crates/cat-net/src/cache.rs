//! Response cache — deduplicates confirmable/non-confirmable requests.
//!
//! Keyed by `(remote, mid)` (the reference stores this as the string
//! `"resp-<remote>-<mid>"`; here the tuple is the key directly — the same
//! `DashMap` sharding used elsewhere in this workspace for per-remote
//! tables gives the same insert-if-absent, lock-free-read properties
//! without needing a string key). Entries expire after Exchange Lifetime
//! (247s, RFC 7252 §4.8.2).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Clone)]
struct Entry {
    response: Vec<u8>,
    stored_at: Instant,
}

/// Per-connection (or per-server) response cache.
pub struct ResponseCache {
    entries: DashMap<(SocketAddr, u16), Entry>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        ResponseCache {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Look up a cached response for `(remote, mid)`. Returns `None` if
    /// absent or past its TTL (an expired entry is not proactively
    /// removed here — `evict_expired` handles that on the periodic tick,
    /// mirroring the reference's separate cache-flush pass).
    pub fn get(&self, remote: SocketAddr, mid: u16) -> Option<Vec<u8>> {
        let entry = self.entries.get(&(remote, mid))?;
        if entry.stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.response.clone())
    }

    /// Insert a response iff the key is absent (insert-if-absent
    /// semantics: at most one stored entry per key. Returns
    /// `false` if an entry was already present.
    pub fn insert_if_absent(&self, remote: SocketAddr, mid: u16, response: Vec<u8>) -> bool {
        use dashmap::mapref::entry::Entry as DashEntry;
        match self.entries.entry((remote, mid)) {
            DashEntry::Occupied(_) => false,
            DashEntry::Vacant(slot) => {
                slot.insert(Entry {
                    response,
                    stored_at: Instant::now(),
                });
                true
            }
        }
    }

    /// Drop every entry older than the TTL. Called from the periodic
    /// expirer alongside `CheckExpirations`.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
