//! Message-ID handler table: tracks outstanding confirmable sends awaiting
//! an Acknowledgement/Reset, and drives their retransmission.
//!
//! Ported from `ascon/connection/midelement.go` + the `checkMidHandlerContainer`
//! retransmit loop in `ascon/connection/conn.go`.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;

use cat_core::Message;

/// One outstanding confirmable exchange. Owns a clone of the message it
/// sent, for byte-identical retransmission, and a one-shot completion
/// channel resolved when a matching Acknowledgement/Reset arrives.
pub struct MidEntry {
    message: Message,
    start: Instant,
    deadline: Option<Instant>,
    retransmit_count: u32,
    completion: Option<oneshot::Sender<Message>>,
}

impl MidEntry {
    pub fn new(message: Message, deadline: Option<Instant>, completion: oneshot::Sender<Message>) -> Self {
        MidEntry {
            message,
            start: Instant::now(),
            deadline,
            retransmit_count: 0,
            completion: Some(completion),
        }
    }

    /// `IsExpired`: either the per-request deadline has passed, or the
    /// retransmit budget is exhausted.
    pub fn is_expired(&self, now: Instant, max_retransmit: u32) -> bool {
        if let Some(deadline) = self.deadline {
            if now > deadline {
                return true;
            }
        }
        self.retransmit_count >= max_retransmit
    }

    /// `Retransmit`: `now > start + ack_timeout * (retransmit_count + 1)`.
    pub fn due_for_retransmit(&self, now: Instant, ack_timeout: Duration) -> bool {
        now > self.start + ack_timeout * (self.retransmit_count + 1)
    }

    /// Clone of the message to resend, bumping the retransmit counter.
    pub fn retransmit_message(&mut self) -> Message {
        self.retransmit_count += 1;
        self.message.clone()
    }

    /// Complete this entry's waiting caller with the matching response.
    pub fn resolve(mut self, response: Message) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(response);
        }
    }
}

/// Table of outstanding mid-handler entries for one connection.
pub struct MidTable {
    entries: DashMap<u16, MidEntry>,
}

/// Per-mid serialization, so a second datagram carrying the same MID
/// can't be dispatched to the handler before the first one has finished
/// (and cached) its response. Ported from `msgIDMutex`, the `MutexMap`
/// `handleReq` locks around the response-cache lookup and dispatch.
///
/// Keyed only by `mid` — a `MidLock` lives on one [`super::Connection`],
/// already scoped to a single remote, so `(remote, mid)` collapses to
/// just `mid` here. The table never evicts: its key space is bounded by
/// `u16`, so it can grow to at most 65536 tiny mutexes for the lifetime
/// of a connection.
pub struct MidLock {
    table: DashMap<u16, std::sync::Arc<tokio::sync::Mutex<()>>>,
}

impl MidLock {
    pub fn new() -> Self {
        MidLock { table: DashMap::new() }
    }

    /// Acquire the lock for `mid`, creating its mutex on first use.
    /// Holding the returned guard serializes every other caller racing on
    /// the same mid until it's dropped.
    pub async fn acquire(&self, mid: u16) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = std::sync::Arc::clone(
            self.table.entry(mid).or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(()))).value(),
        );
        mutex.lock_owned().await
    }
}

impl Default for MidLock {
    fn default() -> Self {
        Self::new()
    }
}

impl MidTable {
    pub fn new() -> Self {
        MidTable {
            entries: DashMap::new(),
        }
    }

    /// Register a new confirmable send. Returns `Err(())` if `mid` is
    /// already tracked — a send must never silently clobber an
    /// in-flight entry.
    pub fn register(&self, mid: u16, entry: MidEntry) -> Result<(), ()> {
        use dashmap::mapref::entry::Entry as DashEntry;
        match self.entries.entry(mid) {
            DashEntry::Occupied(_) => Err(()),
            DashEntry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Remove and resolve the entry for `mid` with an incoming
    /// Acknowledgement/Reset, if one is tracked.
    pub fn complete(&self, mid: u16, response: Message) -> bool {
        match self.entries.remove(&mid) {
            Some((_, entry)) => {
                entry.resolve(response);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, mid: u16) -> bool {
        self.entries.contains_key(&mid)
    }

    /// Drive the retransmit/expiry scheduler once. Returns the messages
    /// that need to be resent on the wire; entries that expired are
    /// dropped (their completion channel is simply closed, which
    /// surfaces as a cancelled/timeout error to the waiting caller).
    pub fn check_expirations(&self, max_retransmit: u32, ack_timeout: Duration) -> Vec<(u16, Message)> {
        let now = Instant::now();
        let mut to_retransmit = Vec::new();
        let mut to_expire = Vec::new();

        for mut entry in self.entries.iter_mut() {
            let mid = *entry.key();
            if entry.is_expired(now, max_retransmit) {
                to_expire.push(mid);
            } else if entry.due_for_retransmit(now, ack_timeout) {
                to_retransmit.push((mid, entry.retransmit_message()));
            }
        }

        for mid in to_expire {
            self.entries.remove(&mid);
        }

        to_retransmit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for MidTable {
    fn default() -> Self {
        Self::new()
    }
}
