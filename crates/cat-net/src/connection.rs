//! Per-peer connection state machine: MID/token bookkeeping, confirmable
//! retransmission, response-cache deduplication, handshake orchestration.
//!
//! Ported from `ascon/connection/conn.go`, the largest and most important
//! file in the original source tree.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::RngCore;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use cat_core::coder::{self, CoderError, KeyState};
use cat_core::config::TransmissionConfig;
use cat_core::message::code;
use cat_core::options::Options;
use cat_core::{Message, MessageType};

use crate::cache::ResponseCache;
use crate::mid::{MidEntry, MidLock, MidTable};
use crate::session::{Session, SessionError};

/// Threshold and jump amount for the MID-counter reconnection hazard:
/// `0xFFFF / 4` and `0xFFFF / 2`.
const MID_JUMP_THRESHOLD: u32 = 0xFFFF / 4;
const MID_JUMP_AMOUNT: u32 = 0xFFFF / 2;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(#[from] SessionError),
    #[error("malformed datagram: {0}")]
    Parse(#[from] CoderError),
    #[error("mid {0:#06x} already has an outstanding handler")]
    MidCollision(u16),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("request cancelled")]
    Cancelled,
}

/// A request delivered to the application handler, paired with a
/// one-shot sink for its response. Mirrors the `(writer, request)` pair
/// `HandlerFn` receives upstream — option marshaling and routing on top
/// of this are the external mux's job, not this crate's.
pub struct Delivery {
    pub request: Message,
    connection: Arc<Connection>,
    // Held from the response-cache lookup in `process` through to
    // `respond_to`'s cache insert (or simply dropped here if the handler
    // never responds) — see `MidLock`.
    _mid_lock: tokio::sync::OwnedMutexGuard<()>,
}

impl Delivery {
    /// Send `response` back to the peer, retyped and cached exactly as
    /// the deduplication path expects when it later replays this entry.
    pub async fn respond(self, response: Message) -> Result<(), ConnectionError> {
        self.connection.respond_to(&self.request, response).await
    }
}

/// Per-peer connection: everything needed to drive one remote address's
/// CoAP-over-ASCON exchange.
pub struct Connection {
    session: Session,
    remote: SocketAddr,
    config: TransmissionConfig,
    key: RwLock<KeyState>,
    local_mid: AtomicU32,
    mid_table: MidTable,
    mid_locks: MidLock,
    token_waiters: DashMap<Vec<u8>, oneshot::Sender<Message>>,
    response_cache: ResponseCache,
    inflight: Semaphore,
    inbox: mpsc::Sender<Delivery>,
    last_activity: RwLock<Instant>,
}

impl Connection {
    /// Build a connection bound to `remote` over `session`, with `key`
    /// as its initial keying state (`Unkeyed` unless resuming). Returns
    /// the connection plus the receiving end of the user-handler inbox,
    /// bounded by `ReceivedMessageQueueSize`.
    pub fn new(
        session: Session,
        remote: SocketAddr,
        config: TransmissionConfig,
        key: KeyState,
    ) -> (Arc<Self>, mpsc::Receiver<Delivery>) {
        let (inbox, inbox_rx) = mpsc::channel(config.received_message_queue_size);
        let connection = Connection {
            session,
            remote,
            response_cache: ResponseCache::new(config.exchange_lifetime),
            inflight: Semaphore::new(config.n_start as usize),
            config,
            key: RwLock::new(key),
            local_mid: AtomicU32::new(0),
            mid_table: MidTable::new(),
            mid_locks: MidLock::new(),
            token_waiters: DashMap::new(),
            inbox,
            last_activity: RwLock::new(Instant::now()),
        };
        (Arc::new(connection), inbox_rx)
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub async fn is_keyed(&self) -> bool {
        self.key.read().await.is_keyed()
    }

    pub async fn set_key(&self, key: [u8; cat_core::ascon::KEY_BYTES]) {
        *self.key.write().await = KeyState::Keyed(key);
    }

    fn next_mid(&self) -> u16 {
        self.local_mid.fetch_add(1, Ordering::Relaxed) as u16
    }

    fn fresh_token(&self) -> Vec<u8> {
        let mut token = vec![0u8; 4];
        rand::thread_rng().fill_bytes(&mut token);
        token
    }

    /// `WriteMessage(req)`: upsert type to Confirmable with a fresh MID,
    /// then run the retransmit path to completion (fire-and-forget: the
    /// caller does not wait for an Acknowledgement body).
    pub async fn write_message(self: &Arc<Self>, mut msg: Message) -> Result<(), ConnectionError> {
        msg.typ = MessageType::Confirmable;
        msg.message_id = self.next_mid();
        let (tx, rx) = oneshot::channel();
        self.send_confirmable(msg, None, tx).await?;
        // Best-effort: don't block the caller on the Ack, but do let the
        // retransmit machinery retire the entry once it arrives.
        tokio::spawn(async move {
            let _ = rx.await;
        });
        Ok(())
    }

    /// `Do(req)`: full request/response round trip. `deadline`, if set,
    /// bounds how long the caller will wait before `DeadlineExceeded`.
    ///
    /// Registers a token handler before the request ever hits the wire
    /// (mirrors `doInternal`'s `tokenHandlerContainer.LoadOrStore`), so
    /// the response is delivered the same way whether it arrives
    /// piggybacked on the Acknowledgement or as a later separate message
    /// correlated only by token. The mid table still tracks the send for
    /// retransmission, but its own completion channel is never read here
    /// — `process` resolves content exclusively through `token_waiters`.
    pub async fn do_request(
        self: &Arc<Self>,
        mut msg: Message,
        deadline: Option<Instant>,
    ) -> Result<Message, ConnectionError> {
        let _permit = self
            .inflight
            .acquire()
            .await
            .expect("semaphore is never closed while the connection is alive");

        msg.typ = MessageType::Confirmable;
        msg.message_id = self.next_mid();
        if msg.token.is_empty() {
            msg.token = self.fresh_token();
        }
        let token = msg.token.clone();

        let (tx, rx) = oneshot::channel();
        self.token_waiters.insert(token.clone(), tx);
        let result = self.do_request_wait(msg, deadline, rx).await;
        self.token_waiters.remove(&token);
        result
    }

    async fn do_request_wait(
        self: &Arc<Self>,
        msg: Message,
        deadline: Option<Instant>,
        rx: oneshot::Receiver<Message>,
    ) -> Result<Message, ConnectionError> {
        let (mid_tx, _mid_rx) = oneshot::channel();
        self.send_confirmable(msg, deadline, mid_tx).await?;

        match deadline {
            Some(when) => {
                let remaining = when.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, rx).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(_)) => Err(ConnectionError::Cancelled),
                    Err(_) => Err(ConnectionError::DeadlineExceeded),
                }
            }
            None => rx.await.map_err(|_| ConnectionError::Cancelled),
        }
    }

    async fn send_confirmable(
        self: &Arc<Self>,
        msg: Message,
        deadline: Option<Instant>,
        completion: oneshot::Sender<Message>,
    ) -> Result<(), ConnectionError> {
        let mid = msg.message_id;
        let entry = MidEntry::new(msg.clone(), deadline, completion);
        self.mid_table
            .register(mid, entry)
            .map_err(|_| ConnectionError::MidCollision(mid))?;

        let key = *self.key.read().await;
        self.session.write_message(&msg, &key).await?;
        Ok(())
    }

    /// `Get/Put/Post/Delete(path, payload)`: build a confirmable request
    /// with a fresh token and run it through `do_request`.
    pub async fn get(self: &Arc<Self>, path: &str, deadline: Option<Instant>) -> Result<Message, ConnectionError> {
        self.request(code::GET, path, Vec::new(), deadline).await
    }

    pub async fn put(
        self: &Arc<Self>,
        path: &str,
        payload: Vec<u8>,
        deadline: Option<Instant>,
    ) -> Result<Message, ConnectionError> {
        self.request(code::PUT, path, payload, deadline).await
    }

    pub async fn post(
        self: &Arc<Self>,
        path: &str,
        payload: Vec<u8>,
        deadline: Option<Instant>,
    ) -> Result<Message, ConnectionError> {
        self.request(code::POST, path, payload, deadline).await
    }

    pub async fn delete(self: &Arc<Self>, path: &str, deadline: Option<Instant>) -> Result<Message, ConnectionError> {
        self.request(code::DELETE, path, Vec::new(), deadline).await
    }

    async fn request(
        self: &Arc<Self>,
        request_code: code::Code,
        path: &str,
        payload: Vec<u8>,
        deadline: Option<Instant>,
    ) -> Result<Message, ConnectionError> {
        let token = self.fresh_token();
        let msg = Message::new(MessageType::Confirmable, request_code, 0, token)
            .expect("fresh_token never exceeds MAX_TOKEN_SIZE")
            .with_options(Options::uri_path(path))
            .with_payload(payload);
        self.do_request(msg, deadline).await
    }

    /// `AsyncPing(on_pong)`: send an empty-code confirmable; invoke
    /// `on_pong` with the matching Acknowledgement once it arrives (or
    /// never, if the ping itself expires — the callback is simply
    /// dropped, observable only via `CheckExpirations` bookkeeping).
    pub async fn async_ping<F>(self: &Arc<Self>, on_pong: F) -> Result<(), ConnectionError>
    where
        F: FnOnce(Message) + Send + 'static,
    {
        let msg = Message::new(MessageType::Confirmable, code::EMPTY, self.next_mid(), Vec::new())
            .expect("empty token is always valid");
        let (tx, rx) = oneshot::channel();
        self.send_confirmable(msg, None, tx).await?;
        tokio::spawn(async move {
            if let Ok(pong) = rx.await {
                on_pong(pong);
            }
        });
        Ok(())
    }

    /// `Process(datagram)`: decode, then dispatch.
    ///
    /// A malformed datagram (`Parse`) or one that fails ASCON
    /// authentication (`AuthFailure`) is dropped silently — it is never a
    /// reason to close the connection, so decode failures are swallowed
    /// here rather than propagated with `?`. Only a failure to write a
    /// reply back out (`Transport`) is surfaced to the caller.
    pub async fn process(self: &Arc<Self>, datagram: &[u8]) -> Result<(), ConnectionError> {
        *self.last_activity.write().await = Instant::now();

        let key = *self.key.read().await;
        let msg = match coder::decode(datagram, &key) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(remote = %self.remote, error = %err, "dropping undecodable datagram");
                return Ok(());
            }
        };

        if msg.typ == MessageType::Confirmable {
            self.maybe_jump_mid_counter(msg.message_id);
        }

        // 1. Handshake request: no options, 32-byte body.
        if coder::is_handshake(msg.code) && msg.options.0.is_empty() && msg.payload.len() == 32 {
            return self.handle_client_hello(msg).await;
        }

        // 2. Empty-code confirmable ping, no token/options/body.
        if msg.typ == MessageType::Confirmable
            && msg.code == code::EMPTY
            && msg.token.is_empty()
            && msg.options.0.is_empty()
            && msg.payload.is_empty()
        {
            let pong = Message::new(MessageType::Acknowledgement, code::EMPTY, msg.message_id, Vec::new())
                .expect("empty token is always valid");
            let key = *self.key.read().await;
            self.session.write_message(&pong, &key).await?;
            return Ok(());
        }

        // 3. MID tracked: stop retransmission (the mid table's own
        // completion channel is a write_message/async_ping concern — for
        // a do_request send it's a throwaway nobody reads).
        if matches!(msg.typ, MessageType::Acknowledgement | MessageType::Reset) {
            let mid_was_tracked = self.mid_table.complete(msg.message_id, msg.clone());
            // 4. Token match: deliver content to the waiting caller,
            // whether this is a piggybacked answer (mid tracked, real
            // code) or an untracked mid carrying a separate response.
            // A bare receipt Ack for a request awaiting a separate
            // response has no token of its own (the reference clears it
            // before sending), so it simply falls through here, leaving
            // the token registered for the response that follows later.
            let token_matched = if msg.token.is_empty() {
                false
            } else if let Some((_, tx)) = self.token_waiters.remove(&msg.token) {
                let _ = tx.send(msg);
                true
            } else {
                false
            };
            if !mid_was_tracked && !token_matched {
                trace!(mid = msg.message_id, "dropping unmatched ack/reset");
            }
            return Ok(());
        }

        // Separate message: a fresh Confirmable/NonConfirmable carrying
        // the token of a request we're still waiting on, arriving on a
        // MID we never tracked. Deliver it the same way a piggybacked
        // answer would be, instead of treating it as a new inbound
        // request.
        if !msg.token.is_empty() {
            if let Some((_, tx)) = self.token_waiters.remove(&msg.token) {
                let _ = tx.send(msg);
                return Ok(());
            }
        }

        // Deduplication: a request we've already answered within
        // Exchange Lifetime gets the cached bytes replayed verbatim. The
        // per-mid lock is held from this lookup through to the handler's
        // eventual cache insert (see `MidLock`), so two copies of the
        // same retransmitted datagram can't both miss the cache and both
        // reach the handler.
        let mid_lock = self.mid_locks.acquire(msg.message_id).await;
        if let Some(cached) = self.response_cache.get(self.remote, msg.message_id) {
            self.session.write_raw(&cached).await?;
            return Ok(());
        }

        // 5. Enqueue for the user handler.
        let delivery = Delivery {
            request: msg,
            connection: Arc::clone(self),
            _mid_lock: mid_lock,
        };
        if self.inbox.send(delivery).await.is_err() {
            warn!("received-message queue closed; dropping datagram");
        }
        Ok(())
    }

    /// Encode, send, and cache a response produced for `request`,
    /// retyped to Acknowledgement (if the request was confirmable) or
    /// NonConfirmable, with the request's token and MID.
    async fn respond_to(&self, request: &Message, mut response: Message) -> Result<(), ConnectionError> {
        response.typ = if request.typ == MessageType::Confirmable {
            MessageType::Acknowledgement
        } else {
            MessageType::NonConfirmable
        };
        response.message_id = request.message_id;
        response.token = request.token.clone();

        let key = *self.key.read().await;
        let wire = coder::encode(&response, &key)?;
        self.response_cache
            .insert_if_absent(self.remote, request.message_id, wire.clone());
        self.session.write_raw(&wire).await?;
        Ok(())
    }

    /// Server side of the handshake (`handleClientHello`): reply with
    /// the server's public key in plaintext, then transition to keyed.
    async fn handle_client_hello(self: &Arc<Self>, request: Message) -> Result<(), ConnectionError> {
        let client_public: [u8; 32] = match request.payload.as_slice().try_into() {
            Ok(p) => p,
            Err(_) => return Ok(()), // malformed hello body, drop
        };

        let keypair = cat_core::x25519::Keypair::generate();
        let shared = keypair.diffie_hellman(&client_public);
        let mut server_secret = [0u8; 16];
        server_secret.copy_from_slice(&shared[..16]);

        let reply = Message::new(
            MessageType::Acknowledgement,
            code::EMPTY,
            request.message_id,
            request.token.clone(),
        )
        .expect("token carried over from a valid request")
        .with_payload(keypair.public_bytes().to_vec());

        // This single datagram goes out in plaintext — the client has no
        // key yet. Every later datagram is keyed.
        self.session.write_message(&reply, &KeyState::Unkeyed).await?;
        self.set_key(server_secret).await;
        debug!(
            remote = %self.remote,
            peer_key = hex::encode(&client_public[..4]),
            "handshake complete (server)"
        );
        Ok(())
    }

    /// Client side of the handshake (`client.go`'s `handshake()`):
    /// generate a keypair, send it as a Confirmable `Handshake`, derive
    /// the shared secret from the server's reply.
    pub async fn handshake(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let keypair = cat_core::x25519::Keypair::generate();
        let token = self.fresh_token();
        let hello = Message::new(MessageType::Confirmable, code::HANDSHAKE, 0, token)
            .expect("fresh_token never exceeds MAX_TOKEN_SIZE")
            .with_payload(keypair.public_bytes().to_vec());

        let deadline = Instant::now() + self.config.handshake_timeout;
        let response = self.do_request(hello, Some(deadline)).await?;

        let server_public: [u8; 32] = response
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| ConnectionError::Parse(CoderError::Truncated))?;
        let shared = keypair.diffie_hellman(&server_public);
        let mut client_secret = [0u8; 16];
        client_secret.copy_from_slice(&shared[..16]);
        self.set_key(client_secret).await;
        debug!(
            remote = %self.remote,
            peer_key = hex::encode(&server_public[..4]),
            "handshake complete (client)"
        );
        Ok(())
    }

    /// MID-counter reconnection hazard: if an incoming confirmable's MID
    /// sits suspiciously close ahead of our own
    /// counter, a peer likely restarted and reused low MIDs — jump our
    /// counter forward so future sends and cache entries don't collide.
    fn maybe_jump_mid_counter(&self, peer_mid: u16) {
        let local = self.local_mid.load(Ordering::Relaxed) as u16;
        let diff = peer_mid.wrapping_sub(local) as u32;
        if diff < MID_JUMP_THRESHOLD {
            self.local_mid.fetch_add(MID_JUMP_AMOUNT, Ordering::Relaxed);
        }
    }

    /// `CheckExpirations(now)`: retransmit or expire every outstanding
    /// mid-handler entry, and evict stale response-cache entries.
    pub async fn check_expirations(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.response_cache.evict_expired();

        let due = self
            .mid_table
            .check_expirations(self.config.max_retransmit, self.config.ack_timeout);
        if due.is_empty() {
            return Ok(());
        }

        let key = *self.key.read().await;
        for (mid, msg) in due {
            trace!(mid, remote = %self.remote, "retransmitting");
            self.session.write_message(&msg, &key).await?;
        }
        Ok(())
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_activity.read().await.elapsed()
    }
}
