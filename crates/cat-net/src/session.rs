//! Session — owns the UDP socket view for one remote address.
//!
//! Ported from `ascon/connection/session.go`. The reference resolves a
//! process-wide `DefaultCoder` singleton and pokes a mutable secret into
//! it on every write (`resolveCoder`); here the caller passes the current
//! `KeyState` explicitly into [`encode`](cat_core::coder::encode), so
//! there is nothing global or mutable to resolve.
//!
//! A server's sessions share one bound socket (`Arc<UdpSocket>`,
//! demultiplexed by the server's per-remote connection table); a client's
//! session owns its socket outright. Either way `Session` only ever needs
//! a socket handle and the one remote address it speaks for — it never
//! runs its own read loop, since on the server that loop belongs to the
//! listener (`server.rs`) and on the client it belongs to `client::dial`.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UdpSocket;

use cat_core::coder::{self, CoderError, KeyState};
use cat_core::Message;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot encode message: {0}")]
    Encode(#[from] CoderError),
    #[error("socket i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("message size {size} exceeds mtu {mtu}")]
    TooLarge { size: usize, mtu: u16 },
}

/// One remote address's view of a (possibly shared) UDP socket.
pub struct Session {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    mtu: u16,
}

impl Session {
    pub fn new(socket: Arc<UdpSocket>, remote: SocketAddr, mtu: u16) -> Self {
        Session { socket, remote, mtu }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Encode `msg` against `key` and send it to this session's remote.
    /// Mirrors `Session.WriteMessage` resolving the coder against the
    /// caller-supplied key state rather than a package-global one, plus an
    /// MTU check the reference leaves to the caller: `plain_size` already
    /// accounts for the keyed AEAD trailer, so this catches an oversize
    /// send before spending a nonce and nonce-dependent ciphertext on it.
    pub async fn write_message(&self, msg: &Message, key: &KeyState) -> Result<(), SessionError> {
        let size = coder::plain_size(msg, key);
        if size > self.mtu as usize {
            return Err(SessionError::TooLarge { size, mtu: self.mtu });
        }
        let wire = coder::encode(msg, key)?;
        self.socket.send_to(&wire, self.remote).await?;
        Ok(())
    }

    /// Send pre-encoded bytes verbatim (used to replay a cached response
    /// or forward an already-wrapped datagram without re-encoding it).
    pub async fn write_raw(&self, wire: &[u8]) -> Result<(), SessionError> {
        self.socket.send_to(wire, self.remote).await?;
        Ok(())
    }
}
