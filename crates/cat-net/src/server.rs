//! Server demultiplexer: one UDP socket fan-out across per-remote
//! connections.
//!
//! Ported from `ascon/server.go`'s `Serve` loop. `getOrCreateConn` /
//! `getConn` become [`Server::connection_for`]; the inactivity-monitor +
//! response-cache sweep (`handleInactivityMonitors`, `PeriodicRunner`)
//! becomes [`Server::expire_loop`]. Failure policy matches the reference
//! exactly: a single connection's processing error closes only that
//! connection; a listener read error tears down the whole server.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, error, warn};

use cat_core::coder::KeyState;
use cat_core::config::TransmissionConfig;

use crate::connection::{Connection, Delivery};
use crate::session::Session;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The external request-router/mux this crate treats as a black box:
/// given a [`Delivery`], produce a response via `delivery.respond(..)`
/// (or drop it, e.g. for an Empty-code ping the core already answered).
pub type HandlerFn = Arc<dyn Fn(Delivery) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listener i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invoked once per newly created connection, mirroring `Server.OnNewConn`.
pub type OnNewConnFn = Arc<dyn Fn(Arc<Connection>) + Send + Sync>;

pub struct Server {
    socket: Arc<UdpSocket>,
    conns: DashMap<SocketAddr, Arc<Connection>>,
    config: TransmissionConfig,
    handler: HandlerFn,
    on_new_conn: Option<OnNewConnFn>,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        config: TransmissionConfig,
        handler: HandlerFn,
    ) -> Result<Arc<Self>, ServerError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        Ok(Arc::new(Server {
            socket,
            conns: DashMap::new(),
            config,
            handler,
            on_new_conn: None,
        }))
    }

    pub fn with_on_new_conn(self: Arc<Self>, on_new_conn: OnNewConnFn) -> Arc<Self> {
        // Only ever called right after `bind`, before any datagram has
        // been received, so reconstructing is safe: no connection exists
        // yet to have missed the callback.
        Arc::new(Server {
            socket: Arc::clone(&self.socket),
            conns: DashMap::new(),
            config: self.config.clone(),
            handler: Arc::clone(&self.handler),
            on_new_conn: Some(on_new_conn),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// `getOrCreateConn`: look up the connection for `remote`, or spin up
    /// a fresh one bound to a session addressed only at that remote.
    fn connection_for(self: &Arc<Self>, remote: SocketAddr) -> Arc<Connection> {
        if let Some(existing) = self.conns.get(&remote) {
            return Arc::clone(&existing);
        }

        let session = Session::new(Arc::clone(&self.socket), remote, self.config.mtu);
        let (conn, mut inbox) = Connection::new(session, remote, self.config.clone(), KeyState::Unkeyed);

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                handler(delivery).await;
            }
        });

        self.conns.insert(remote, Arc::clone(&conn));
        debug!(%remote, "new connection");
        if let Some(cb) = &self.on_new_conn {
            cb(Arc::clone(&conn));
        }
        conn
    }

    fn close_connection(&self, remote: SocketAddr) {
        self.conns.remove(&remote);
    }

    /// The accept loop: one datagram in, dispatched to its connection,
    /// strictly in arrival order — processing runs inline on this task
    /// rather than being spawned off, so two datagrams from the same
    /// remote can never be reordered relative to each other.
    async fn serve(self: &Arc<Self>) -> Result<(), ServerError> {
        let mut buf = vec![0u8; self.config.mtu as usize];
        loop {
            let (n, remote) = match self.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(err) => {
                    error!(error = %err, "listener read failed, closing all connections");
                    self.conns.clear();
                    return Err(ServerError::Io(err));
                }
            };

            let conn = self.connection_for(remote);
            if let Err(err) = conn.process(&buf[..n]).await {
                warn!(%remote, error = %err, "closing connection after processing error");
                self.close_connection(remote);
            }
        }
    }

    /// Periodic runner: drives retransmission/expiry per connection and
    /// evicts connections past their inactivity timeout. Mirrors
    /// `handleInactivityMonitors` + `responseMsgCache.CheckExpirations`;
    /// the response cache here lives per-connection (see `cache.rs`) so
    /// evicting the connection evicts its cache with it.
    async fn expire_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            let remotes: Vec<SocketAddr> = self.conns.iter().map(|e| *e.key()).collect();
            for remote in remotes {
                let Some(conn) = self.conns.get(&remote).map(|c| Arc::clone(&c)) else {
                    continue;
                };
                if let Some(timeout) = self.config.inactivity_timeout {
                    if conn.idle_for().await > timeout {
                        debug!(%remote, "closing inactive connection");
                        self.close_connection(remote);
                        continue;
                    }
                }
                if let Err(err) = conn.check_expirations().await {
                    warn!(%remote, error = %err, "check_expirations failed; closing connection");
                    self.close_connection(remote);
                }
            }
        }
    }

    /// Runs the listener and the periodic expirer together. Returns once
    /// the listener's socket fails; the expirer is aborted alongside it.
    pub async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        let expirer = tokio::spawn(Arc::clone(&self).expire_loop());
        let result = self.serve().await;
        expirer.abort();
        result
    }
}
