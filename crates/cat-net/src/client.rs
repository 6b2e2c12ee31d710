//! Client dial: the inverse of [`crate::server`] — one connection, one
//! remote, handshake run to completion before the connection is handed
//! back to the caller.
//!
//! Ported from `ascon/client.go`'s `Dial`/`client`/`handshake`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

use cat_core::coder::KeyState;
use cat_core::config::TransmissionConfig;

use crate::connection::{Connection, ConnectionError};
use crate::session::Session;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("io error resolving/binding to {0}")]
    Io(#[from] std::io::Error),
    #[error("dial timed out before the handshake completed")]
    Timeout,
    #[error("handshake failed: {0}")]
    Handshake(#[from] ConnectionError),
}

/// Connect to `target` (`host:port`), spin up its connection and read
/// loop, and run the client side of the handshake before returning.
/// Bounded end-to-end by `config.dial_timeout`.
pub async fn dial(target: &str, config: TransmissionConfig) -> Result<Arc<Connection>, DialError> {
    tokio::time::timeout(config.dial_timeout, dial_inner(target, config.clone()))
        .await
        .map_err(|_| DialError::Timeout)?
}

async fn dial_inner(target: &str, config: TransmissionConfig) -> Result<Arc<Connection>, DialError> {
    let local_bind = if target_is_ipv6(target) { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(local_bind).await?;
    socket.connect(target).await?;
    let remote: SocketAddr = socket.peer_addr()?;
    let socket = Arc::new(socket);

    let session = Session::new(Arc::clone(&socket), remote, config.mtu);
    let (conn, mut inbox) = Connection::new(session, remote, config.clone(), KeyState::Unkeyed);

    // The core's default client has no application-level handler wired up
    // (request routing is an external collaborator); deliveries that
    // aren't consumed by the handshake/ack fast paths are simply drained
    // so the bounded channel never backs up.
    tokio::spawn(async move { while inbox.recv().await.is_some() {} });

    let read_loop_conn = Arc::clone(&conn);
    let read_socket = Arc::clone(&socket);
    let mtu = config.mtu;
    tokio::spawn(async move {
        let mut buf = vec![0u8; mtu as usize];
        loop {
            match read_socket.recv_from(&mut buf).await {
                Ok((n, _from)) => {
                    if let Err(err) = read_loop_conn.process(&buf[..n]).await {
                        tracing::warn!(error = %err, "client read loop: failed to process datagram");
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "client read loop: socket closed");
                    return;
                }
            }
        }
    });

    let expire_conn = Arc::clone(&conn);
    let tick_interval = config.ack_timeout.min(Duration::from_millis(250));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(tick_interval);
        loop {
            tick.tick().await;
            if let Err(err) = expire_conn.check_expirations().await {
                tracing::warn!(error = %err, "client expiration check failed");
            }
        }
    });

    conn.handshake().await?;
    Ok(conn)
}

fn target_is_ipv6(target: &str) -> bool {
    target.starts_with('[')
}
