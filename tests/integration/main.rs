//! End-to-end test harness for the attested CoAP-over-ASCON transport.
//!
//! Every test here drives real loopback UDP sockets — no network
//! namespaces, no subprocesses. A `Server` binds to an ephemeral
//! `127.0.0.1` port and either `cat_net::dial` or a raw `UdpSocket` plays
//! the client side, exercising the handshake, retransmission,
//! deduplication, and authentication paths against the real wire format.

mod crypto_failures;
mod dedup;
mod end_to_end;
mod handshake;
mod retransmission;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;

use cat_core::coder::{self, KeyState};
use cat_core::config::TransmissionConfig;
use cat_core::message::code;
use cat_core::{Message, MessageType};
use cat_net::{Connection, Delivery, HandlerFn, Server};

/// Binds a server on loopback with `handler` and runs it in the
/// background. Returns the server handle (kept alive for the test's
/// duration) and its bound address.
pub async fn spawn_server(handler: HandlerFn) -> (Arc<Server>, SocketAddr) {
    spawn_server_with_config(handler, TransmissionConfig::server_defaults()).await
}

pub async fn spawn_server_with_config(
    handler: HandlerFn,
    config: TransmissionConfig,
) -> (Arc<Server>, SocketAddr) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = Server::bind(addr, config, handler).await.expect("bind loopback server");
    let bound = server.local_addr().expect("local_addr");

    let running = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = running.run().await;
    });

    (server, bound)
}

/// A handler that answers `GET /a` with `Content`/`"hello"` and anything
/// else with `NotFound`, counting every invocation.
pub fn counting_hello_handler() -> (HandlerFn, Arc<AtomicUsize>) {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    let handler: HandlerFn = Arc::new(move |delivery: Delivery| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let path = delivery.request.options.path();
            let (response_code, payload) = match (delivery.request.code, path.as_deref()) {
                (code::GET, Some("/a")) => (code::CONTENT, b"hello".to_vec()),
                _ => (code::NOT_FOUND, Vec::new()),
            };
            let response = Message::new(MessageType::Acknowledgement, response_code, 0, vec![])
                .unwrap()
                .with_payload(payload);
            let _ = delivery.respond(response).await;
        })
    });
    (handler, invocations)
}

/// Dials `addr` with client defaults, running the handshake to
/// completion before returning.
pub async fn dial_client(addr: SocketAddr) -> Arc<Connection> {
    dial_client_with_config(addr, TransmissionConfig::client_defaults()).await
}

pub async fn dial_client_with_config(addr: SocketAddr, config: TransmissionConfig) -> Arc<Connection> {
    cat_net::dial(&addr.to_string(), config).await.expect("client handshake")
}

/// Runs the wire-level handshake by hand over a bare `UdpSocket`,
/// returning the derived session key. Used by tests that need to reach
/// in and manipulate datagrams after the handshake (tampering,
/// cross-connection key checks) where `cat_net::dial`'s owned socket
/// would be in the way.
pub async fn raw_handshake(socket: &UdpSocket) -> KeyState {
    let keypair = cat_core::x25519::Keypair::generate();
    let hello = Message::new(MessageType::Confirmable, code::HANDSHAKE, 0x10, vec![9])
        .unwrap()
        .with_payload(keypair.public_bytes().to_vec());
    let wire = coder::encode(&hello, &KeyState::Unkeyed).unwrap();
    socket.send(&wire).await.unwrap();

    let mut buf = vec![0u8; 2048];
    let n = tokio::time::timeout(std::time::Duration::from_millis(500), socket.recv(&mut buf))
        .await
        .expect("handshake reply timed out")
        .unwrap();
    let reply = coder::decode(&buf[..n], &KeyState::Unkeyed).unwrap();
    assert_eq!(reply.typ, MessageType::Acknowledgement);

    let server_public: [u8; 32] = reply.payload.as_slice().try_into().unwrap();
    let shared = keypair.diffie_hellman(&server_public);
    let mut key = [0u8; 16];
    key.copy_from_slice(&shared[..16]);
    KeyState::Keyed(key)
}
