//! Handshake establishment: two independent clients derive distinct
//! shared secrets, and one's ciphertext is unreadable under the other's
//! key.

use tokio::net::UdpSocket;

use cat_core::ascon;
use cat_core::coder::KeyState;

use crate::{counting_hello_handler, dial_client, raw_handshake, spawn_server};

#[tokio::test]
async fn handshake_derives_a_shared_key() {
    let (handler, _count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();

    let key = raw_handshake(&socket).await;
    assert!(key.is_keyed());
}

#[tokio::test]
async fn dial_completes_the_handshake_before_returning() {
    let (handler, _count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let conn = dial_client(addr).await;
    assert!(conn.is_keyed().await);
}

#[tokio::test]
async fn distinct_remotes_derive_distinct_keys() {
    let (handler, _count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let socket_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket_a.connect(addr).await.unwrap();
    let socket_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket_b.connect(addr).await.unwrap();

    let key_a = raw_handshake(&socket_a).await;
    let key_b = raw_handshake(&socket_b).await;

    let (KeyState::Keyed(a), KeyState::Keyed(b)) = (key_a, key_b) else {
        panic!("both handshakes must produce a keyed state");
    };
    assert_ne!(a, b, "independent handshakes must not collide on a shared secret");

    // A's ciphertext, authenticated under A's key, must fail to
    // authenticate under B's key — the keys are not interchangeable.
    let nonce = [7u8; ascon::NONCE_BYTES];
    let (ciphertext, tag) = ascon::encrypt(&a, &nonce, b"request from a");
    let result = ascon::decrypt(&b, &nonce, &ciphertext, &tag);
    assert!(result.is_err(), "connection b's key must not decrypt connection a's ciphertext");
}
