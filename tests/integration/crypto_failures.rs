//! A tampered ciphertext must be dropped silently — no response, no
//! handler invocation, connection preserved.

use std::time::Duration;

use tokio::net::UdpSocket;

use cat_core::coder::{self, KeyState};
use cat_core::message::code;
use cat_core::options::Options;
use cat_core::{Message, MessageType};

use crate::{counting_hello_handler, raw_handshake, spawn_server};

#[tokio::test]
async fn tampered_ciphertext_is_dropped_silently() {
    let (handler, count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();

    let key_state = raw_handshake(&socket).await;

    let request = Message::new(MessageType::Confirmable, code::GET, 0x20, vec![1])
        .unwrap()
        .with_options(Options::uri_path("/a"));
    let mut wire = coder::encode(&request, &key_state).unwrap();
    wire[0] ^= 0xFF;
    socket.send(&wire).await.unwrap();

    let mut buf = vec![0u8; 2048];
    let result = tokio::time::timeout(Duration::from_millis(300), socket.recv(&mut buf)).await;
    assert!(
        result.is_err(),
        "server must not respond to a datagram that fails authentication"
    );
    assert_eq!(
        count.load(std::sync::atomic::Ordering::SeqCst),
        0,
        "handler must not be invoked for an unauthenticated datagram"
    );

    // The connection must still be alive: a legitimate follow-up request
    // gets answered normally.
    let wire_good = coder::encode(&request, &key_state).unwrap();
    socket.send(&wire_good).await.unwrap();
    let n2 = tokio::time::timeout(Duration::from_millis(500), socket.recv(&mut buf))
        .await
        .expect("connection should still be usable after a dropped datagram")
        .unwrap();
    let decoded = coder::decode(&buf[..n2], &key_state).unwrap();
    assert_eq!(decoded.code, code::CONTENT);
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn truncated_datagram_is_dropped_silently() {
    let (handler, count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();

    socket.send(&[0u8; 2]).await.unwrap();

    let mut buf = vec![0u8; 2048];
    let result = tokio::time::timeout(Duration::from_millis(300), socket.recv(&mut buf)).await;
    assert!(result.is_err(), "a truncated datagram must not produce a reply");
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
}
