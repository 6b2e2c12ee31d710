//! A retransmitted Confirmable request within Exchange Lifetime gets the
//! cached response replayed, and the application handler runs exactly
//! once.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::net::UdpSocket;

use cat_core::coder::{self, KeyState};
use cat_core::message::code;
use cat_core::options::Options;
use cat_core::{Message, MessageType};

use crate::{counting_hello_handler, spawn_server};

#[tokio::test]
async fn duplicate_confirmable_request_is_answered_once() {
    let (handler, count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();

    let request = Message::new(MessageType::Confirmable, code::GET, 0x1234, vec![1, 2, 3, 4])
        .unwrap()
        .with_options(Options::uri_path("/a"));
    let wire = coder::encode(&request, &KeyState::Unkeyed).unwrap();

    socket.send(&wire).await.unwrap();
    let mut buf = vec![0u8; 2048];
    let n1 = tokio::time::timeout(Duration::from_millis(500), socket.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let first_response = buf[..n1].to_vec();

    socket.send(&wire).await.unwrap();
    let n2 = tokio::time::timeout(Duration::from_millis(500), socket.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let second_response = buf[..n2].to_vec();

    assert_eq!(
        first_response, second_response,
        "a replayed request must get the byte-identical cached response"
    );
    assert_eq!(
        count.load(Ordering::SeqCst),
        1,
        "the handler runs once; the duplicate is answered from cache"
    );

    let decoded = coder::decode(&first_response, &KeyState::Unkeyed).unwrap();
    assert_eq!(decoded.typ, MessageType::Acknowledgement);
    assert_eq!(decoded.code, code::CONTENT);
    assert_eq!(decoded.token, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn distinct_mids_are_not_deduplicated() {
    let (handler, count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();

    for mid in [1u16, 2, 3] {
        let request = Message::new(MessageType::Confirmable, code::GET, mid, vec![])
            .unwrap()
            .with_options(Options::uri_path("/a"));
        let wire = coder::encode(&request, &KeyState::Unkeyed).unwrap();
        socket.send(&wire).await.unwrap();
        let mut buf = vec![0u8; 2048];
        tokio::time::timeout(Duration::from_millis(500), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
    }

    assert_eq!(count.load(Ordering::SeqCst), 3);
}
