//! A full dial → handshake → `GET /a` round trip against `catd`'s
//! default handler, the same path the upstream `examples/ascon`
//! client/server pair walks through.

use std::time::{Duration, Instant};

use cat_core::message::code;

use crate::{counting_hello_handler, dial_client, spawn_server};

#[tokio::test]
async fn get_a_returns_hello() {
    let (handler, count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let conn = dial_client(addr).await;
    let deadline = Instant::now() + Duration::from_secs(2);
    let response = conn.get("/a", Some(deadline)).await.expect("request succeeds");

    assert_eq!(response.code, code::CONTENT);
    assert_eq!(response.payload, b"hello");
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_path_returns_not_found() {
    let (handler, _count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let conn = dial_client(addr).await;
    let deadline = Instant::now() + Duration::from_secs(2);
    let response = conn.get("/missing", Some(deadline)).await.expect("request succeeds");

    assert_eq!(response.code, code::NOT_FOUND);
    assert!(response.payload.is_empty());
}

#[tokio::test]
async fn many_sequential_requests_reuse_the_same_connection() {
    let (handler, count) = counting_hello_handler();
    let (_server, addr) = spawn_server(handler).await;

    let conn = dial_client(addr).await;
    for _ in 0..5 {
        let deadline = Instant::now() + Duration::from_secs(2);
        let response = conn.get("/a", Some(deadline)).await.expect("request succeeds");
        assert_eq!(response.code, code::CONTENT);
    }

    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 5);
}
