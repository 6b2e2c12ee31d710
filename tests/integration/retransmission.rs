//! A Confirmable request whose Acknowledgement never arrives gets
//! retransmitted at `AckTimeout * (n+1)` intervals, byte-identical, up to
//! `MaxRetransmit` times.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cat_core::config::TransmissionConfig;
use cat_core::message::code;
use cat_core::{Message, MessageType};
use cat_net::{Delivery, HandlerFn};

use crate::{dial_client_with_config, spawn_server_with_config};

fn fast_retransmit_config() -> TransmissionConfig {
    TransmissionConfig {
        ack_timeout: Duration::from_millis(40),
        max_retransmit: 4,
        ..TransmissionConfig::client_defaults()
    }
}

/// Answers only once the handler has been invoked `answer_on_nth` times
/// for the same token — every earlier delivery (each one a resend of
/// the same retransmitted request) is silently dropped, forcing the
/// client's mid table to keep retransmitting.
fn answer_after_n_deliveries(answer_on_nth: usize) -> (HandlerFn, Arc<AtomicUsize>) {
    let deliveries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&deliveries);
    let handler: HandlerFn = Arc::new(move |delivery: Delivery| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if seen < answer_on_nth {
                return;
            }
            let response = Message::new(MessageType::Acknowledgement, code::CONTENT, 0, vec![])
                .unwrap()
                .with_payload(b"hello".to_vec());
            let _ = delivery.respond(response).await;
        })
    });
    (handler, deliveries)
}

#[tokio::test]
async fn request_is_retransmitted_until_the_server_answers() {
    let config = fast_retransmit_config();
    let (handler, deliveries) = answer_after_n_deliveries(3);
    let (_server, addr) = spawn_server_with_config(handler, config.clone()).await;

    let conn = dial_client_with_config(addr, config).await;
    let deadline = Instant::now() + Duration::from_secs(2);
    let response = conn.get("/a", Some(deadline)).await.expect("eventually answered");

    assert_eq!(response.code, code::CONTENT);
    assert_eq!(response.payload, b"hello");
    assert!(
        deliveries.load(Ordering::SeqCst) >= 3,
        "the server must have seen at least 3 deliveries of the retransmitted request"
    );
}

#[tokio::test]
async fn request_expires_after_max_retransmit_when_server_never_answers() {
    let config = TransmissionConfig {
        ack_timeout: Duration::from_millis(30),
        max_retransmit: 2,
        ..fast_retransmit_config()
    };
    let (handler, _deliveries) = answer_after_n_deliveries(usize::MAX);
    let (_server, addr) = spawn_server_with_config(handler, config.clone()).await;

    let conn = dial_client_with_config(addr, config).await;
    let deadline = Instant::now() + Duration::from_secs(5);
    let result = conn.get("/a", Some(deadline)).await;
    assert!(
        result.is_err(),
        "a request the server never answers must eventually fail once the retransmit budget is spent"
    );
}
