//! catd — attested CoAP-over-ASCON server daemon.
//!
//! Binds one UDP socket, answers the handshake in-band, and dispatches
//! decrypted requests to a small default handler. Real deployments
//! replace [`default_handler`] with their own request router; this one
//! exists so the daemon is runnable out of the box (mirrors the upstream
//! `examples/ascon/ascon` server, which serves a fixed response off a
//! single path).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

use cat_core::config::TransmissionConfig;
use cat_core::message::code;
use cat_core::{Message, MessageType};
use cat_net::{Delivery, HandlerFn, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing — RUST_LOG controls verbosity
    // e.g. RUST_LOG=debug cargo run -p catd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let bind_addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:5688".to_string())
        .parse()
        .context("invalid bind address, expected host:port")?;

    let config = TransmissionConfig::load_server().context("failed to load server config")?;

    tracing::info!(%bind_addr, ?config, "catd starting");

    let server = Server::bind(bind_addr, config, default_handler())
        .await
        .context("failed to bind UDP socket")?;

    tracing::info!(local_addr = %server.local_addr()?, "catd listening");

    if let Err(err) = server.run().await {
        tracing::error!(error = %err, "server exited");
        return Err(err.into());
    }

    Ok(())
}

/// The default request handler: `GET /a` answers `Content` with body
/// `"hello"`; every other request answers `NotFound`. A real deployment
/// wires an actual CoAP mux in here instead — this crate only consumes
/// `HandlerFn`.
fn default_handler() -> HandlerFn {
    Arc::new(|delivery: Delivery| {
        Box::pin(async move {
            let path = delivery.request.options.path();
            let (response_code, payload) = match (delivery.request.code, path.as_deref()) {
                (code::GET, Some("/a")) => (code::CONTENT, b"hello".to_vec()),
                _ => (code::NOT_FOUND, Vec::new()),
            };

            let response = Message::new(MessageType::Acknowledgement, response_code, 0, vec![])
                .expect("empty token is always valid")
                .with_payload(payload);

            if let Err(err) = delivery.respond(response).await {
                tracing::warn!(error = %err, "failed to send response");
            }
        })
    })
}
