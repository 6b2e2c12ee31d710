//! cat-net — per-peer connection state machine and server demultiplexer
//! for CoAP-over-ASCON datagrams, built on top of `cat-core`'s wire codec
//! and crypto primitives.

pub mod cache;
pub mod client;
pub mod connection;
pub mod mid;
pub mod server;
pub mod session;

pub use client::{dial, DialError};
pub use connection::{Connection, ConnectionError, Delivery};
pub use server::{BoxFuture, HandlerFn, OnNewConnFn, Server, ServerError};
pub use session::{Session, SessionError};
