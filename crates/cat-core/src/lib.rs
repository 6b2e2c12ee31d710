//! cat-core — ASCON-128 AEAD, raw X25519 key agreement, and the CoAP
//! wire codec shared by every other crate in this workspace.

pub mod ascon;
pub mod block;
pub mod coder;
pub mod config;
pub mod message;
pub mod options;
pub mod x25519;

pub use coder::{CoderError, KeyState};
pub use message::{code, Message, MessageType};
