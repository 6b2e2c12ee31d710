//! CoAP message model (RFC 7252 §3) — the semantic layer `coder.rs`
//! serializes to and from the wire.

use thiserror::Error;

use crate::options::Options;

pub const MAX_TOKEN_SIZE: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("invalid token length (max {MAX_TOKEN_SIZE} bytes)")]
    InvalidTokenLen,
    #[error("invalid message ID {0} (must fit in 16 bits)")]
    InvalidMessageId(i32),
    #[error("invalid message type {0}")]
    InvalidType(u8),
}

/// The four CoAP message types (RFC 7252 §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MessageType::Confirmable),
            1 => Some(MessageType::NonConfirmable),
            2 => Some(MessageType::Acknowledgement),
            3 => Some(MessageType::Reset),
            _ => None,
        }
    }
}

pub mod code {
    //! CoAP codes this system cares about. Request codes live at `1..31`,
    //! response codes follow the `class.detail` = `class*32 + detail`
    //! convention. `Handshake`/`Proof`/`Prove`/`ProofNotFound` are this
    //! system's extension codes (`message/codes/codes.go` upstream);
    //! `Proof`/`Prove`/`ProofNotFound` are reserved for an attestation
    //! extension this repository does not implement, and pass through to
    //! the application handler untouched.
    pub type Code = u8;

    pub const GET: Code = 1;
    pub const POST: Code = 2;
    pub const PUT: Code = 3;
    pub const DELETE: Code = 4;
    pub const PROOF: Code = 5;
    pub const PROVE: Code = 6;
    pub const HANDSHAKE: Code = 31;

    pub const EMPTY: Code = 0;
    pub const CREATED: Code = 65;
    pub const DELETED: Code = 66;
    pub const VALID: Code = 67;
    pub const CHANGED: Code = 68;
    pub const CONTENT: Code = 69;
    pub const BAD_REQUEST: Code = 128;
    pub const UNAUTHORIZED: Code = 129;
    pub const BAD_OPTION: Code = 130;
    pub const FORBIDDEN: Code = 131;
    pub const NOT_FOUND: Code = 132;
    pub const METHOD_NOT_ALLOWED: Code = 133;
    pub const PROOF_NOT_FOUND: Code = 144;
    pub const INTERNAL_SERVER_ERROR: Code = 160;
}

/// A CoAP message: header fields, option sequence, and optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub typ: MessageType,
    pub code: code::Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Options,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(typ: MessageType, code: code::Code, message_id: u16, token: Vec<u8>) -> Result<Self, MessageError> {
        if token.len() > MAX_TOKEN_SIZE {
            return Err(MessageError::InvalidTokenLen);
        }
        Ok(Message {
            typ,
            code,
            message_id,
            token,
            options: Options::default(),
            payload: Vec::new(),
        })
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn is_confirmable(&self) -> bool {
        matches!(self.typ, MessageType::Confirmable)
    }
}

pub fn validate_token(token: &[u8]) -> Result<(), MessageError> {
    if token.len() > MAX_TOKEN_SIZE {
        Err(MessageError::InvalidTokenLen)
    } else {
        Ok(())
    }
}
