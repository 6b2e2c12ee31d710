//! CoAP header codec plus the optional ASCON datagram wrap/unwrap.
//!
//! Ported from `ascon/coder/coder.go`, with one deliberate structural
//! change: the original keys a process-wide `DefaultCoder` singleton by
//! poking a mutable `secret` field into it before every `Encode`/`Decode`
//! call (`coder.go`'s `SetSecret`) — a hazard worth designing out. Here
//! the key state is a plain value the caller (the connection) owns and
//! passes in explicitly; nothing in this module is global or mutable.

use rand::RngCore;
use thiserror::Error;

use crate::ascon::{self, AsconError, KEY_BYTES, NONCE_BYTES, TAG_BYTES};
use crate::message::{code, Message, MessageType, MAX_TOKEN_SIZE};
use crate::options::Options;

/// The AEAD trailer appended when keyed: `tag(16) ‖ nonce(16)`.
const TRAILER_BYTES: usize = TAG_BYTES + NONCE_BYTES;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoderError {
    #[error("message truncated")]
    Truncated,
    #[error("invalid CoAP version")]
    BadVersion,
    #[error("token exceeds {MAX_TOKEN_SIZE} bytes")]
    TokenTooLong,
    #[error("malformed option encoding: {0}")]
    Options(#[from] crate::options::OptionError),
    #[error("invalid message ID {0}")]
    InvalidMessageId(u32),
    #[error(transparent)]
    Auth(#[from] AsconError),
}

/// Explicit replacement for the reference's one-shot `isSecretReady`
/// boolean: a session starts `Unkeyed` and transitions to `Keyed`
/// exactly once, when the handshake completes. There is no "ready but
/// not yet" window — the transition is a single assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Unkeyed,
    Keyed([u8; KEY_BYTES]),
}

impl KeyState {
    pub fn is_keyed(&self) -> bool {
        matches!(self, KeyState::Keyed(_))
    }
}

/// Encode `msg` to wire bytes. When `key` is [`KeyState::Keyed`], the
/// entire plaintext datagram is ASCON-encrypted and the encoder appends
/// `ciphertext ‖ tag ‖ nonce` — the nonce trails the tag, matching the
/// reference's append order in `Encode`.
pub fn encode(msg: &Message, key: &KeyState) -> Result<Vec<u8>, CoderError> {
    if msg.token.len() > MAX_TOKEN_SIZE {
        return Err(CoderError::TokenTooLong);
    }

    let mut buf = Vec::with_capacity(4 + msg.token.len() + msg.payload.len() + 8);

    let tkl = msg.token.len() as u8;
    buf.push((1 << 6) | ((msg.typ as u8) << 4) | (tkl & 0xF));
    buf.push(msg.code);
    buf.extend_from_slice(&msg.message_id.to_be_bytes());
    buf.extend_from_slice(&msg.token);
    buf.extend_from_slice(&msg.options.marshal());
    if !msg.payload.is_empty() {
        buf.push(0xFF);
        buf.extend_from_slice(&msg.payload);
    }

    if let KeyState::Keyed(secret) = key {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let (ciphertext, tag) = ascon::encrypt(secret, &nonce, &buf);
        let mut out = ciphertext;
        out.extend_from_slice(&tag);
        out.extend_from_slice(&nonce);
        return Ok(out);
    }

    Ok(buf)
}

/// Decode wire bytes into a [`Message`]. When `key` is
/// [`KeyState::Keyed`], the trailer is read from the tail first — nonce
/// is the last 16 bytes, tag the 16 before that, ciphertext everything
/// else — and an authentication failure is propagated as
/// [`CoderError::Auth`] without attempting to parse whatever bytes
/// happen to be in the (unauthenticated) plaintext.
pub fn decode(data: &[u8], key: &KeyState) -> Result<Message, CoderError> {
    let owned;
    let plain: &[u8] = match key {
        KeyState::Keyed(secret) => {
            if data.len() < TRAILER_BYTES + 4 {
                return Err(CoderError::Truncated);
            }
            let split = data.len() - TRAILER_BYTES;
            let ciphertext = &data[..split];
            let tag: [u8; TAG_BYTES] = data[split..split + TAG_BYTES].try_into().unwrap();
            let nonce: [u8; NONCE_BYTES] = data[split + TAG_BYTES..].try_into().unwrap();
            owned = ascon::decrypt(secret, &nonce, ciphertext, &tag)?;
            &owned
        }
        KeyState::Unkeyed => data,
    };

    if plain.len() < 4 {
        return Err(CoderError::Truncated);
    }

    if plain[0] >> 6 != 1 {
        return Err(CoderError::BadVersion);
    }
    let typ = MessageType::from_u8((plain[0] >> 4) & 0x3).ok_or(CoderError::BadVersion)?;
    let tkl = (plain[0] & 0xF) as usize;
    if tkl > MAX_TOKEN_SIZE {
        return Err(CoderError::TokenTooLong);
    }
    let msg_code = plain[1];
    let message_id = u16::from_be_bytes([plain[2], plain[3]]);

    let mut cursor = 4usize;
    if plain.len() < cursor + tkl {
        return Err(CoderError::Truncated);
    }
    let token = plain[cursor..cursor + tkl].to_vec();
    cursor += tkl;

    let (options, consumed) = Options::unmarshal(&plain[cursor..])?;
    cursor += consumed;

    let payload = if cursor < plain.len() && plain[cursor] == 0xFF {
        plain[cursor + 1..].to_vec()
    } else {
        Vec::new()
    };

    Ok(Message {
        typ,
        code: msg_code,
        message_id,
        token,
        options,
        payload,
    })
}

/// Pre-computed wire size of `msg` for `key`, without actually encrypting
/// it — lets a caller MTU-check before `encode`. Mirrors `Coder.Size`,
/// extended to add the 32-byte `tag ‖ nonce` trailer `encode` appends
/// once keyed.
pub fn plain_size(msg: &Message, key: &KeyState) -> usize {
    let mut size = 4 + msg.token.len();
    size += msg.options.marshal().len();
    if !msg.payload.is_empty() {
        size += 1 + msg.payload.len();
    }
    if key.is_keyed() {
        size += TRAILER_BYTES;
    }
    size
}

/// Is `code` this system's handshake request code?
pub fn is_handshake(c: u8) -> bool {
    c == code::HANDSHAKE
}
