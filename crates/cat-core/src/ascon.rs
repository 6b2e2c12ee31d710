//! ASCON-128 authenticated encryption.
//!
//! Bit-exact port of the reference `ascon/coder/ascon.go`: same state
//! layout, same round constants, same sbox/diffusion sequencing, and —
//! deliberately — the same non-canonical handling of a plaintext/ciphertext
//! whose length is an exact multiple of the 8-byte rate (see
//! [`absorb_plaintext`]/[`absorb_ciphertext`]). Associated data is not
//! supported; this system never uses it (empty AD channel, per spec).

use crate::block::{self, Block};

pub const KEY_BYTES: usize = 16;
pub const NONCE_BYTES: usize = 16;
pub const TAG_BYTES: usize = 16;
const BLOCK_BYTES: usize = block::BLOCK_BYTES;

const ROUNDS_A: usize = 12;
const ROUNDS_B: usize = 6;

const IV: Block = [0x80, 0x40, 0x0C, 0x06, 0, 0, 0, 0];

const CONSTANTS: [Block; 12] = [
    [0, 0, 0, 0, 0, 0, 0, 0xf0],
    [0, 0, 0, 0, 0, 0, 0, 0xe1],
    [0, 0, 0, 0, 0, 0, 0, 0xd2],
    [0, 0, 0, 0, 0, 0, 0, 0xc3],
    [0, 0, 0, 0, 0, 0, 0, 0xb4],
    [0, 0, 0, 0, 0, 0, 0, 0xa5],
    [0, 0, 0, 0, 0, 0, 0, 0x96],
    [0, 0, 0, 0, 0, 0, 0, 0x87],
    [0, 0, 0, 0, 0, 0, 0, 0x78],
    [0, 0, 0, 0, 0, 0, 0, 0x69],
    [0, 0, 0, 0, 0, 0, 0, 0x5a],
    [0, 0, 0, 0, 0, 0, 0, 0x4b],
];

/// Rotation-pair table for the linear diffusion layer, one pair per lane.
const DIFFUSION: [(u32, u32); 5] = [(19, 28), (61, 39), (1, 6), (10, 17), (7, 41)];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AsconError {
    #[error("ASCON authentication failed: tag mismatch")]
    AuthFailure,
}

/// A single-use ASCON-128 permutation context, keyed and nonced once per
/// `encrypt`/`decrypt` call. There is no notion of reuse across calls —
/// each call builds a fresh state from scratch, exactly as the original's
/// free functions `Encrypt`/`Decrypt` construct a fresh `Ascon` value.
struct Ascon {
    state: [Block; 5],
    key: [Block; 2],
}

impl Ascon {
    fn new(key: &[u8; KEY_BYTES], nonce: &[u8; NONCE_BYTES]) -> Self {
        let k0: Block = key[0..8].try_into().unwrap();
        let k1: Block = key[8..16].try_into().unwrap();
        let n0: Block = nonce[0..8].try_into().unwrap();
        let n1: Block = nonce[8..16].try_into().unwrap();
        Ascon {
            state: [IV, k0, k1, n0, n1],
            key: [k0, k1],
        }
    }

    fn add_constant(&mut self, i: usize, x: usize) {
        block::dxor(&mut self.state[2], CONSTANTS[12 - x + i]);
    }

    /// 64-lane-parallel 5-bit sbox, applied identically across all 5 state
    /// words. Lifted verbatim from the reference's temp-variable sequencing.
    fn sbox(&mut self) {
        let s = &mut self.state;
        block::dxor(&mut s[0], s[4]);
        block::dxor(&mut s[4], s[3]);
        block::dxor(&mut s[2], s[1]);

        let mut temp = [block::not(s[0]), block::not(s[1]), block::not(s[2]), block::not(s[3]), block::not(s[4])];

        block::dand(&mut temp[0], s[1]);
        block::dand(&mut temp[1], s[2]);
        block::dand(&mut temp[2], s[3]);
        block::dand(&mut temp[3], s[4]);
        block::dand(&mut temp[4], s[0]);

        block::dxor(&mut s[0], temp[1]);
        block::dxor(&mut s[1], temp[2]);
        block::dxor(&mut s[2], temp[3]);
        block::dxor(&mut s[3], temp[4]);
        block::dxor(&mut s[4], temp[0]);

        block::dxor(&mut s[1], s[0]);
        block::dxor(&mut s[0], s[4]);
        block::dxor(&mut s[3], s[2]);

        block::dnot(&mut s[2]);
    }

    fn diffuse(&mut self) {
        for i in 0..5 {
            let (r0, r1) = DIFFUSION[i];
            let t0 = block::rotate(self.state[i], r0);
            let t1 = block::rotate(self.state[i], r1);
            block::dxor(&mut self.state[i], block::xor(t0, t1));
        }
    }

    fn permutation(&mut self, rounds: usize) {
        for i in 0..rounds {
            self.add_constant(i, rounds);
            self.sbox();
            self.diffuse();
        }
    }

    fn initialize(&mut self) {
        self.permutation(ROUNDS_A);
        block::dxor(&mut self.state[3], self.key[0]);
        block::dxor(&mut self.state[4], self.key[1]);
    }

    /// Absorb the whole plaintext, emitting ciphertext of the same length.
    ///
    /// Pads a *partial* final block with `0x80` then zeros. When the
    /// plaintext length is an exact multiple of 8 bytes, no extra padding
    /// block is appended — the existing last 8-byte block is absorbed as
    /// the terminal block, with **no permutation call following it**. This
    /// mirrors `processPlaintext` in the reference exactly; it deviates
    /// from the canonical ASCON-128 padding rule (which always absorbs a
    /// trailing `0x80 ‖ 0^56` block), but encrypt and decrypt are
    /// symmetric about this choice, so round-trip correctness holds. See
    /// See `DESIGN.md` for the full reasoning.
    fn absorb_plaintext(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let text_len = plaintext.len();
        if text_len == 0 {
            // Never reached by the coder (a CoAP datagram is always at
            // least a 4-byte header); the reference implementation
            // indexes off the end of the slice for this input. Degenerate
            // but harmless: nothing to absorb, nothing to emit.
            return Vec::new();
        }
        let l = text_len % BLOCK_BYTES;

        let mut padded;
        let last_byte;
        let data: &[u8] = if l > 0 {
            padded = plaintext.to_vec();
            padded.resize(text_len - l + BLOCK_BYTES, 0);
            padded[text_len] = 0x80;
            last_byte = text_len - l;
            &padded
        } else {
            last_byte = text_len.saturating_sub(BLOCK_BYTES);
            plaintext
        };

        let mut ciphertext = Vec::with_capacity(data.len().max(BLOCK_BYTES));
        let mut i = 0;
        while i < last_byte {
            let block: Block = data[i..i + BLOCK_BYTES].try_into().unwrap();
            block::dxor(&mut self.state[0], block);
            ciphertext.extend_from_slice(&self.state[0]);
            self.permutation(ROUNDS_B);
            i += BLOCK_BYTES;
        }

        let last: Block = data[last_byte..last_byte + BLOCK_BYTES].try_into().unwrap();
        block::dxor(&mut self.state[0], last);
        ciphertext.extend_from_slice(&self.state[0]);

        ciphertext.truncate(text_len);
        ciphertext
    }

    /// Inverse of [`absorb_plaintext`]; see its doc comment for the
    /// exact-multiple-of-the-rate edge case this mirrors.
    fn absorb_ciphertext(&mut self, ciphertext: &[u8]) -> Vec<u8> {
        let text_len = ciphertext.len();
        if text_len == 0 {
            return Vec::new();
        }
        let l = text_len % BLOCK_BYTES;
        let last_byte = if l > 0 {
            text_len - l
        } else {
            text_len.saturating_sub(BLOCK_BYTES)
        };

        let mut plaintext = Vec::with_capacity(text_len);
        let mut i = 0;
        while i < last_byte {
            let c: Block = ciphertext[i..i + BLOCK_BYTES].try_into().unwrap();
            let p = block::xor(self.state[0], c);
            plaintext.extend_from_slice(&p);
            self.state[0] = c;
            self.permutation(ROUNDS_B);
            i += BLOCK_BYTES;
        }

        if l == 0 {
            let c: Block = ciphertext[last_byte..].try_into().unwrap();
            let p = block::xor(self.state[0], c);
            plaintext.extend_from_slice(&p);
            self.state[0] = c;
            return plaintext;
        }

        let tail = &ciphertext[last_byte..];
        let p_t = block::xorp(self.state[0], tail, l);
        plaintext.extend_from_slice(&p_t);

        let mut replaced = [0u8; BLOCK_BYTES];
        replaced[..l].copy_from_slice(tail);
        self.state[0] = replaced;
        self.state[0][l] ^= 0x80;

        plaintext
    }

    fn finalize(&mut self) -> [u8; TAG_BYTES] {
        block::dxor(&mut self.state[0], self.key[0]);
        block::dxor(&mut self.state[1], self.key[1]);
        self.permutation(ROUNDS_A);
        block::dxor(&mut self.state[3], self.key[0]);
        block::dxor(&mut self.state[4], self.key[1]);

        let mut tag = [0u8; TAG_BYTES];
        tag[..8].copy_from_slice(&self.state[3]);
        tag[8..].copy_from_slice(&self.state[4]);
        tag
    }
}

/// Encrypt `plaintext` under `key`/`nonce`, returning `(ciphertext, tag)`.
pub fn encrypt(
    key: &[u8; KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    plaintext: &[u8],
) -> (Vec<u8>, [u8; TAG_BYTES]) {
    let mut ascon = Ascon::new(key, nonce);
    ascon.initialize();
    let ciphertext = ascon.absorb_plaintext(plaintext);
    let tag = ascon.finalize();
    (ciphertext, tag)
}

/// Decrypt `ciphertext` under `key`/`nonce`, verifying against `tag`.
/// Returns [`AsconError::AuthFailure`] if the computed tag doesn't match —
/// the caller must discard the datagram, never the partially-decoded
/// plaintext.
pub fn decrypt(
    key: &[u8; KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    ciphertext: &[u8],
    tag: &[u8; TAG_BYTES],
) -> Result<Vec<u8>, AsconError> {
    let mut ascon = Ascon::new(key, nonce);
    ascon.initialize();
    let plaintext = ascon.absorb_ciphertext(ciphertext);
    let computed = ascon.finalize();

    // Constant-time-ish compare is not critical here (the reference does a
    // plain bytes.Equal); we match its semantics rather than invent a
    // hardened comparison the source never had.
    if &computed[..] != &tag[..] {
        return Err(AsconError::AuthFailure);
    }
    Ok(plaintext)
}
