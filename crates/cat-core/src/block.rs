//! 64-bit big-endian block arithmetic underlying the ASCON permutation.
//!
//! Mirrors the reference implementation's `block` type byte-for-byte: shift
//! and rotate are built from per-byte shifts with carry stitched in from the
//! neighboring byte, exactly as the original does it — including its use of
//! `64 - n` (rather than `8 - n`) as the carry-extraction shift. That only
//! yields a nonzero carry when `64 - n < 8`, so most rotate amounts here
//! carry no bits between bytes at all. This is not a textbook 64-bit
//! rotate, but ASCON only needs the permutation to be applied identically
//! on encrypt and decrypt, and this definition is used consistently on
//! both sides, so round-trip correctness holds regardless.
//!
//! Byte shifts beyond the 8-bit width of `u8` are defined here to zero out,
//! matching Go's shift semantics (shifting an unsigned type by more than
//! its bit width yields zero) rather than Rust's native `<<`/`>>`, which
//! panic on overflowing shift amounts.

pub const BLOCK_BYTES: usize = 8;

pub type Block = [u8; BLOCK_BYTES];

fn shl8(x: u8, n: u32) -> u8 {
    if n >= 8 {
        0
    } else {
        x << n
    }
}

fn shr8(x: u8, n: u32) -> u8 {
    if n >= 8 {
        0
    } else {
        x >> n
    }
}

/// Shift right by `n` bits (`0..=64`), filling with zeros, as a new block.
pub fn shiftr(x: Block, n: u32) -> Block {
    let mut temp = [0u8; 7];
    for i in 0..7 {
        temp[i] = shl8(x[i], 64 - n);
    }
    let mut out = x;
    out[0] = shr8(out[0], n);
    for i in 1..8 {
        out[i] = shr8(out[i], n);
        out[i] ^= temp[i - 1];
    }
    out
}

/// Shift left by `n` bits (`0..=64`), filling with zeros, as a new block.
pub fn shiftl(x: Block, n: u32) -> Block {
    let mut temp = [0u8; 7];
    for i in 1..8 {
        temp[i - 1] = shr8(x[i], 64 - n);
    }
    let mut out = x;
    for i in 0..7 {
        out[i] = shl8(out[i], n);
        out[i] ^= temp[i];
    }
    out[7] = shr8(out[7], n);
    out
}

/// Rotate right by `l` bits: `shiftr(l) ^ shiftl(64 - l)`.
pub fn rotate(x: Block, l: u32) -> Block {
    let right = shiftr(x, l);
    let left = shiftl(x, 64 - l);
    xor(right, left)
}

pub fn xor(x: Block, y: Block) -> Block {
    let mut out = x;
    for i in 0..8 {
        out[i] ^= y[i];
    }
    out
}

/// XOR the first `len` bytes of `x` with `y`, returning only those bytes.
/// Used when absorbing/emitting a partial final block.
pub fn xorp(x: Block, y: &[u8], len: usize) -> Vec<u8> {
    let mut out = x;
    for i in 0..len {
        out[i] ^= y[i];
    }
    out[..len].to_vec()
}

pub fn dxor(x: &mut Block, y: Block) {
    for i in 0..8 {
        x[i] ^= y[i];
    }
}

pub fn not(x: Block) -> Block {
    let mut out = x;
    for b in out.iter_mut() {
        *b = !*b;
    }
    out
}

pub fn dnot(x: &mut Block) {
    for b in x.iter_mut() {
        *b = !*b;
    }
}

pub fn and(x: Block, y: Block) -> Block {
    let mut out = x;
    for i in 0..8 {
        out[i] &= y[i];
    }
    out
}

pub fn dand(x: &mut Block, y: Block) {
    for i in 0..8 {
        x[i] &= y[i];
    }
}
