//! Raw X25519 key agreement.
//!
//! The reference system (`ascon/coder/ecdh.go`) calls straight into
//! `curve25519.ScalarBaseMult`/`curve25519.X25519` — there is no Noise
//! handshake framing here. `x25519-dalek`'s low-level `StaticSecret`/
//! `PublicKey` types give the same two operations without pulling in a
//! handshake state machine this system doesn't use.

use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const PUBLIC_KEY_BYTES: usize = 32;
pub const PRIVATE_KEY_BYTES: usize = 32;
pub const SHARED_SECRET_BYTES: usize = 32;

/// An ephemeral X25519 keypair, generated fresh for each handshake attempt.
#[derive(ZeroizeOnDrop)]
pub struct Keypair {
    #[zeroize(skip)]
    public: [u8; PUBLIC_KEY_BYTES],
    secret: StaticSecret,
}

impl Keypair {
    /// Generate a fresh keypair from a cryptographic RNG, mirroring
    /// `RandomBytes(32)` feeding `ComputePublicKey` in the reference.
    pub fn generate() -> Self {
        let mut seed = [0u8; PRIVATE_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut seed);
        let secret = StaticSecret::from(seed);
        seed.zeroize();
        let public = PublicKey::from(&secret);
        Keypair {
            public: public.to_bytes(),
            secret,
        }
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_BYTES] {
        self.public
    }

    /// Derive the shared secret against a peer's public key, mirroring
    /// `DeriveSharedKey`.
    pub fn diffie_hellman(&self, peer_public: &[u8; PUBLIC_KEY_BYTES]) -> [u8; SHARED_SECRET_BYTES] {
        let peer = PublicKey::from(*peer_public);
        self.secret.diffie_hellman(&peer).to_bytes()
    }
}
