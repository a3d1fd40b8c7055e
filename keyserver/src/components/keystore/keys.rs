use std::fmt;

use crypto_box::SecretKey;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretVec};

/// A server encryption key pair for the public-key box used to seal diagnosis key
/// uploads.
///
/// The keyserver only stores and hands out the raw bytes; it never encrypts or decrypts
/// with them itself.
pub struct KeyPair {
    public_key: Vec<u8>,
    private_key: SecretVec<u8>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generates a fresh Curve25519 key pair.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public_key = secret.public_key().as_bytes().to_vec();
        Self {
            public_key,
            private_key: SecretVec::new(secret.to_bytes().to_vec()),
        }
    }

    /// Wraps a key pair that was generated elsewhere.
    pub fn from_bytes(public_key: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            public_key,
            private_key: SecretVec::new(private_key),
        }
    }

    /// Returns the raw public key.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub(crate) fn private_key(&self) -> &[u8] {
        self.private_key.expose_secret()
    }
}
