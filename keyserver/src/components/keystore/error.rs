use std::fmt;

/// A request that the key store rejected because of the state of its records.
///
/// These are distinct from store failures, which surface as [`ErrorKind::Store`].
///
/// [`ErrorKind::Store`]: crate::error::ErrorKind::Store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeystoreError {
    /// The application public key has already been bound to a server key pair.
    DuplicateKey,
    /// The one-time code is unknown, already claimed, or expired.
    InvalidOneTimeCode,
    /// The device hash has already been used to claim a key pair.
    UsedHashId,
    /// No claimed, unexpired key pair is bound to the application public key.
    UnknownAppPublicKey,
    /// The key pair's diagnosis key upload quota is exhausted.
    KeysConsumed,
    /// The upload contains more diagnosis keys than the key pair's remaining quota.
    TooManyKeys,
}

impl fmt::Display for KeystoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateKey => write!(f, "Application public key is already registered"),
            Self::InvalidOneTimeCode => write!(f, "Invalid or expired one-time code"),
            Self::UsedHashId => write!(f, "Device hash has already been used to claim a key"),
            Self::UnknownAppPublicKey => write!(f, "No valid key pair for application public key"),
            Self::KeysConsumed => write!(f, "Diagnosis key upload quota is exhausted"),
            Self::TooManyKeys => write!(f, "Too many diagnosis keys for remaining quota"),
        }
    }
}

impl std::error::Error for KeystoreError {}
