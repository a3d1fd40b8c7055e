use std::fmt;
use std::ops::Deref;

use abscissa_core::error::{BoxError, Context};

use crate::components::keystore::KeystoreError;

/// The kinds of error surfaced by the keyserver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// An error with no more specific classification.
    Generic,
    /// The application or one of its components could not be initialized.
    Init,
    /// The underlying store rejected a read, write, or lock.
    Store,
    /// A key-pairing or ingestion request was rejected.
    Keystore(KeystoreError),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Generic => write!(f, "Error"),
            ErrorKind::Init => write!(f, "Failed to initialize keyserver"),
            ErrorKind::Store => write!(f, "Database error"),
            ErrorKind::Keystore(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ErrorKind {}

impl ErrorKind {
    /// Creates an error context from this error.
    pub(crate) fn context(self, source: impl Into<BoxError>) -> Context<ErrorKind> {
        Context::new(self, Some(source.into()))
    }
}

/// Error type
#[derive(Debug)]
pub struct Error(Box<Context<ErrorKind>>);

impl Error {
    /// Returns the key-pairing condition behind this error, if it is one.
    ///
    /// Callers use this to pick an external response without inspecting store
    /// failures.
    pub fn keystore_error(&self) -> Option<&KeystoreError> {
        match self.kind() {
            ErrorKind::Keystore(e) => Some(e),
            _ => None,
        }
    }
}

impl Deref for Error {
    type Target = Context<ErrorKind>;

    fn deref(&self) -> &Context<ErrorKind> {
        &self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Context::new(kind, None).into()
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(context: Context<ErrorKind>) -> Self {
        Error(Box::new(context))
    }
}

impl From<KeystoreError> for Error {
    fn from(e: KeystoreError) -> Self {
        ErrorKind::Keystore(e).into()
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        ErrorKind::Store.context(e).into()
    }
}
