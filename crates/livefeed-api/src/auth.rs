// Bearer credential sources.
//
// The stream layer never owns token lifecycle. It asks a provider for the
// current token once per connection attempt and tells it when the server
// rejected one; refreshing happens elsewhere.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use secrecy::SecretString;

use crate::error::Error;

/// Source of the bearer token attached to each stream request.
///
/// Implementations must be cheap to call: the token is re-read on every
/// (re)connection attempt because it may have rotated in the meantime.
pub trait CredentialProvider: Send + Sync {
    /// The token to use for the next request.
    fn current_token(&self) -> Result<SecretString, Error>;

    /// Called after the server rejected the token returned by
    /// [`current_token`](Self::current_token). Default: no-op.
    fn rejected(&self) {}
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Result<SecretString, Error> + Send + Sync,
{
    fn current_token(&self) -> Result<SecretString, Error> {
        self()
    }
}

// ── StaticToken ──────────────────────────────────────────────────────

/// A token that never changes for the lifetime of the process.
#[derive(Clone)]
pub struct StaticToken(SecretString);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl From<SecretString> for StaticToken {
    fn from(token: SecretString) -> Self {
        Self(token)
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken([REDACTED])")
    }
}

impl CredentialProvider for StaticToken {
    fn current_token(&self) -> Result<SecretString, Error> {
        Ok(self.0.clone())
    }
}

// ── SharedToken ──────────────────────────────────────────────────────

/// A rotatable token cell.
///
/// An external refresher calls [`rotate`](Self::rotate); every connection
/// attempt after that picks up the new value. Reads are lock-free.
#[derive(Clone)]
pub struct SharedToken {
    cell: Arc<ArcSwap<Option<SecretString>>>,
}

impl SharedToken {
    /// Create a cell holding `token`.
    pub fn new(token: SecretString) -> Self {
        Self {
            cell: Arc::new(ArcSwap::from_pointee(Some(token))),
        }
    }

    /// Create a cell with no token yet. Connection attempts fail with
    /// [`Error::Credentials`] until [`rotate`](Self::rotate) is called.
    pub fn empty() -> Self {
        Self {
            cell: Arc::new(ArcSwap::from_pointee(None)),
        }
    }

    /// Replace the current token.
    pub fn rotate(&self, token: SecretString) {
        self.cell.store(Arc::new(Some(token)));
        tracing::debug!("bearer token rotated");
    }

    /// Forget the current token.
    pub fn clear(&self) {
        self.cell.store(Arc::new(None));
    }
}

impl fmt::Debug for SharedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = self.cell.load().is_some();
        f.debug_struct("SharedToken").field("present", &present).finish()
    }
}

impl CredentialProvider for SharedToken {
    fn current_token(&self) -> Result<SecretString, Error> {
        (**self.cell.load())
            .clone()
            .ok_or_else(|| Error::Credentials {
                message: "token cell is empty".into(),
            })
    }
}
