//! Lazily populated credential shared between a client and its refresher.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::credential::{Credential, CredentialProvider};
use crate::error::Result;

/// Shared, lazily fetched credential.
///
/// Consumers call [`get`](Self::get) on every request. It serves the cached
/// value for as long as that value has not expired, even when it is close to
/// expiry, so request paths only reach the provider when nothing usable is
/// cached. A [`Refresher`](crate::Refresher) renews the value in the background.
pub struct CredentialHandle {
    provider: Box<dyn CredentialProvider>,
    current: ArcSwapOption<Credential>,
}

impl CredentialHandle {
    pub fn new<P>(provider: P) -> Self
    where
        P: CredentialProvider + 'static,
    {
        Self {
            provider: Box::new(provider),
            current: ArcSwapOption::empty(),
        }
    }

    /// Returns the cached credential unless it is missing or expired, in which
    /// case a new one is fetched.
    ///
    /// # Errors
    ///
    /// Fails only when no unexpired credential is cached and fetching a new one
    /// fails.
    pub fn get(&self) -> Result<Arc<Credential>> {
        if let Some(credential) = self.current.load_full()
            && !credential.is_expired()
        {
            return Ok(credential);
        }
        self.refresh()
    }

    /// Fetches and validates a new credential and caches it.
    ///
    /// On failure the previously cached credential stays in place.
    pub fn refresh(&self) -> Result<Arc<Credential>> {
        let credential = self.provider.resolve()?;
        credential.validate()?;

        let credential = Arc::new(credential);
        self.current.store(Some(Arc::clone(&credential)));
        debug!(access_key_id = %credential.access_key_id, "credential handle refreshed");
        Ok(credential)
    }

    /// Returns the cached credential without contacting the provider.
    pub fn cached(&self) -> Option<Arc<Credential>> {
        self.current.load_full()
    }

    /// Drops the cached credential so that the next `get` refetches.
    pub fn expire(&self) {
        self.current.store(None);
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("current", &self.cached())
            .finish()
    }
}
