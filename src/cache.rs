//! Single-writer, many-reader credential cell.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use tokio::sync::watch;

use crate::credential::Credential;

/// Atomically replaced, last-known-good credential.
///
/// Readers never block and never observe a partially built value: a load
/// returns either `None` (nothing published yet) or an `Arc` to a credential
/// that was complete when it was published. A loaded `Arc` keeps its value
/// alive after it has been superseded.
pub struct CredentialCache {
    current: ArcSwapOption<Credential>,
    // Number of publishes so far.
    version: AtomicU64,
    update_tx: watch::Sender<u64>,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        let (update_tx, _) = watch::channel(0u64);
        Self {
            current: ArcSwapOption::empty(),
            version: AtomicU64::new(0),
            update_tx,
        }
    }

    /// Returns the current credential, if one was published.
    pub fn load(&self) -> Option<Arc<Credential>> {
        self.current.load_full()
    }

    /// Replaces the current credential and returns the new version.
    pub fn publish(&self, credential: Arc<Credential>) -> u64 {
        self.current.store(Some(credential));
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.update_tx.send_replace(version);
        version
    }

    /// Number of successful publishes so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }

    /// Subscribes to publish notifications.
    pub fn updated(&self) -> CredentialUpdates {
        CredentialUpdates {
            rx: self.update_tx.subscribe(),
        }
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("current", &self.load())
            .field("version", &self.version())
            .finish()
    }
}

/// Handle for receiving publish notifications from a [`CredentialCache`].
///
/// Slow receivers may skip intermediate versions; they always observe the latest.
#[derive(Clone, Debug)]
pub struct CredentialUpdates {
    rx: watch::Receiver<u64>,
}

impl CredentialUpdates {
    /// Waits for the next publish and returns its version.
    ///
    /// Returns `None` once the cache has been dropped.
    pub async fn changed(&mut self) -> Option<u64> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Version seen by this receiver most recently.
    pub fn last(&self) -> u64 {
        *self.rx.borrow()
    }
}
