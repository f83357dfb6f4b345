//! Single-value refresher: keeps a shared [`CredentialHandle`] fresh in place.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RefreshConfig;
use crate::credential::CredentialProvider;
use crate::diagnostics::DiagnosticsSink;
use crate::error::{CredsError, Result};
use crate::handle::CredentialHandle;
use crate::task::{RefreshTask, refresh_loop};

/// Periodically refreshes a [`CredentialHandle`] so that request paths reading
/// it never pay for a credential fetch.
///
/// Construction fetches once synchronously to surface misconfiguration early.
/// Refresh failures after that are reported and the last good credential stays
/// in effect.
///
/// Share the same handle with the client, e.g. via [`Refresher::handle`].
#[derive(Clone, Debug)]
pub struct Refresher {
    handle: Arc<CredentialHandle>,
    config: RefreshConfig,
}

impl Refresher {
    pub fn builder() -> RefresherBuilder {
        RefresherBuilder::default()
    }

    /// Creates a refresher and immediately retrieves the handle's credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredsError::Config`] for an invalid configuration and
    /// [`CredsError::Retrieve`] if the initial retrieval fails.
    pub fn new(handle: Arc<CredentialHandle>, config: RefreshConfig) -> Result<Self> {
        config.validate()?;
        let credential = handle.get().map_err(CredsError::retrieve)?;
        debug!(access_key_id = %credential.access_key_id, "refresher validated initial credential");
        Ok(Self { handle, config })
    }

    /// The handle kept fresh by this refresher.
    pub fn handle(&self) -> &Arc<CredentialHandle> {
        &self.handle
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Refreshes the handle every period until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let handle = Arc::clone(&self.handle);
        refresh_loop("refresher", &cancel, &self.config, move || handle.refresh()).await;
    }

    /// Runs [`Refresher::run`] on a new tokio task.
    pub fn spawn(&self) -> RefreshTask {
        let this = self.clone();
        RefreshTask::spawn(move |cancel| async move { this.run(cancel).await })
    }
}

/// Builder for [`Refresher`].
#[derive(Default)]
pub struct RefresherBuilder {
    handle: Option<Arc<CredentialHandle>>,
    config: RefreshConfig,
}

impl RefresherBuilder {
    /// Sets the handle to refresh.
    pub fn handle(mut self, handle: Arc<CredentialHandle>) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Wraps `provider` in a new [`CredentialHandle`].
    pub fn provider<P>(self, provider: P) -> Self
    where
        P: CredentialProvider + 'static,
    {
        self.handle(Arc::new(CredentialHandle::new(provider)))
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.config.period = period;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.config.sink = sink;
        self
    }

    pub fn config(mut self, config: RefreshConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the refresher, retrieving the credential once.
    ///
    /// # Errors
    ///
    /// Returns [`CredsError::Config`] if no handle was set, otherwise the errors of
    /// [`Refresher::new`].
    pub fn build(self) -> Result<Refresher> {
        let handle = self
            .handle
            .ok_or_else(|| CredsError::Config("credential handle is required".into()))?;
        Refresher::new(handle, self.config)
    }
}
