//! Cache-and-swap: rebuilds credentials on a timer and hands the latest one
//! to every attached signing pipeline without locking.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CredentialCache, CredentialUpdates};
use crate::config::RefreshConfig;
use crate::credential::{Credential, CredentialProvider, EnvProvider};
use crate::diagnostics::{Diagnostic, DiagnosticsSink, report};
use crate::error::{CredsError, Result};
use crate::signer::{SIGN_REQUEST_STEP, Signer, SignerOption, SigningPipeline};
use crate::task::{RefreshTask, refresh_loop};

/// Periodically swaps the credentials used by attached clients.
///
/// Each tick calls the credential factory, validates the result and publishes
/// it into a [`CredentialCache`]. A failed tick leaves the previously published
/// credential in place. Signing hooks installed with [`Swapper::attach`] read
/// the cache on every request.
///
/// Cloning a `Swapper` shares the same cache.
///
/// # Example
///
/// ```no_run
/// use rs_ali_creds::{JsonFileProvider, SignHandlers, Swapper, CredentialProvider};
/// use std::time::Duration;
///
/// # async fn example() -> rs_ali_creds::Result<()> {
/// let swapper = Swapper::builder()
///     .provider(|| JsonFileProvider::new("/var/run/secrets/sts.json").resolve())
///     .period(Duration::from_secs(15 * 60))
///     .build()?;
///
/// let pipeline = SignHandlers::with_sign_request();
/// assert!(swapper.attach(&pipeline, Vec::new()));
///
/// let task = swapper.spawn();
/// // ... issue requests through clients using `pipeline` ...
/// task.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Swapper {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Box<dyn CredentialProvider>,
    cache: CredentialCache,
    config: RefreshConfig,
    // Set while a refresh loop owns the cache.
    running: AtomicBool,
}

impl Swapper {
    pub fn builder() -> SwapperBuilder {
        SwapperBuilder::default()
    }

    /// Creates a swapper and publishes its first credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredsError::Config`] for an invalid configuration, or the error
    /// of the first refresh ([`CredsError::Factory`] / [`CredsError::Retrieve`]).
    pub fn new<P>(provider: P, config: RefreshConfig) -> Result<Self>
    where
        P: CredentialProvider + 'static,
    {
        Self::build_with(Box::new(provider), config)
    }

    /// Creates a swapper that re-reads the `ALIBABA_CLOUD_*` environment
    /// variables on every tick.
    pub fn from_env(config: RefreshConfig) -> Result<Self> {
        Self::new(EnvProvider, config)
    }

    fn build_with(provider: Box<dyn CredentialProvider>, config: RefreshConfig) -> Result<Self> {
        config.validate()?;
        let inner = Inner {
            provider,
            cache: CredentialCache::new(),
            config,
            running: AtomicBool::new(false),
        };
        inner.refresh()?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The currently published credential.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.inner.cache.load()
    }

    /// Number of credentials published so far, including the initial one.
    ///
    /// The counter is bumped right after the credential is swapped in, so it may
    /// briefly lag behind [`Swapper::current`].
    pub fn version(&self) -> u64 {
        self.inner.cache.version()
    }

    /// Subscribes to publish notifications.
    pub fn updated(&self) -> CredentialUpdates {
        self.inner.cache.updated()
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    /// Rebuilds and publishes the credential every period until `cancel` fires.
    ///
    /// Only one loop runs per swapper, clones included. If another loop is
    /// already running this logs a warning and returns immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(_running) = RunningGuard::acquire(&self.inner.running) else {
            warn!("credential swapper loop already running; not starting another");
            return;
        };
        let inner = Arc::clone(&self.inner);
        refresh_loop("swapper", &cancel, &self.inner.config, move || inner.refresh()).await;
    }

    /// Runs [`Swapper::run`] on a new tokio task.
    ///
    /// The returned task finishes at once if a loop is already running.
    pub fn spawn(&self) -> RefreshTask {
        let this = self.clone();
        RefreshTask::spawn(move |cancel| async move { this.run(cancel).await })
    }

    /// Installs a credential-swapping hook into the client's
    /// [`SIGN_REQUEST_STEP`] step.
    ///
    /// `options` are applied first, then the hook sets the signer's credential to
    /// the currently published one. If nothing is published the hook reports
    /// [`Diagnostic::SwapFailed`] and keeps the signer's credential.
    ///
    /// Options must suit the service the client talks to (object storage, for
    /// instance, signs raw URI paths).
    ///
    /// Returns `false` if the client has no such step; the swapper is unaffected.
    pub fn attach<C>(&self, client: &C, mut options: Vec<SignerOption>) -> bool
    where
        C: SigningPipeline + ?Sized,
    {
        let inner = Arc::clone(&self.inner);
        options.push(Arc::new(move |signer: &mut Signer| inner.swap_into(signer)));

        let attached = client.swap_named(SIGN_REQUEST_STEP, options);
        if !attached {
            warn!(step = SIGN_REQUEST_STEP, "signing pipeline has no such step; not attached");
        }
        attached
    }
}

impl Inner {
    fn refresh(&self) -> Result<Arc<Credential>> {
        let credential = self.provider.resolve().map_err(CredsError::factory)?;
        credential.validate().map_err(CredsError::retrieve)?;

        let credential = Arc::new(credential);
        let version = self.cache.publish(Arc::clone(&credential));
        debug!(
            version,
            access_key_id = %credential.access_key_id,
            "published new credentials"
        );
        Ok(credential)
    }

    fn swap_into(&self, signer: &mut Signer) {
        match self.cache.load() {
            Some(credential) => signer.credential = Some(credential),
            None => report(&*self.config.sink, Diagnostic::SwapFailed),
        }
    }
}

/// Marks the swapper's loop as running until dropped.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Swapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swapper")
            .field("cache", &self.inner.cache)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Builder for [`Swapper`].
#[derive(Default)]
pub struct SwapperBuilder {
    provider: Option<Box<dyn CredentialProvider>>,
    config: RefreshConfig,
}

impl SwapperBuilder {
    /// Sets the credential factory called on construction and on every tick.
    pub fn provider<P>(mut self, provider: P) -> Self
    where
        P: CredentialProvider + 'static,
    {
        self.provider = Some(Box::new(provider));
        self
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

    /// Builds the swapper and publishes its first credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredsError::Config`] if no provider was set, otherwise the errors
    /// of [`Swapper::new`].
    pub fn build(self) -> Result<Swapper> {
        let provider = self
            .provider
            .ok_or_else(|| CredsError::Config("credential provider is required".into()))?;
        Swapper::build_with(provider, self.config)
    }
}
