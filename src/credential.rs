use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{CredsError, Result};

/// Alibaba Cloud access credential, optionally temporary.
///
/// Values are immutable once published; the refresh machinery shares them as
/// `Arc<Credential>` and replaces them wholesale.
///
/// The `Debug` implementation redacts `access_key_secret` and `security_token`
/// to prevent accidental leakage in logs.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credential {
    pub access_key_id: String,
    pub access_key_secret: String,
    /// STS security token, present for temporary credentials.
    #[serde(default)]
    pub security_token: Option<String>,
    /// Expiration instant, present for temporary credentials.
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

impl Credential {
    /// Creates a long-term AccessKey credential without expiry.
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            security_token: None,
            expiration: None,
        }
    }

    /// Attaches an STS security token.
    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = Some(token.into());
        self
    }

    /// Sets the expiration instant.
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Checks if the credential has expired.
    ///
    /// Credentials without an expiration never expire.
    pub fn is_expired(&self) -> bool {
        match self.expiration {
            Some(exp) => Utc::now() >= exp,
            None => false,
        }
    }

    /// Returns the remaining time until expiration.
    ///
    /// Returns `None` for credentials without an expiration or already expired ones.
    pub fn time_to_expiry(&self) -> Option<Duration> {
        let exp = self.expiration?;
        (exp - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Returns `true` if the credential expires within `window` from now.
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.expiration {
            Some(_) => self.time_to_expiry().is_none_or(|left| left <= window),
            None => false,
        }
    }

    /// Cheap usability probe run before a credential is published.
    pub fn validate(&self) -> Result<()> {
        if self.access_key_id.is_empty() || self.access_key_secret.is_empty() {
            return Err(CredsError::Validation(
                "access_key_id or access_key_secret is empty".into(),
            ));
        }
        if let Some(exp) = self.expiration
            && self.is_expired()
        {
            return Err(CredsError::Validation(format!(
                "credential {} expired at {}",
                self.access_key_id,
                exp.to_rfc3339()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"****")
            .field("security_token", &self.security_token.as_ref().map(|_| "****"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Resolves a [`Credential`] from a specific source.
///
/// Each call is treated as producing a fresh logical value. Implementations may
/// block: the refresh loops call them on tokio's blocking pool, and construction
/// calls them on the caller's thread.
///
/// Any `Fn() -> Result<Credential>` closure is a provider, which lets a factory
/// rebuild its underlying source on every call. A plain [`Credential`] is a
/// provider that always yields itself.
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self) -> Result<Credential>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Result<Credential> + Send + Sync,
{
    fn resolve(&self) -> Result<Credential> {
        self()
    }
}

impl CredentialProvider for Credential {
    fn resolve(&self) -> Result<Credential> {
        Ok(self.clone())
    }
}

const ENV_ACCESS_KEY_ID: &str = "ALIBABA_CLOUD_ACCESS_KEY_ID";
const ENV_ACCESS_KEY_SECRET: &str = "ALIBABA_CLOUD_ACCESS_KEY_SECRET";
const ENV_SECURITY_TOKEN: &str = "ALIBABA_CLOUD_SECURITY_TOKEN";

/// Reads the credential from the process environment on every call.
///
/// `ALIBABA_CLOUD_ACCESS_KEY_ID` and `ALIBABA_CLOUD_ACCESS_KEY_SECRET` are
/// required; `ALIBABA_CLOUD_SECURITY_TOKEN` is picked up when present, so a
/// supervisor that rotates the environment of a long-lived process is honored.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvProvider;

impl EnvProvider {
    fn required(name: &str) -> Result<String> {
        match env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) => Err(CredsError::Credential(format!("{name} is empty"))),
            Err(_) => Err(CredsError::Credential(format!("{name} not set"))),
        }
    }
}

impl CredentialProvider for EnvProvider {
    fn resolve(&self) -> Result<Credential> {
        let credential = Credential::new(
            Self::required(ENV_ACCESS_KEY_ID)?,
            Self::required(ENV_ACCESS_KEY_SECRET)?,
        );
        Ok(match env::var(ENV_SECURITY_TOKEN) {
            Ok(token) if !token.is_empty() => credential.with_security_token(token),
            _ => credential,
        })
    }
}

/// Provides a credential from a JSON document re-read on every call.
///
/// The document uses the STS response field names:
///
/// ```json
/// {
///   "AccessKeyId": "STS.xxx",
///   "AccessKeySecret": "yyy",
///   "SecurityToken": "zzz",
///   "Expiration": "2024-01-01T01:00:00Z"
/// }
/// ```
///
/// This suits deployments where a sidecar rotates temporary credentials on disk.
pub struct JsonFileProvider {
    path: PathBuf,
}

impl JsonFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for JsonFileProvider {
    fn resolve(&self) -> Result<Credential> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            CredsError::Credential(format!(
                "cannot read credentials document {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Falls back through a list of providers, returning the first credential
/// resolved.
///
/// ```
/// use rs_ali_creds::{ChainProvider, EnvProvider, JsonFileProvider};
///
/// let chain = ChainProvider::new()
///     .or(EnvProvider)
///     .or(JsonFileProvider::new("/var/run/secrets/sts.json"));
/// ```
#[derive(Default)]
pub struct ChainProvider {
    links: Vec<Box<dyn CredentialProvider>>,
}

impl ChainProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider tried after all previous ones failed.
    pub fn or<P>(mut self, provider: P) -> Self
    where
        P: CredentialProvider + 'static,
    {
        self.links.push(Box::new(provider));
        self
    }
}

impl CredentialProvider for ChainProvider {
    fn resolve(&self) -> Result<Credential> {
        let mut failures = Vec::with_capacity(self.links.len());
        for link in &self.links {
            match link.resolve() {
                Ok(credential) => return Ok(credential),
                Err(e) => failures.push(e.to_string()),
            }
        }
        if failures.is_empty() {
            return Err(CredsError::Config("credential chain is empty".into()));
        }
        Err(CredsError::Credential(format!(
            "no provider in the chain resolved a credential: {}",
            failures.join("; ")
        )))
    }
}
