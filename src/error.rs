use thiserror::Error;

/// Errors that can occur while resolving, validating or refreshing credentials.
#[derive(Debug, Error)]
pub enum CredsError {
    /// A provider could not produce a credential.
    #[error("credential error: {0}")]
    Credential(String),

    /// Invalid configuration, or a required component is missing.
    #[error("config error: {0}")]
    Config(String),

    /// A credential was produced but is not usable for signing.
    #[error("validation error: {0}")]
    Validation(String),

    /// The credential factory failed during a refresh.
    #[error("failed to create new credentials: {0}")]
    Factory(#[source] Box<CredsError>),

    /// A freshly created credential could not be retrieved or validated.
    #[error("failed to retrieve credentials value: {0}")]
    Retrieve(#[source] Box<CredsError>),

    /// JSON credential document could not be parsed.
    #[error("deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// The background refresh task did not stop within the given timeout.
    #[error("shutdown timeout exceeded")]
    ShutdownTimeout,
}

impl CredsError {
    /// Returns `true` if the next refresh attempt may succeed without any change
    /// in configuration.
    ///
    /// Provider failures (unreadable files, unset variables that a sidecar may
    /// still write) are retryable. Validation and configuration errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            CredsError::Credential(_) => true,
            CredsError::Factory(inner) | CredsError::Retrieve(inner) => inner.is_retryable(),

            CredsError::Config(_)
            | CredsError::Validation(_)
            | CredsError::Deserialize(_)
            | CredsError::ShutdownTimeout => false,
        }
    }

    pub(crate) fn factory(err: CredsError) -> Self {
        CredsError::Factory(Box::new(err))
    }

    pub(crate) fn retrieve(err: CredsError) -> Self {
        CredsError::Retrieve(Box::new(err))
    }
}

/// A specialized Result type for credential operations.
pub type Result<T> = std::result::Result<T, CredsError>;
