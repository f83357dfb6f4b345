//! Signing-pipeline capability that credential hooks attach to.
//!
//! The signing algorithm is owned by the client; this module only models the
//! signer a client materializes per request and the named steps that tune it.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::credential::Credential;

/// Name of the step that materializes the request signer.
pub const SIGN_REQUEST_STEP: &str = "sign.request";

/// Signer state materialized for one outgoing request.
#[derive(Clone, Debug, Default)]
pub struct Signer {
    /// Credential the request will be signed with.
    pub credential: Option<Arc<Credential>>,
    pub service: String,
    pub region: String,
    /// Skip escaping of the URI path (object storage services sign raw paths).
    pub disable_uri_path_escaping: bool,
    /// Sign without hashing the payload.
    pub unsigned_payload: bool,
}

impl Signer {
    pub fn new(service: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            region: region.into(),
            ..Self::default()
        }
    }

    pub fn with_credential(mut self, credential: Arc<Credential>) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// Tunes a [`Signer`] right before it signs a request.
pub type SignerOption = Arc<dyn Fn(&mut Signer) + Send + Sync>;

/// Wraps a closure as a [`SignerOption`].
pub fn signer_option<F>(f: F) -> SignerOption
where
    F: Fn(&mut Signer) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A client whose signing pipeline accepts pre-signing interceptors.
pub trait SigningPipeline {
    /// Replaces the options of the step called `name`.
    ///
    /// Returns `false` if the pipeline has no such step.
    fn swap_named(&self, name: &str, options: Vec<SignerOption>) -> bool;
}

struct SignStep {
    name: String,
    options: Vec<SignerOption>,
}

/// Named signing steps a client can embed to implement [`SigningPipeline`].
///
/// The step list is swapped atomically, so materializing a signer on the
/// request path never waits for a concurrent `swap_named`.
pub struct SignHandlers {
    steps: ArcSwap<Vec<Arc<SignStep>>>,
}

impl Default for SignHandlers {
    fn default() -> Self {
        Self::new()
    }
}

impl SignHandlers {
    /// Creates a pipeline without any steps.
    pub fn new() -> Self {
        Self {
            steps: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Creates a pipeline with an empty [`SIGN_REQUEST_STEP`].
    pub fn with_sign_request() -> Self {
        let handlers = Self::new();
        handlers.push_named(SIGN_REQUEST_STEP, Vec::new());
        handlers
    }

    /// Appends a named step.
    pub fn push_named(&self, name: impl Into<String>, options: Vec<SignerOption>) {
        let step = Arc::new(SignStep {
            name: name.into(),
            options,
        });
        self.steps.rcu(|steps| {
            let mut next = Vec::clone(steps);
            next.push(Arc::clone(&step));
            next
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.load().iter().any(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.steps.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.load().is_empty()
    }

    /// Applies the options of step `name` to `base` in order.
    ///
    /// Returns `None` if the step does not exist.
    pub fn signer(&self, name: &str, base: Signer) -> Option<Signer> {
        let steps = self.steps.load();
        let step = steps.iter().find(|s| s.name == name)?;
        let mut signer = base;
        for option in &step.options {
            option(&mut signer);
        }
        Some(signer)
    }
}

impl SigningPipeline for SignHandlers {
    fn swap_named(&self, name: &str, options: Vec<SignerOption>) -> bool {
        let mut swapped = false;
        self.steps.rcu(|steps| {
            swapped = false;
            let mut next = Vec::clone(steps);
            if let Some(slot) = next.iter_mut().find(|s| s.name == name) {
                *slot = Arc::new(SignStep {
                    name: name.to_string(),
                    options: options.clone(),
                });
                swapped = true;
            }
            next
        });
        swapped
    }
}

impl fmt::Debug for SignHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps = self.steps.load();
        f.debug_list()
            .entries(steps.iter().map(|s| (&s.name, s.options.len())))
            .finish()
    }
}
