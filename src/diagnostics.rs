//! Pluggable diagnostics for refresh and swap failures.
//!
//! Every diagnostic is also emitted as a `tracing` event; the sink exists for
//! callers that route these failures elsewhere (alerts, counters, tests).

use crate::error::CredsError;

/// A failure observed by the background refresh loop or a signing hook.
///
/// Both kinds are logged at `WARN`.
#[derive(Debug)]
#[non_exhaustive]
pub enum Diagnostic<'a> {
    /// A tick failed to obtain or validate a new credential. The previous
    /// credential stays in effect.
    RefreshFailed { error: &'a CredsError },

    /// A signing hook found no published credential. The signer keeps the
    /// credential it already had.
    SwapFailed,
}

impl Diagnostic<'_> {
    /// Stable human-readable message.
    pub fn message(&self) -> &'static str {
        match self {
            Diagnostic::RefreshFailed { .. } => "failed to refresh credentials",
            Diagnostic::SwapFailed => "failed to swap credentials",
        }
    }

    /// The underlying error, if any.
    pub fn error(&self) -> Option<&CredsError> {
        match self {
            Diagnostic::RefreshFailed { error } => Some(*error),
            Diagnostic::SwapFailed => None,
        }
    }
}

/// Receives diagnostics from refreshers, swappers and their signing hooks.
///
/// Implementations are called from the refresh task and from request-signing
/// paths, so they must be cheap and must not block.
pub trait DiagnosticsSink: Send + Sync + 'static {
    fn record(&self, diagnostic: &Diagnostic<'_>);
}

/// Sink that discards everything. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSink;

impl DiagnosticsSink for NopSink {
    fn record(&self, _diagnostic: &Diagnostic<'_>) {}
}

pub(crate) fn report(sink: &dyn DiagnosticsSink, diagnostic: Diagnostic<'_>) {
    match diagnostic.error() {
        Some(error) => tracing::warn!(error = %error, "{}", diagnostic.message()),
        None => tracing::warn!("{}", diagnostic.message()),
    }
    sink.record(&diagnostic);
}
