use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::{DiagnosticsSink, NopSink};
use crate::error::{CredsError, Result};

/// Default period between refresh attempts.
///
/// Temporary credentials commonly rotate hourly; 55 minutes keeps a fresh value
/// published before the previous one lapses.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(55 * 60);

/// Options shared by [`Refresher`](crate::Refresher) and [`Swapper`](crate::Swapper).
#[derive(Clone)]
pub struct RefreshConfig {
    /// Time between the end of one refresh attempt and the start of the next.
    pub period: Duration,

    /// Receives refresh and swap failures.
    pub sink: Arc<dyn DiagnosticsSink>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_REFRESH_PERIOD,
            sink: Arc::new(NopSink),
        }
    }
}

impl RefreshConfig {
    /// Sets the refresh period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Sets the diagnostics sink.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(CredsError::Config("refresh period must be non-zero".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for RefreshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshConfig")
            .field("period", &self.period)
            .field("sink", &"<dyn DiagnosticsSink>")
            .finish()
    }
}
