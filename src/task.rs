//! Refresh loop and the handle of the task running it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, spawn_blocking};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RefreshConfig;
use crate::diagnostics::{Diagnostic, report};
use crate::error::{CredsError, Result};

/// Sleeps for `dur` unless `token` fires first. Returns `true` if cancelled.
pub(crate) async fn sleep_or_cancel(token: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => true,
        () = tokio::time::sleep(dur) => false,
    }
}

/// Runs `tick` every `config.period` until `cancel` fires.
///
/// Each tick runs on the blocking thread pool, so a slow provider never stalls
/// the runtime threads that sign requests. The period is measured from the end
/// of the previous tick. Tick failures go to the diagnostics sink and never stop
/// the loop. A tick in progress is not interrupted by cancellation.
pub(crate) async fn refresh_loop<T, F>(
    component: &'static str,
    cancel: &CancellationToken,
    config: &RefreshConfig,
    tick: F,
) where
    F: Fn() -> Result<T> + Send + Sync + 'static,
    T: Send + 'static,
{
    info!(
        component,
        period_secs = config.period.as_secs(),
        "starting credential refresh loop"
    );

    let tick = Arc::new(tick);
    loop {
        if sleep_or_cancel(cancel, config.period).await {
            info!(component, "cancellation received; stopping credential refresh loop");
            return;
        }

        let tick = Arc::clone(&tick);
        let outcome = spawn_blocking(move || (*tick)())
            .await
            .unwrap_or_else(|e| {
                Err(CredsError::Credential(format!(
                    "credential provider panicked: {e}"
                )))
            });
        match outcome {
            Ok(_) => debug!(component, "credential refresh tick succeeded"),
            Err(error) => report(&*config.sink, Diagnostic::RefreshFailed { error: &error }),
        }
    }
}

/// Owned handle of a background refresh task.
///
/// Dropping the handle cancels the loop without waiting for it.
#[derive(Debug)]
pub struct RefreshTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RefreshTask {
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signals the loop to stop after the current tick, without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancels the loop and waits for it to return.
    ///
    /// Waits as long as a tick in progress takes; see
    /// [`RefreshTask::shutdown_with_timeout`] for a bounded wait.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "error joining credential refresh task during shutdown");
        }
    }

    /// Cancels the loop and waits up to `timeout` for it to return, aborting it
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CredsError::ShutdownTimeout`] if the task had to be aborted.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<()> {
        self.cancel.cancel();
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "error joining credential refresh task during shutdown");
                Ok(())
            }
            Err(_) => {
                warn!("shutdown timeout exceeded; aborting credential refresh task");
                handle.abort();
                let _ = handle.await;
                Err(CredsError::ShutdownTimeout)
            }
        }
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn sleep_or_cancel_elapses() {
        let token = CancellationToken::new();
        assert!(!sleep_or_cancel(&token, Duration::from_secs(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_or_cancel_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(sleep_or_cancel(&token, Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ticks_every_period_and_stops_on_cancel() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let config = RefreshConfig::default().with_period(Duration::from_secs(60));

        let counter = Arc::clone(&ticks);
        let task = RefreshTask::spawn(move |token| async move {
            refresh_loop("test", &token, &config, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        });

        tokio::time::sleep(Duration::from_secs(60 * 3 + 30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        task.shutdown().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tick_does_not_stop_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let config = RefreshConfig::default().with_period(Duration::from_secs(60));

        let counter = Arc::clone(&ticks);
        let task = RefreshTask::spawn(move |token| async move {
            refresh_loop("test", &token, &config, move || -> Result<()> {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("provider bug");
                }
                Ok(())
            })
            .await;
        });

        tokio::time::sleep(Duration::from_secs(60 * 2 + 30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert!(!task.is_finished());
        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_task_cancels_loop() {
        let config = RefreshConfig::default().with_period(Duration::from_secs(1));
        let task = RefreshTask::spawn(move |token| async move {
            refresh_loop("test", &token, &config, || Ok(())).await;
        });
        let token = task.cancel_token();
        drop(task);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_with_timeout_aborts_stuck_task() {
        let task = RefreshTask::spawn(|_token| async {
            std::future::pending::<()>().await;
        });
        let result = task.shutdown_with_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CredsError::ShutdownTimeout)));
    }

    #[tokio::test]
    async fn shutdown_with_timeout_returns_ok_for_cooperative_task() {
        let task = RefreshTask::spawn(|token| async move {
            token.cancelled().await;
        });
        assert!(!task.is_finished());
        task.shutdown_with_timeout(Duration::from_secs(5))
            .await
            .unwrap();
    }
}
