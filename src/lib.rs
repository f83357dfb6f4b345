//! Background credential refresh for Alibaba Cloud API clients.
//!
//! Temporary credentials expire, and fetching new ones inside a request adds a
//! round trip to that request's latency. This crate keeps credentials fresh on
//! a background task and hands them to request signers without locking:
//!
//! - [`Refresher`] refreshes a shared [`CredentialHandle`] in place. Use it when
//!   the client already holds the handle and reads it on every request.
//! - [`Swapper`] rebuilds credentials from a factory ([`CredentialProvider`]) on
//!   every tick, publishes them into a [`CredentialCache`], and installs a hook
//!   into the signing step of any number of clients ([`Swapper::attach`]).
//!
//! Both validate once on construction, then refresh every
//! [`RefreshConfig::period`] (55 minutes by default) until cancelled. A failed
//! refresh is reported to the [`DiagnosticsSink`] and to `tracing`, and the last
//! good credential stays in use.
//!
//! # Quick Start
//!
//! ```no_run
//! use rs_ali_creds::{EnvProvider, RefreshConfig, SignHandlers, Swapper};
//!
//! # async fn example() -> rs_ali_creds::Result<()> {
//! let swapper = Swapper::new(EnvProvider, RefreshConfig::default())?;
//!
//! // Any client exposing a "sign.request" step can be attached.
//! let pipeline = SignHandlers::with_sign_request();
//! swapper.attach(&pipeline, Vec::new());
//!
//! let task = swapper.spawn();
//! // ...
//! task.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod credential;
pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod refresher;
pub mod signer;
pub mod swapper;

mod task;

pub use cache::{CredentialCache, CredentialUpdates};
pub use config::{DEFAULT_REFRESH_PERIOD, RefreshConfig};
pub use credential::{
    ChainProvider, Credential, CredentialProvider, EnvProvider, JsonFileProvider,
};
pub use diagnostics::{Diagnostic, DiagnosticsSink, NopSink};
pub use error::{CredsError, Result};
pub use handle::CredentialHandle;
pub use refresher::{Refresher, RefresherBuilder};
pub use signer::{
    SIGN_REQUEST_STEP, SignHandlers, Signer, SignerOption, SigningPipeline, signer_option,
};
pub use swapper::{Swapper, SwapperBuilder};
pub use task::RefreshTask;

// Compile-time assertions: key types must be Send + Sync for use across threads.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Swapper>;
    let _ = assert_send_sync::<Refresher>;
    let _ = assert_send_sync::<CredentialHandle>;
    let _ = assert_send_sync::<CredentialCache>;
    let _ = assert_send_sync::<SignHandlers>;
    let _ = assert_send_sync::<CredsError>;
    let _ = assert_send_sync::<Credential>;
};
