use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rs_ali_creds::{
    Credential, CredsError, Diagnostic, DiagnosticsSink, Result, SIGN_REQUEST_STEP,
    SignHandlers, Signer, SignerOption, SigningPipeline, Swapper, signer_option,
};

const PERIOD: Duration = Duration::from_secs(60);

/// Collects diagnostic messages.
#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn count(&self, message: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.as_str() == message)
            .count()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn record(&self, diagnostic: &Diagnostic<'_>) {
        self.messages
            .lock()
            .unwrap()
            .push(diagnostic.message().to_string());
    }
}

/// A client that materializes a signer through its pipeline for each request.
struct TestClient {
    handlers: SignHandlers,
    default_credential: Arc<Credential>,
}

impl TestClient {
    fn new() -> Self {
        Self {
            handlers: SignHandlers::with_sign_request(),
            default_credential: Arc::new(Credential::new("default-id", "default-secret")),
        }
    }

    fn sign_request(&self) -> Signer {
        let base = Signer::new("ecs", "cn-hangzhou")
            .with_credential(Arc::clone(&self.default_credential));
        self.handlers
            .signer(SIGN_REQUEST_STEP, base)
            .expect("client has a sign step")
    }
}

impl SigningPipeline for TestClient {
    fn swap_named(&self, name: &str, options: Vec<SignerOption>) -> bool {
        self.handlers.swap_named(name, options)
    }
}

/// A client whose pipeline has no signing step.
struct UnsignedClient {
    handlers: SignHandlers,
}

impl SigningPipeline for UnsignedClient {
    fn swap_named(&self, name: &str, options: Vec<SignerOption>) -> bool {
        self.handlers.swap_named(name, options)
    }
}

/// Factory whose n-th call (0 = construction) follows `script`; calls past the
/// end repeat the last entry.
fn scripted(
    script: Vec<Option<&'static str>>,
    calls: Arc<AtomicUsize>,
) -> impl Fn() -> Result<Credential> + Send + Sync {
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        match script[n.min(script.len() - 1)] {
            Some(id) => Ok(Credential::new(id, format!("{id}-secret"))),
            None => Err(CredsError::Credential(format!("call {n} failed"))),
        }
    }
}

fn numbered(calls: Arc<AtomicUsize>) -> impl Fn() -> Result<Credential> + Send + Sync {
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Ok(Credential::new(format!("id-{n}"), format!("secret-{n}")))
    }
}

#[test]
fn missing_factory_fails_construction() {
    let err = Swapper::builder().period(PERIOD).build().unwrap_err();
    assert!(matches!(err, CredsError::Config(_)));
    assert!(err.to_string().contains("credential provider is required"));
}

#[test]
fn construction_succeeds_iff_first_call_validates() {
    let ok = Swapper::builder()
        .provider(|| -> Result<Credential> { Ok(Credential::new("id", "secret")) })
        .build();
    assert!(ok.is_ok());

    let failing = Swapper::builder()
        .provider(|| -> Result<Credential> { Err(CredsError::Credential("sts down".into())) })
        .build();
    assert!(matches!(failing, Err(CredsError::Factory(_))));

    let expired = Swapper::builder()
        .provider(|| -> Result<Credential> {
            Ok(Credential::new("STS.id", "secret")
                .with_expiration(chrono::Utc::now() - chrono::Duration::minutes(1)))
        })
        .build();
    assert!(matches!(expired, Err(CredsError::Retrieve(_))));
}

#[tokio::test(start_paused = true)]
async fn failed_tick_keeps_previous_value_and_reports_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(RecordingSink::default());
    let swapper = Swapper::builder()
        .provider(scripted(
            vec![Some("initial"), Some("tick-1"), None, Some("tick-3")],
            Arc::clone(&calls),
        ))
        .period(PERIOD)
        .sink(sink.clone())
        .build()
        .unwrap();

    let task = swapper.spawn();

    // Ticks at 60s and 120s; the second one fails.
    tokio::time::sleep(PERIOD * 2 + PERIOD / 2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(swapper.current().unwrap().access_key_id, "tick-1");
    assert_eq!(swapper.version(), 2);
    assert_eq!(sink.count("failed to refresh credentials"), 1);

    // The loop keeps going after a failure.
    tokio::time::sleep(PERIOD).await;
    assert_eq!(swapper.current().unwrap().access_key_id, "tick-3");
    assert_eq!(sink.count("failed to refresh credentials"), 1);

    task.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn attached_signers_read_last_successful_publish() {
    let calls = Arc::new(AtomicUsize::new(0));
    let swapper = Swapper::builder()
        .provider(scripted(
            vec![Some("v0"), Some("v1"), None, Some("v3"), None],
            Arc::clone(&calls),
        ))
        .period(PERIOD)
        .build()
        .unwrap();

    let client = TestClient::new();
    assert!(swapper.attach(&client, Vec::new()));
    assert_eq!(client.sign_request().credential.unwrap().access_key_id, "v0");

    let task = swapper.spawn();
    // Check halfway between ticks.
    tokio::time::sleep(PERIOD + PERIOD / 2).await;
    let expected = ["v1", "v1", "v3", "v3", "v3"];
    for want in expected {
        let signed = client.sign_request().credential.unwrap();
        assert_eq!(signed.access_key_id, want);
        assert!(Arc::ptr_eq(&signed, &swapper.current().unwrap()));
        tokio::time::sleep(PERIOD).await;
    }

    task.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_loop_stops_ticking() {
    let calls = Arc::new(AtomicUsize::new(0));
    let swapper = Swapper::builder()
        .provider(numbered(Arc::clone(&calls)))
        .period(PERIOD)
        .build()
        .unwrap();

    let task = swapper.spawn();
    tokio::time::sleep(PERIOD * 3 + PERIOD / 2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    task.shutdown_with_timeout(Duration::from_secs(1))
        .await
        .expect("loop should return promptly after cancellation");

    tokio::time::sleep(PERIOD * 10).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(swapper.version(), 4);
}

#[tokio::test(start_paused = true)]
async fn run_returns_when_token_cancelled_mid_period() {
    let swapper = Swapper::builder()
        .provider(numbered(Arc::new(AtomicUsize::new(0))))
        .period(PERIOD)
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let runner = {
        let swapper = swapper.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { swapper.run(cancel).await })
    };

    tokio::time::sleep(PERIOD / 2).await;
    cancel.cancel();
    runner.await.unwrap();
    assert_eq!(swapper.version(), 1);
}

#[tokio::test(start_paused = true)]
async fn attach_to_client_without_sign_step_fails() {
    let calls = Arc::new(AtomicUsize::new(0));
    let swapper = Swapper::builder()
        .provider(numbered(Arc::clone(&calls)))
        .period(PERIOD)
        .build()
        .unwrap();

    let client = UnsignedClient {
        handlers: SignHandlers::new(),
    };
    assert!(!swapper.attach(&client, Vec::new()));
    assert!(client.handlers.is_empty());
    assert_eq!(swapper.version(), 1);
    assert_eq!(swapper.current().unwrap().access_key_id, "id-0");

    let task = swapper.spawn();
    tokio::time::sleep(PERIOD + PERIOD / 2).await;
    assert_eq!(swapper.version(), 2);
    task.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn two_clients_observe_same_refreshed_value() {
    let swapper = Swapper::builder()
        .provider(numbered(Arc::new(AtomicUsize::new(0))))
        .period(PERIOD)
        .build()
        .unwrap();

    let first = TestClient::new();
    let second = TestClient::new();
    assert!(swapper.attach(&first, Vec::new()));
    assert!(
        swapper.attach(
            &second,
            vec![signer_option(|s: &mut Signer| s.unsigned_payload = true)]
        )
    );

    let mut updates = swapper.updated();
    let task = swapper.spawn();
    assert_eq!(updates.changed().await, Some(2));

    let a = first.sign_request();
    let b = second.sign_request();
    let (cred_a, cred_b) = (a.credential.unwrap(), b.credential.unwrap());
    assert_eq!(cred_a.access_key_id, "id-1");
    assert!(Arc::ptr_eq(&cred_a, &cred_b));
    assert!(!a.unsigned_payload);
    assert!(b.unsigned_payload);

    task.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn second_loop_on_same_swapper_does_not_start() {
    let calls = Arc::new(AtomicUsize::new(0));
    let swapper = Swapper::builder()
        .provider(numbered(Arc::clone(&calls)))
        .period(PERIOD)
        .build()
        .unwrap();

    let first = swapper.spawn();
    let second = swapper.clone().spawn();
    tokio::time::sleep(PERIOD * 2 + PERIOD / 2).await;

    let (running, idle) = if second.is_finished() {
        (first, second)
    } else {
        (second, first)
    };
    assert!(idle.is_finished());
    assert!(!running.is_finished());
    // One publish per tick, on top of the initial one.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(swapper.version(), 3);

    // Once the running loop stops, a new one may take over.
    running.shutdown().await;
    let third = swapper.spawn();
    tokio::time::sleep(PERIOD + PERIOD / 2).await;
    assert!(!third.is_finished());
    assert_eq!(swapper.version(), 4);
    third.shutdown().await;
}
