//! End-to-end cycles against in-memory collaborators.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use filetime::FileTime;
use rstest::rstest;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use vaultsync_core::{
    Audience, RemoteError, SecretName, SecretReader, SecretValue, SyncTarget, Token,
    TokenProvider, VaultEndpoint, VaultName, VaultResolver,
};
use vaultsync_sync::{CycleOutcome, Reconciler, RetryPolicy, SyncError};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeTokens {
    fail_with: Mutex<Option<RemoteError>>,
    requests: Mutex<Vec<Audience>>,
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn acquire(&self, audience: Audience) -> Result<Token, RemoteError> {
        self.requests.lock().unwrap().push(audience);
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(Token {
            value: format!("{audience}-token"),
            audience,
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

#[derive(Default)]
struct FakeResolver {
    fail_with: Mutex<Option<RemoteError>>,
    calls: AtomicUsize,
}

#[async_trait]
impl VaultResolver for FakeResolver {
    async fn resolve(
        &self,
        _subscription_id: &str,
        _resource_group: &str,
        vault_name: &VaultName,
        token: &Token,
    ) -> Result<VaultEndpoint, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(token.audience, Audience::Management);
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(VaultEndpoint(format!("https://{vault_name}.vault.azure.net/")))
    }
}

/// Serves scripted responses in order, then repeats the current value.
#[derive(Default)]
struct FakeReader {
    value: Mutex<String>,
    script: Mutex<VecDeque<Result<String, RemoteError>>>,
    calls: AtomicUsize,
    /// Cancelled during the fetch, after the value is returned.
    cancel_on_fetch: Mutex<Option<CancellationToken>>,
}

impl FakeReader {
    fn set(&self, value: &str) {
        *self.value.lock().unwrap() = value.to_string();
    }

    fn script(&self, steps: Vec<Result<String, RemoteError>>) {
        *self.script.lock().unwrap() = steps.into();
    }
}

#[async_trait]
impl SecretReader for FakeReader {
    async fn fetch(
        &self,
        _vault: &VaultEndpoint,
        _secret: &SecretName,
        token: &Token,
    ) -> Result<SecretValue, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(token.audience, Audience::Data);
        if let Some(cancel) = self.cancel_on_fetch.lock().unwrap().as_ref() {
            cancel.cancel();
        }
        if let Some(step) = self.script.lock().unwrap().pop_front() {
            return step.map(SecretValue::from);
        }
        Ok(SecretValue::from(self.value.lock().unwrap().clone()))
    }
}

struct Harness {
    dir: TempDir,
    tokens: Arc<FakeTokens>,
    resolver: Arc<FakeResolver>,
    reader: Arc<FakeReader>,
    reconciler: Reconciler,
}

impl Harness {
    fn new() -> Self {
        Self::with_dry_run(false)
    }

    fn with_dry_run(dry_run: bool) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let tokens = Arc::new(FakeTokens::default());
        let resolver = Arc::new(FakeResolver::default());
        let reader = Arc::new(FakeReader::default());
        let target = SyncTarget {
            vault_name: VaultName::from("kv-prod"),
            secret_name: SecretName::parse("db-password").expect("name"),
            resource_group: "rg-prod".to_string(),
            subscription_id: "sub-1".to_string(),
            directory: dir.path().to_path_buf(),
        };
        let reconciler = Reconciler::new(
            target,
            0o600,
            tokens.clone(),
            resolver.clone(),
            reader.clone(),
        )
        .dry_run(dry_run);
        Self {
            dir,
            tokens,
            resolver,
            reader,
            reconciler,
        }
    }

    fn path(&self) -> std::path::PathBuf {
        self.dir.path().join("db-password")
    }
}

fn mtime(path: &Path) -> FileTime {
    FileTime::from_last_modification_time(&fs::metadata(path).expect("metadata"))
}

fn unauthorized() -> RemoteError {
    RemoteError::Unauthorized {
        status: 403,
        message: "AuthorizationFailed".to_string(),
    }
}

fn not_found() -> RemoteError {
    RemoteError::NotFound {
        message: "SecretNotFound".to_string(),
    }
}

fn transient() -> RemoteError {
    RemoteError::Transient {
        status: Some(503),
        message: "ServiceUnavailable".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Convergence and idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn db_password_scenario_writes_skips_then_rewrites() {
    let h = Harness::new();
    let cancel = CancellationToken::new();

    // First cycle creates the file.
    h.reader.set("s3cr3t");
    let outcome = h.reconciler.run_cycle(&cancel).await.expect("cycle 1");
    assert!(
        matches!(outcome, CycleOutcome::Written { bytes: 6, .. }),
        "got: {outcome:?}"
    );
    assert_eq!(fs::read(h.path()).unwrap(), b"s3cr3t");

    // Backdate the file so an accidental rewrite would show up in the mtime.
    let old = FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(h.path(), old).unwrap();

    // Second cycle, same remote value: nothing touches the file.
    let outcome = h.reconciler.run_cycle(&cancel).await.expect("cycle 2");
    assert_eq!(
        outcome,
        CycleOutcome::Unchanged {
            path: h.path()
        }
    );
    assert_eq!(mtime(&h.path()), old);

    // Rotated remotely: third cycle replaces the content.
    h.reader.set("n3wpass");
    let outcome = h.reconciler.run_cycle(&cancel).await.expect("cycle 3");
    assert!(matches!(outcome, CycleOutcome::Written { .. }));
    assert_eq!(fs::read(h.path()).unwrap(), b"n3wpass");
    assert_ne!(mtime(&h.path()), old);
}

#[tokio::test]
async fn written_outcome_carries_fingerprint_not_plaintext() {
    let h = Harness::new();
    h.reader.set("s3cr3t");
    let outcome = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .expect("cycle");
    let CycleOutcome::Written { fingerprint, .. } = outcome else {
        panic!("expected a write, got {outcome:?}");
    };
    assert_eq!(fingerprint, vaultsync_sync::fingerprint(b"s3cr3t"));
    assert!(!fingerprint.contains("s3cr3t"));
}

#[tokio::test]
async fn local_edit_is_overwritten_with_remote_value() {
    let h = Harness::new();
    fs::write(h.path(), "tampered").unwrap();
    h.reader.set("s3cr3t");
    h.reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .expect("cycle");
    assert_eq!(fs::read(h.path()).unwrap(), b"s3cr3t");
}

#[tokio::test]
async fn empty_remote_value_creates_empty_file() {
    let h = Harness::new();
    let outcome = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .expect("cycle");
    assert!(matches!(outcome, CycleOutcome::Written { bytes: 0, .. }));
    assert_eq!(fs::read(h.path()).unwrap(), b"");
}

#[tokio::test]
async fn each_cycle_asks_for_a_token_per_audience() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    h.reader.set("v");
    h.reconciler.run_cycle(&cancel).await.expect("cycle 1");
    h.reconciler.run_cycle(&cancel).await.expect("cycle 2");
    assert_eq!(
        *h.tokens.requests.lock().unwrap(),
        vec![
            Audience::Management,
            Audience::Data,
            Audience::Management,
            Audience::Data
        ]
    );
    assert_eq!(h.resolver.calls.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Failures never write
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum FailAt {
    Token,
    Resolve,
    Fetch,
}

#[rstest]
#[case::token_rejected(FailAt::Token, "authentication")]
#[case::vault_missing(FailAt::Resolve, "resolution")]
#[case::secret_missing(FailAt::Fetch, "fetch")]
#[tokio::test]
async fn failed_step_surfaces_kind_and_leaves_file(#[case] at: FailAt, #[case] kind: &str) {
    let h = Harness::new();
    fs::write(h.path(), "previous").unwrap();
    h.reader.set("new value");
    match at {
        FailAt::Token => *h.tokens.fail_with.lock().unwrap() = Some(unauthorized()),
        FailAt::Resolve => *h.resolver.fail_with.lock().unwrap() = Some(not_found()),
        FailAt::Fetch => h.reader.script(vec![Err(not_found())]),
    }

    let err = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), kind, "got: {err}");
    assert!(err.remote().is_some());
    match at {
        FailAt::Token => assert!(matches!(
            err,
            SyncError::Authentication {
                audience: Audience::Management,
                ..
            }
        )),
        FailAt::Resolve => assert!(matches!(err, SyncError::Resolution { ref vault, .. } if vault == "kv-prod")),
        FailAt::Fetch => assert!(matches!(err, SyncError::Fetch { ref secret, .. } if secret == "db-password")),
    }
    assert_eq!(fs::read(h.path()).unwrap(), b"previous");
    assert!(!h.dir.path().join(".db-password.vaultsync.tmp").exists());
}

#[tokio::test]
async fn failure_before_first_write_leaves_no_file() {
    let h = Harness::new();
    h.reader.script(vec![Err(unauthorized())]);
    let err = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Fetch { .. }), "got: {err}");
    assert!(!h.path().exists());
}

#[derive(Debug, Clone, Copy)]
enum BrokenTarget {
    /// Something else already occupies the secret's path.
    PathIsDirectory,
    /// The mounted directory went away after startup.
    DirectoryRemoved,
}

#[rstest]
#[case::path_is_directory(BrokenTarget::PathIsDirectory)]
#[case::directory_removed(BrokenTarget::DirectoryRemoved)]
#[tokio::test]
async fn unwritable_target_surfaces_persistence_error(#[case] broken: BrokenTarget) {
    let h = Harness::new();
    h.reader.set("s3cr3t");
    match broken {
        BrokenTarget::PathIsDirectory => fs::create_dir(h.path()).unwrap(),
        BrokenTarget::DirectoryRemoved => fs::remove_dir(h.dir.path()).unwrap(),
    }

    let err = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Io { .. }), "got: {err}");
    assert_eq!(err.kind(), "persistence");
    assert!(err.remote().is_none());

    match broken {
        BrokenTarget::PathIsDirectory => {
            assert!(h.path().is_dir());
            assert!(!h.dir.path().join(".db-password.vaultsync.tmp").exists());
        }
        BrokenTarget::DirectoryRemoved => {
            assert_eq!(h.reader.calls.load(Ordering::SeqCst), 1);
            assert!(!h.dir.path().exists(), "directory must not be recreated");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_is_retried_within_the_cycle() {
    let h = Harness::new();
    h.reader.set("s3cr3t");
    h.reader.script(vec![Err(transient()), Err(transient())]);

    let outcome = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .expect("third attempt succeeds");
    assert!(matches!(outcome, CycleOutcome::Written { .. }));
    assert_eq!(h.reader.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn permanent_fetch_error_is_not_retried() {
    let h = Harness::new();
    h.reader.script(vec![Err(not_found())]);
    let _ = h.reconciler.run_cycle(&CancellationToken::new()).await;
    assert_eq!(h.reader.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let reader = Arc::new(FakeReader::default());
    reader.script(vec![Err(transient())]);
    let reconciler = Reconciler::new(
        SyncTarget {
            vault_name: VaultName::from("kv"),
            secret_name: SecretName::parse("s").unwrap(),
            resource_group: "rg".to_string(),
            subscription_id: "sub".to_string(),
            directory: dir.path().to_path_buf(),
        },
        0o600,
        Arc::new(FakeTokens::default()),
        Arc::new(FakeResolver::default()),
        reader.clone(),
    )
    .with_retry(RetryPolicy::none());

    let err = reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.remote().is_some_and(RemoteError::is_transient));
    assert_eq!(reader.calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Cancellation and dry run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_before_start_makes_no_remote_calls() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h.reconciler.run_cycle(&cancel).await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert!(h.tokens.requests.lock().unwrap().is_empty());
    assert!(!h.path().exists());
}

#[tokio::test]
async fn cancelled_during_fetch_stops_before_write() {
    let h = Harness::new();
    fs::write(h.path(), "previous").unwrap();
    h.reader.set("new value");
    let cancel = CancellationToken::new();
    *h.reader.cancel_on_fetch.lock().unwrap() = Some(cancel.clone());

    let err = h.reconciler.run_cycle(&cancel).await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled), "got: {err}");
    assert_eq!(fs::read(h.path()).unwrap(), b"previous");
}

#[tokio::test]
async fn dry_run_reports_without_touching_disk() {
    let h = Harness::with_dry_run(true);
    h.reader.set("s3cr3t");
    let outcome = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .expect("cycle");
    assert_eq!(outcome, CycleOutcome::WouldWrite { path: h.path() });
    assert!(!h.path().exists());
}

#[tokio::test]
async fn dry_run_with_matching_copy_is_unchanged() {
    let h = Harness::with_dry_run(true);
    fs::write(h.path(), "s3cr3t").unwrap();
    h.reader.set("s3cr3t");
    let outcome = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .expect("cycle");
    assert!(matches!(outcome, CycleOutcome::Unchanged { .. }));
}

#[tokio::test]
async fn slow_fetch_is_abandoned_on_cancel() {
    struct Hanging;

    #[async_trait]
    impl SecretReader for Hanging {
        async fn fetch(
            &self,
            _vault: &VaultEndpoint,
            _secret: &SecretName,
            _token: &Token,
        ) -> Result<SecretValue, RemoteError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(SecretValue::from("late"))
        }
    }

    let dir = TempDir::new().unwrap();
    let reconciler = Reconciler::new(
        SyncTarget {
            vault_name: VaultName::from("kv"),
            secret_name: SecretName::parse("s").unwrap(),
            resource_group: "rg".to_string(),
            subscription_id: "sub".to_string(),
            directory: dir.path().to_path_buf(),
        },
        0o600,
        Arc::new(FakeTokens::default()),
        Arc::new(FakeResolver::default()),
        Arc::new(Hanging),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), reconciler.run_cycle(&cancel))
        .await
        .expect("cycle should stop promptly")
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert!(!dir.path().join("s").exists());
}
