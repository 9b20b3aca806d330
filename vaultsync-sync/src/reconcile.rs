//! One reconciliation cycle: local copy vs. the value in the vault.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use vaultsync_core::{
    Audience, SecretReader, SecretValue, SyncTarget, Token, TokenProvider, VaultEndpoint,
    VaultResolver,
};

use crate::error::SyncError;
use crate::retry::RetryPolicy;
use crate::store::{fingerprint, LocalStateStore};

/// What a cycle did to the local copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The file was created or replaced.
    Written {
        path: PathBuf,
        bytes: usize,
        fingerprint: String,
    },
    /// Remote value matches the local copy byte for byte; nothing written.
    Unchanged { path: PathBuf },
    /// Dry run: the file *would* have been written.
    WouldWrite { path: PathBuf },
}

impl CycleOutcome {
    pub fn path(&self) -> &PathBuf {
        match self {
            CycleOutcome::Written { path, .. }
            | CycleOutcome::Unchanged { path }
            | CycleOutcome::WouldWrite { path } => path,
        }
    }
}

/// Drives the remote collaborators and the local store for one target.
pub struct Reconciler {
    target: SyncTarget,
    store: LocalStateStore,
    tokens: Arc<dyn TokenProvider>,
    resolver: Arc<dyn VaultResolver>,
    reader: Arc<dyn SecretReader>,
    retry: RetryPolicy,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(
        target: SyncTarget,
        file_mode: u32,
        tokens: Arc<dyn TokenProvider>,
        resolver: Arc<dyn VaultResolver>,
        reader: Arc<dyn SecretReader>,
    ) -> Self {
        let store = LocalStateStore::new(&target.directory, &target.secret_name, file_mode);
        Self {
            target,
            store,
            tokens,
            resolver,
            reader,
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Report what would change without touching disk.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn target(&self) -> &SyncTarget {
        &self.target
    }

    pub fn store(&self) -> &LocalStateStore {
        &self.store
    }

    /// Run one cycle. Cancellation is honoured up to the write; once the
    /// write has started it completes.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome, SyncError> {
        let previous = self.read_previous().await?;

        let endpoint = self.resolve_endpoint(cancel).await?;
        let value = self.fetch_value(&endpoint, cancel).await?;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let path = self.store.path();
        if previous.as_deref() == Some(value.as_bytes()) {
            tracing::debug!(
                vault = %self.target.vault_name,
                secret = self.target.secret_name.as_str(),
                path = %path.display(),
                "secret unchanged",
            );
            return Ok(CycleOutcome::Unchanged { path });
        }

        let digest = fingerprint(value.as_bytes());
        if self.dry_run {
            tracing::info!(
                vault = %self.target.vault_name,
                secret = self.target.secret_name.as_str(),
                path = %path.display(),
                fingerprint = %digest,
                "dry run, secret would be written",
            );
            return Ok(CycleOutcome::WouldWrite { path });
        }

        let bytes = value.len();
        self.write_value(value).await?;
        tracing::info!(
            vault = %self.target.vault_name,
            secret = self.target.secret_name.as_str(),
            path = %path.display(),
            bytes,
            fingerprint = %digest,
            "secret written",
        );
        Ok(CycleOutcome::Written {
            path,
            bytes,
            fingerprint: digest,
        })
    }

    async fn read_previous(&self) -> Result<Option<Vec<u8>>, SyncError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.read())
            .await
            .map_err(|err| SyncError::Task(format!("read join error: {err}")))?
    }

    async fn write_value(&self, value: SecretValue) -> Result<(), SyncError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.write(value.as_bytes()))
            .await
            .map_err(|err| SyncError::Task(format!("write join error: {err}")))?
    }

    async fn token(
        &self,
        audience: Audience,
        cancel: &CancellationToken,
    ) -> Result<Token, SyncError> {
        self.retry
            .run(
                "token",
                cancel,
                || self.tokens.acquire(audience),
                |source| SyncError::Authentication { audience, source },
            )
            .await
    }

    async fn resolve_endpoint(&self, cancel: &CancellationToken) -> Result<VaultEndpoint, SyncError> {
        let token = self.token(Audience::Management, cancel).await?;
        let target = &self.target;
        let endpoint = self
            .retry
            .run(
                "resolve",
                cancel,
                || {
                    self.resolver.resolve(
                        &target.subscription_id,
                        &target.resource_group,
                        &target.vault_name,
                        &token,
                    )
                },
                |source| SyncError::Resolution {
                    vault: target.vault_name.to_string(),
                    source,
                },
            )
            .await?;
        tracing::debug!(vault = %target.vault_name, endpoint = %endpoint.0, "resolved vault");
        Ok(endpoint)
    }

    async fn fetch_value(
        &self,
        endpoint: &VaultEndpoint,
        cancel: &CancellationToken,
    ) -> Result<SecretValue, SyncError> {
        let token = self.token(Audience::Data, cancel).await?;
        let name = &self.target.secret_name;
        self.retry
            .run(
                "fetch",
                cancel,
                || self.reader.fetch(endpoint, name, &token),
                |source| SyncError::Fetch {
                    secret: name.as_str().to_string(),
                    source,
                },
            )
            .await
    }
}
