use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use ember_store::{FilesystemStore, ObjectStore};
use ember_types::RetentionMode;
use futures::Stream;
use tracing::info;

use crate::config::VaultConfig;
use crate::error::VaultResult;
use crate::ingest::{IngestReceipt, IngestionGate};
use crate::retrieve::{Retrieval, RetrievalArbiter};
use crate::sweeper::{ExpirySweeper, SweepReport, SweeperHandle};

/// The ephemeral object lifecycle manager.
///
/// Wires the ingestion gate, retrieval arbiter and expiry sweeper to one
/// shared store. Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct Vault {
    store: Arc<dyn ObjectStore>,
    config: VaultConfig,
    gate: Arc<IngestionGate>,
    arbiter: Arc<RetrievalArbiter>,
}

impl Vault {
    pub fn new(store: Arc<dyn ObjectStore>, config: VaultConfig) -> VaultResult<Self> {
        config.validate()?;
        Ok(Self {
            gate: Arc::new(IngestionGate::new(Arc::clone(&store), config.max_file_size)),
            arbiter: Arc::new(RetrievalArbiter::new(Arc::clone(&store), config.burn_grace())),
            store,
            config,
        })
    }

    /// Open a filesystem-backed vault, verify the root is usable, and clear
    /// out staging and claimed files left by a previous process.
    pub async fn open_filesystem(root: impl AsRef<Path>, config: VaultConfig) -> VaultResult<Self> {
        let store = FilesystemStore::open(root).await?;
        store.health_check().await?;
        let purged = store.purge_stale_artifacts(Duration::ZERO).await?;
        info!(root = %store.root().display(), purged, "filesystem store opened");
        Self::new(Arc::new(store), config)
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Upload a payload. `burn` selects burn-after-read retention.
    pub async fn ingest<S, E>(
        &self,
        stream: S,
        declared_size: Option<u64>,
        burn: bool,
    ) -> VaultResult<IngestReceipt>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        self.gate
            .ingest(stream, declared_size, RetentionMode::from_burn_flag(burn))
            .await
    }

    /// Resolve a client-supplied identifier for download.
    pub async fn retrieve(&self, raw_id: &str) -> VaultResult<Retrieval> {
        self.arbiter.retrieve(raw_id).await
    }

    /// Wait for scheduled burn deletions to finish.
    pub async fn wait_for_burn_deletions(&self) {
        self.arbiter.wait_for_deletions().await
    }

    /// A sweeper using this vault's TTL and interval.
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            Arc::clone(&self.store),
            self.config.expiration(),
            self.config.sweep_interval(),
        )
        .with_stale_artifact_age(self.config.stale_artifact_age())
    }

    /// Start the background expiry loop.
    pub fn start_sweeper(&self) -> SweeperHandle {
        self.sweeper().spawn()
    }

    /// Run a single sweep cycle now.
    pub async fn sweep_now(&self) -> SweepReport {
        self.sweeper().run_once(Utc::now()).await
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .finish()
    }
}
