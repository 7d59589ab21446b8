//! Wiring of the sync subsystem into one shareable state object.

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityState, OfflineMode};
use crate::gateway::SyncGateway;
use crate::mirror::MirrorStore;
use crate::queue::PendingQueue;
use crate::reconciler::Reconciler;
use crate::remote::{HttpRemote, RemoteApi, RemoteError};
use crate::store::{KeyValueStore, SqliteKeyValueStore, StoreError};
use crate::worker::{SyncWorker, WorkerTiming};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("failed to open local mirror: {0}")]
    Store(#[from] StoreError),
    #[error("failed to set up API client: {0}")]
    Remote(#[from] RemoteError),
}

/// Application state shared by every caller of the sync subsystem.
#[derive(Clone)]
pub struct AppState {
    pub mirror: Arc<MirrorStore>,
    pub queue: PendingQueue,
    pub gateway: SyncGateway,
    pub reconciler: Arc<Reconciler>,
    pub offline_mode: Arc<OfflineMode>,
    pub remote: Arc<dyn RemoteApi>,
}

impl AppState {
    /// Open the SQLite mirror and HTTP client described by `config`.
    ///
    /// Starts in the offline state until a probe says otherwise.
    pub async fn open(config: &SyncConfig) -> Result<Self, AppError> {
        let kv = SqliteKeyValueStore::open(&config.db_path).await?;
        let mut remote = HttpRemote::new(&config.api_url, config.request_timeout)?;
        if let Some(token) = &config.auth_token {
            remote = remote.with_token(token.clone());
        }

        tracing::info!(
            api_url = %config.api_url,
            db_path = %config.db_path.display(),
            "opened sync state"
        );

        Ok(Self::with_backends(
            Arc::new(kv),
            Arc::new(remote),
            ConnectivityState::Offline,
        ))
    }

    /// Assemble the state over explicit storage and remote backends.
    pub fn with_backends(
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteApi>,
        initial: ConnectivityState,
    ) -> Self {
        let mirror = Arc::new(MirrorStore::new(kv));
        let offline_mode = Arc::new(OfflineMode::new(initial));
        let queue = PendingQueue::new(mirror.clone());
        let gateway = SyncGateway::new(mirror.clone(), remote.clone(), offline_mode.clone());
        let reconciler = Arc::new(Reconciler::new(
            mirror.clone(),
            remote.clone(),
            offline_mode.clone(),
        ));

        Self {
            mirror,
            queue,
            gateway,
            reconciler,
            offline_mode,
            remote,
        }
    }

    /// A background worker driving this state.
    pub fn worker(&self, timing: WorkerTiming) -> SyncWorker {
        SyncWorker::new(
            self.remote.clone(),
            self.offline_mode.clone(),
            self.reconciler.clone(),
            self.queue.clone(),
            timing,
        )
    }
}
