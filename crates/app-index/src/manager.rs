//! AppIndex - main API for the application index.
//!
//! Callers own the handle. Queries read the last published snapshot and
//! never wait for a pass; passes are serialized behind the indexer lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::AppIndexConfig;
use crate::error::{AppIndexError, Result};
use crate::generation::{PassGeneration, PassToken};
use crate::indexer::{Indexer, PassReport};
use crate::platform::{default_platform, SharedPlatform};
use crate::resolver::{type_identifier_for_path, AssociationIndex};
use crate::types::{AppRecord, Records};

/// Records and associations as of the last committed pass.
#[derive(Debug, Default)]
struct AppSnapshot {
    records: Records,
    associations: AssociationIndex,
}

impl AppSnapshot {
    fn build(records: &Records, config: &AppIndexConfig) -> Self {
        Self {
            associations: AssociationIndex::build(
                records,
                &config.file_manager_key,
                &config.folder_type,
            ),
            records: records.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppIndexStatus {
    pub base_path: PathBuf,
    pub platform: String,
    pub apps: usize,
    pub finalized: usize,
    pub with_icons: usize,
    pub associations: usize,
    pub passes: u64,
    pub last_pass: Option<PassReport>,
    pub shut_down: bool,
}

struct Shared {
    config: AppIndexConfig,
    platform: SharedPlatform,
    indexer: tokio::sync::Mutex<Indexer>,
    snapshot: RwLock<Arc<AppSnapshot>>,
    generation: PassGeneration,
    shut_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    passes: AtomicU64,
    last_report: RwLock<Option<PassReport>>,
}

impl Shared {
    async fn run_pass(&self) -> Result<PassReport> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(AppIndexError::ShutDown);
        }
        let mut indexer = self.indexer.lock().await;
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(AppIndexError::ShutDown);
        }

        let token = self.begin_pass()?;
        let report = indexer.run_pass(&token).await?;
        if !report.fenced && token.is_current() {
            self.publish(indexer.records());
            self.passes.fetch_add(1, Ordering::SeqCst);
        }
        *self.last_report.write() = Some(report.clone());
        Ok(report)
    }

    /// Shutdown sets the flag before fencing, so a token taken before the
    /// flag is fenced and one taken after it is refused here.
    fn begin_pass(&self) -> Result<PassToken> {
        let token = self.generation.begin();
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(AppIndexError::ShutDown);
        }
        Ok(token)
    }

    fn publish(&self, records: &Records) {
        let snapshot = Arc::new(AppSnapshot::build(records, &self.config));
        *self.snapshot.write() = snapshot;
    }

    fn snapshot(&self) -> Arc<AppSnapshot> {
        self.snapshot.read().clone()
    }
}

pub struct AppIndex {
    shared: Arc<Shared>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AppIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppIndex")
            .field("base_path", &self.shared.config.base_path)
            .field("platform", &self.shared.platform.id())
            .field("shut_down", &self.shared.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl AppIndex {
    /// Opens the index stored under `base_path` with the host platform.
    ///
    /// Reads `<base_path>/app_index.json` when present.
    pub fn initialize(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        let config = AppIndexConfig::load_or_default(&base_path)?;
        Self::with_platform(config, default_platform())
    }

    /// Opens the index, publishes the persisted records and, when
    /// `auto_sync` is set, starts the background re-sync loop.
    pub fn with_platform(config: AppIndexConfig, platform: SharedPlatform) -> Result<Self> {
        std::fs::create_dir_all(&config.base_path).map_err(|error| {
            AppIndexError::InvalidInput(format!(
                "unable to use base path {}: {error}",
                config.base_path.display()
            ))
        })?;

        let indexer = Indexer::open(config.clone(), platform.clone());
        let snapshot = Arc::new(AppSnapshot::build(indexer.records(), &config));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let auto_sync = config.auto_sync;

        let shared = Arc::new(Shared {
            config,
            platform,
            indexer: tokio::sync::Mutex::new(indexer),
            snapshot: RwLock::new(snapshot),
            generation: PassGeneration::new(),
            shut_down: AtomicBool::new(false),
            shutdown_tx,
            passes: AtomicU64::new(0),
            last_report: RwLock::new(None),
        });

        let sync_task = if auto_sync {
            let runtime = tokio::runtime::Handle::try_current().map_err(|error| {
                AppIndexError::Unsupported(format!("background sync needs a tokio runtime: {error}"))
            })?;
            Some(runtime.spawn(sync_loop(shared.clone(), shutdown_rx)))
        } else {
            None
        };

        Ok(Self {
            shared,
            sync_task: Mutex::new(sync_task),
        })
    }

    pub fn config(&self) -> &AppIndexConfig {
        &self.shared.config
    }

    /// Cached icon of the preferred application for `type_id`.
    pub fn resolve_icon(&self, type_id: &str) -> Option<PathBuf> {
        let snapshot = self.shared.snapshot();
        snapshot
            .associations
            .resolve(&snapshot.records, type_id)
            .and_then(|record| record.cached_icon.clone())
    }

    pub fn resolve_icon_for_path(&self, path: &Path) -> Option<PathBuf> {
        let type_id = type_identifier_for_path(path, &self.shared.config.folder_type)?;
        self.resolve_icon(&type_id)
    }

    /// Preferred application record for `type_id`.
    pub fn resolve_app(&self, type_id: &str) -> Option<AppRecord> {
        let snapshot = self.shared.snapshot();
        snapshot
            .associations
            .resolve(&snapshot.records, type_id)
            .cloned()
    }

    /// All published records in key order.
    pub fn apps(&self) -> Vec<AppRecord> {
        self.shared.snapshot().records.values().cloned().collect()
    }

    pub fn status(&self) -> AppIndexStatus {
        let snapshot = self.shared.snapshot();
        AppIndexStatus {
            base_path: self.shared.config.base_path.clone(),
            platform: self.shared.platform.id().to_string(),
            apps: snapshot.records.len(),
            finalized: snapshot
                .records
                .values()
                .filter(|record| record.is_finalized())
                .count(),
            with_icons: snapshot
                .records
                .values()
                .filter(|record| record.cached_icon.is_some())
                .count(),
            associations: snapshot.associations.len(),
            passes: self.shared.passes.load(Ordering::SeqCst),
            last_pass: self.shared.last_report.read().clone(),
            shut_down: self.shared.shut_down.load(Ordering::SeqCst),
        }
    }

    /// Runs a pass now, waiting for any pass already in progress.
    pub async fn sync_now(&self) -> Result<PassReport> {
        self.shared.run_pass().await
    }

    /// Stops the re-sync loop and fences any pass in flight. Published
    /// records stay queryable.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let generation = self.shared.generation.fence();
        self.shared.shutdown_tx.send_replace(true);
        log::info!(
            "app index shutdown base={} fenced_generation={}",
            self.shared.config.base_path.display(),
            generation
        );
    }

    /// Shuts down and waits for the re-sync loop to exit.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown();
        let task = self.sync_task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                log::warn!("app index sync loop failed: {error}");
            }
        }
    }
}

impl Drop for AppIndex {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sync_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let delay = match shared.run_pass().await {
            Ok(report) if report.fenced => break,
            Ok(report) => shared.config.next_pass_delay(report.icons_scheduled),
            Err(AppIndexError::ShutDown) => break,
            Err(error) => {
                log::warn!("app index pass failed: {error}");
                shared.config.next_pass_delay(0)
            }
        };
        log::debug!("next app index pass in {}ms", delay.as_millis());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    log::debug!(
        "app index sync loop stopped base={}",
        shared.config.base_path.display()
    );
}
