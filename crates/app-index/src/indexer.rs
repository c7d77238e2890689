//! The sync pass pipeline.
//!
//! scan → metadata → eviction → icons → persist. The indexer owns the
//! committed record mapping; a pass works on a copy and commits it only
//! when its [`PassToken`] is still current.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::config::AppIndexConfig;
use crate::error::{AppIndexError, Result};
use crate::extract::{evict_missing, run_metadata_phase, unique_by_key};
use crate::generation::PassToken;
use crate::icon::{run_icon_phase, IconSettings};
use crate::platform::SharedPlatform;
use crate::scanner::scan_roots;
use crate::store::{dedup_by_name, CacheStore};
use crate::types::{DiscoveredBundle, Records};

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub generation: u64,
    pub discovered: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub evicted: usize,
    pub icons_scheduled: usize,
    pub icons_cached: usize,
    pub icons_dropped: usize,
    pub deduplicated: usize,
    pub persisted: bool,
    pub persist_error: Option<String>,
    /// The pass was superseded; nothing it produced was kept.
    pub fenced: bool,
    pub elapsed_ms: u64,
}

pub struct Indexer {
    config: AppIndexConfig,
    platform: SharedPlatform,
    store: CacheStore,
    icon_settings: IconSettings,
    records: Records,
    store_needs_rewrite: bool,
    /// Bundles whose display name is held by another key, with that key.
    shadowed: HashMap<String, Shadowed>,
}

#[derive(Debug, Clone)]
struct Shadowed {
    location: PathBuf,
    owner: String,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("platform", &self.platform.id())
            .field("store", &self.store.path())
            .field("records", &self.records.len())
            .field("store_needs_rewrite", &self.store_needs_rewrite)
            .field("shadowed", &self.shadowed.len())
            .finish()
    }
}

impl Indexer {
    /// Loads the persisted records. A missing or unusable store starts
    /// empty and is rewritten by the first pass.
    pub fn open(config: AppIndexConfig, platform: SharedPlatform) -> Self {
        let store = CacheStore::new(config.store_path());
        let load = store.read();
        let store_needs_rewrite = load.needs_rewrite();
        let records = load.into_records();
        log::info!(
            "app index open store={} records={} needs_rewrite={} platform={}",
            store.path().display(),
            records.len(),
            store_needs_rewrite,
            platform.id()
        );
        Self {
            icon_settings: IconSettings::from_config(&config),
            config,
            platform,
            store,
            records,
            store_needs_rewrite,
            shadowed: HashMap::new(),
        }
    }

    pub fn config(&self) -> &AppIndexConfig {
        &self.config
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    pub async fn run_pass(&mut self, token: &PassToken) -> Result<PassReport> {
        let started = Instant::now();
        let mut report = PassReport {
            generation: token.generation(),
            ..PassReport::default()
        };

        let roots = self.config.roots.clone();
        let fragments = self.config.ignored_name_fragments.clone();
        let bundles = tokio::task::spawn_blocking(move || scan_roots(&roots, &fragments))
            .await
            .map_err(|error| AppIndexError::Internal(format!("scan task failed: {error}")))?;
        let bundles = unique_by_key(bundles);
        report.discovered = bundles.len();
        let discovered: HashSet<String> = bundles.iter().map(|bundle| bundle.key()).collect();

        let (pending, shadowed): (Vec<DiscoveredBundle>, Vec<DiscoveredBundle>) = bundles
            .into_iter()
            .partition(|bundle| !self.is_shadowed(bundle, &discovered));

        let mut working = self.records.clone();
        let metadata = run_metadata_phase(
            &mut working,
            &pending,
            &self.platform,
            self.config.metadata_concurrency,
        )
        .await;
        report.extracted = metadata.extracted;
        report.skipped = metadata.skipped + shadowed.len();
        report.failed = metadata.failed;
        if !token.is_current() {
            return Ok(self.fenced(report, started));
        }

        report.evicted = evict_missing(&mut working, &discovered).len();

        // Later keys with a taken display name never reach the icon phase,
        // where they would overwrite the holder's cached icon.
        let duplicates = dedup_by_name(&mut working);
        report.deduplicated = duplicates.len();
        for duplicate in &duplicates {
            log::debug!(
                "{} shares its name with {}; not indexed",
                duplicate.key,
                duplicate.owner
            );
        }

        let icons = run_icon_phase(&mut working, &self.platform, &self.icon_settings).await;
        report.icons_scheduled = icons.scheduled;
        report.icons_cached = icons.cached;
        report.icons_dropped = icons.dropped;
        if !token.is_current() {
            return Ok(self.fenced(report, started));
        }

        let dirty = self.store_needs_rewrite
            || metadata.extracted > 0
            || report.evicted > 0
            || !duplicates.is_empty()
            || icons.scheduled > 0;
        if dirty {
            match self.store.save(&mut working) {
                Ok(dropped) => {
                    report.deduplicated += dropped.len();
                    report.persisted = true;
                    self.store_needs_rewrite = false;
                }
                Err(error) => {
                    log::warn!(
                        "app store write failed for {}: {error}",
                        self.store.path().display()
                    );
                    report.persist_error = Some(error.to_string());
                    self.store_needs_rewrite = true;
                }
            }
        }
        self.records = working;
        let records = &self.records;
        self.shadowed.retain(|key, entry| {
            discovered.contains(key) && records.contains_key(&entry.owner)
        });
        for duplicate in duplicates {
            self.shadowed.insert(
                duplicate.key,
                Shadowed {
                    location: duplicate.location,
                    owner: duplicate.owner,
                },
            );
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "app index pass generation={} discovered={} extracted={} skipped={} failed={} evicted={} icons_scheduled={} icons_cached={} icons_dropped={} deduplicated={} persisted={} elapsed_ms={}",
            report.generation,
            report.discovered,
            report.extracted,
            report.skipped,
            report.failed,
            report.evicted,
            report.icons_scheduled,
            report.icons_cached,
            report.icons_dropped,
            report.deduplicated,
            report.persisted,
            report.elapsed_ms,
        );
        Ok(report)
    }

    /// A bundle already dropped for its name is not read again while it
    /// stays where it was and the record holding the name is still indexed.
    fn is_shadowed(&self, bundle: &DiscoveredBundle, discovered: &HashSet<String>) -> bool {
        self.shadowed.get(&bundle.key()).is_some_and(|entry| {
            entry.location == bundle.path
                && discovered.contains(&entry.owner)
                && self.records.contains_key(&entry.owner)
        })
    }

    fn fenced(&self, mut report: PassReport, started: Instant) -> PassReport {
        report.fenced = true;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "app index pass fenced generation={} elapsed_ms={}",
            report.generation,
            report.elapsed_ms
        );
        report
    }
}
