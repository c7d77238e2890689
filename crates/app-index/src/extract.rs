//! Metadata phase of a sync pass and eviction of vanished bundles.
//!
//! Workers receive owned bundles and return owned outcomes; only the pass
//! task touches the record mapping.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{AppIndexError, Result};
use crate::manifest::{read_manifest, Associations};
use crate::platform::SharedPlatform;
use crate::types::{AppRecord, BundleTimestamps, DiscoveredBundle, Records};

/// Everything one manifest read contributes to a record.
#[derive(Debug, Clone)]
pub struct ExtractedBundle {
    pub key: String,
    pub location: PathBuf,
    pub name: String,
    pub icon_set: Option<PathBuf>,
    pub associations: Associations,
    pub timestamps: BundleTimestamps,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct MetadataStats {
    pub scheduled: usize,
    pub extracted: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Drops bundles whose key was already discovered earlier in the list.
pub fn unique_by_key(bundles: Vec<DiscoveredBundle>) -> Vec<DiscoveredBundle> {
    let mut seen = HashSet::new();
    bundles
        .into_iter()
        .filter(|bundle| {
            let key = bundle.key();
            if seen.insert(key.clone()) {
                true
            } else {
                log::debug!(
                    "ignoring {} ({key} already discovered)",
                    bundle.path.display()
                );
                false
            }
        })
        .collect()
}

/// Reads manifests and timestamps for every bundle whose record is missing,
/// moved, or not yet finalized, then applies the results to `records`.
pub async fn run_metadata_phase(
    records: &mut Records,
    bundles: &[DiscoveredBundle],
    platform: &SharedPlatform,
    concurrency: usize,
) -> MetadataStats {
    let mut stats = MetadataStats::default();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut workers = JoinSet::new();

    for bundle in bundles {
        let pending = records
            .get(&bundle.key())
            .map_or(true, |record| record.needs_extraction(&bundle.path));
        if !pending {
            stats.skipped += 1;
            continue;
        }
        stats.scheduled += 1;
        let bundle = bundle.clone();
        let platform = platform.clone();
        let semaphore = semaphore.clone();
        workers.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| AppIndexError::Internal("metadata semaphore closed".to_string()))?;
            extract_bundle(bundle, platform).await
        });
    }

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(extracted)) => {
                apply_extracted(records, extracted);
                stats.extracted += 1;
            }
            Ok(Err(error)) => {
                log::warn!("skipping bundle: {error}");
                stats.failed += 1;
            }
            Err(error) => {
                log::warn!("metadata worker failed: {error}");
                stats.failed += 1;
            }
        }
    }

    log::debug!(
        "metadata phase scheduled={} extracted={} failed={} skipped={}",
        stats.scheduled,
        stats.extracted,
        stats.failed,
        stats.skipped
    );
    stats
}

async fn extract_bundle(
    bundle: DiscoveredBundle,
    platform: SharedPlatform,
) -> Result<ExtractedBundle> {
    let path = bundle.path.clone();
    let (kind, file_stem) = (bundle.kind, bundle.file_stem());
    let (name, icon_set, associations) = tokio::task::spawn_blocking(move || {
        let manifest = read_manifest(&path)?;
        Ok::<_, AppIndexError>((
            manifest.display_name(kind, &file_stem),
            manifest.icon_set(&path),
            manifest.associations(),
        ))
    })
    .await
    .map_err(|error| AppIndexError::Internal(format!("manifest task failed: {error}")))??;

    let timestamps = match platform.bundle_timestamps(&bundle.path).await {
        Ok(timestamps) => timestamps,
        Err(error) => {
            log::debug!(
                "no timestamps for {} via {}: {error}",
                bundle.path.display(),
                platform.id()
            );
            BundleTimestamps::default()
        }
    };

    Ok(ExtractedBundle {
        key: bundle.key(),
        location: bundle.path,
        name,
        icon_set,
        associations,
        timestamps,
    })
}

/// Writes a finalized record for `extracted`.
///
/// A record that moved to a new location is replaced; its cached icon is
/// removed from disk.
pub fn apply_extracted(records: &mut Records, extracted: ExtractedBundle) {
    let mut cached_icon = None;
    if let Some(previous) = records.remove(&extracted.key) {
        if previous.location != extracted.location {
            log::debug!(
                "{} moved from {} to {}",
                extracted.key,
                previous.location.display(),
                extracted.location.display()
            );
            if let Some(icon) = previous.cached_icon.as_ref() {
                remove_icon_file(icon);
            }
        } else if previous.icon_set == extracted.icon_set {
            cached_icon = previous.cached_icon;
        }
    }

    let mut record = AppRecord::new(extracted.key.clone(), extracted.location, extracted.name);
    record.icon_set = extracted.icon_set;
    record.cached_icon = cached_icon;
    record.editor_for = extracted.associations.editor_for;
    record.viewer_for = extracted.associations.viewer_for;
    record.metadata = Some(extracted.timestamps);
    records.insert(extracted.key, record);
}

/// Removes records whose key was not discovered, along with their icons.
pub fn evict_missing(records: &mut Records, discovered: &HashSet<String>) -> Vec<String> {
    let mut evicted = Vec::new();
    records.retain(|key, record| {
        if discovered.contains(key) {
            return true;
        }
        if let Some(icon) = record.cached_icon.as_ref() {
            remove_icon_file(icon);
        }
        evicted.push(key.clone());
        false
    });
    for key in &evicted {
        log::debug!("evicted {key}");
    }
    evicted
}

fn remove_icon_file(path: &std::path::Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => log::warn!("failed to remove icon {}: {error}", path.display()),
    }
}
