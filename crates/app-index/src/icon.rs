//! Icon phase: converts icon sets into cached raster files.
//!
//! A conversion expands the bundle's icon set into `<icon dir>/<stem>.iconset`,
//! picks one variant and copies it to `<icon dir>/<stem>.<ext>`, where
//! `<stem>` is the FNV-1a hash of the display name. Records whose conversion
//! fails are dropped from the mapping for this pass.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::AppIndexConfig;
use crate::error::{AppIndexError, Result};
use crate::platform::SharedPlatform;
use crate::types::Records;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const WORK_DIR_SUFFIX: &str = "iconset";

#[derive(Debug, Clone)]
pub struct IconSettings {
    pub icon_dir: PathBuf,
    pub timeout: Duration,
    pub preferred_variants: Vec<String>,
    pub concurrency: usize,
}

impl IconSettings {
    pub fn from_config(config: &AppIndexConfig) -> Self {
        Self {
            icon_dir: config.icon_dir(),
            timeout: config.icon_timeout(),
            preferred_variants: config.preferred_icon_variants.clone(),
            concurrency: config.icon_concurrency,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct IconStats {
    pub scheduled: usize,
    pub cached: usize,
    pub dropped: usize,
}

/// 64-bit FNV-1a digest of `name` as 16 hex digits.
pub fn icon_file_stem(name: &str) -> String {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

/// Picks the first name containing a preferred fragment, in preference
/// order, falling back to the first name in sorted order.
pub fn choose_variant<'a>(names: &'a [String], preferred: &[String]) -> Option<&'a str> {
    preferred
        .iter()
        .find_map(|fragment| names.iter().find(|name| name.contains(fragment.as_str())))
        .or_else(|| names.iter().min())
        .map(String::as_str)
}

/// Converts `icon_set` and returns the path of the cached icon.
pub async fn extract_icon(
    platform: &SharedPlatform,
    icon_set: &Path,
    name: &str,
    settings: &IconSettings,
) -> Result<PathBuf> {
    let stem = icon_file_stem(name);
    let work_dir = settings
        .icon_dir
        .join(format!("{stem}.{WORK_DIR_SUFFIX}"));
    remove_work_dir(&work_dir).await;

    let result = convert_and_copy(platform, icon_set, &stem, &work_dir, settings).await;
    remove_work_dir(&work_dir).await;
    result
}

async fn convert_and_copy(
    platform: &SharedPlatform,
    icon_set: &Path,
    stem: &str,
    work_dir: &Path,
    settings: &IconSettings,
) -> Result<PathBuf> {
    tokio::time::timeout(settings.timeout, platform.convert_icon_set(icon_set, work_dir))
        .await
        .map_err(|_| AppIndexError::Timeout(settings.timeout))??;

    let names = list_variants(work_dir).await?;
    let chosen = choose_variant(&names, &settings.preferred_variants).ok_or_else(|| {
        AppIndexError::IconConversion(format!("no variants produced for {}", icon_set.display()))
    })?;

    let source = work_dir.join(chosen);
    let target = match Path::new(chosen).extension() {
        Some(extension) => settings
            .icon_dir
            .join(format!("{stem}.{}", extension.to_string_lossy())),
        None => settings.icon_dir.join(stem),
    };
    tokio::fs::copy(&source, &target).await?;
    if !tokio::fs::try_exists(&target).await? {
        return Err(AppIndexError::IconConversion(format!(
            "cached icon {} missing after copy",
            target.display()
        )));
    }
    Ok(target)
}

async fn list_variants(work_dir: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(work_dir).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

async fn remove_work_dir(work_dir: &Path) {
    match tokio::fs::remove_dir_all(work_dir).await {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => log::debug!("failed to remove {}: {error}", work_dir.display()),
    }
}

/// Extracts icons for every record with an icon set and no cached icon.
pub async fn run_icon_phase(
    records: &mut Records,
    platform: &SharedPlatform,
    settings: &IconSettings,
) -> IconStats {
    let mut stats = IconStats::default();
    // Same name means same work dir and target file, so a name that already
    // has a cached icon or a scheduled job gets no further job.
    let mut names: HashSet<String> = records
        .values()
        .filter(|record| record.cached_icon.is_some())
        .map(|record| record.name.clone())
        .collect();
    let mut jobs = Vec::new();
    for record in records.values().filter(|record| record.needs_icon()) {
        if !names.insert(record.name.clone()) {
            continue;
        }
        if let Some(icon_set) = record.icon_set.clone() {
            jobs.push((record.key.clone(), record.name.clone(), icon_set));
        }
    }
    if jobs.is_empty() {
        return stats;
    }

    if let Err(error) = tokio::fs::create_dir_all(&settings.icon_dir).await {
        log::warn!(
            "failed to create icon directory {}: {error}",
            settings.icon_dir.display()
        );
        return stats;
    }

    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let settings = Arc::new(settings.clone());
    let mut workers = JoinSet::new();
    for (key, name, icon_set) in jobs {
        stats.scheduled += 1;
        let platform = platform.clone();
        let semaphore = semaphore.clone();
        let settings = settings.clone();
        workers.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => extract_icon(&platform, &icon_set, &name, &settings).await,
                Err(_) => Err(AppIndexError::Internal("icon semaphore closed".to_string())),
            };
            (key, result)
        });
    }

    while let Some(joined) = workers.join_next().await {
        let (key, result) = match joined {
            Ok(outcome) => outcome,
            Err(error) => {
                log::warn!("icon worker failed: {error}");
                continue;
            }
        };
        match result {
            Ok(path) => {
                if let Some(record) = records.get_mut(&key) {
                    record.cached_icon = Some(path);
                    stats.cached += 1;
                }
            }
            Err(error) => {
                log::warn!("dropping {key}: icon extraction failed: {error}");
                records.remove(&key);
                stats.dropped += 1;
            }
        }
    }

    log::debug!(
        "icon phase scheduled={} cached={} dropped={}",
        stats.scheduled,
        stats.cached,
        stats.dropped
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::{FakePlatform, IconBehavior};
    use crate::types::{AppRecord, BundleTimestamps};
    use tempfile::TempDir;

    fn settings(icon_dir: PathBuf) -> IconSettings {
        IconSettings {
            icon_dir,
            timeout: Duration::from_millis(200),
            preferred_variants: vec!["32x32@2x.".to_string(), "128x128.".to_string()],
            concurrency: 2,
        }
    }

    fn record(key: &str, name: &str, icon_set: &str) -> AppRecord {
        let mut record = AppRecord::new(
            key.to_string(),
            PathBuf::from(format!("/Applications/{name}.app")),
            name.to_string(),
        );
        record.icon_set = Some(PathBuf::from(format!(
            "/Applications/{name}.app/Contents/Resources/{icon_set}"
        )));
        record.metadata = Some(BundleTimestamps::default());
        record
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn file_stem_is_fnv1a_hex() {
        assert_eq!(icon_file_stem(""), "cbf29ce484222325");
        assert_eq!(icon_file_stem("a"), "af63dc4c8601ec8c");
        assert_eq!(icon_file_stem("Safari").len(), 16);
        assert_ne!(icon_file_stem("Safari"), icon_file_stem("safari"));
    }

    #[test]
    fn variant_preference_order() {
        let preferred = names(&["32x32@2x.", "128x128."]);
        let all = names(&["icon_128x128.png", "icon_16x16.png", "icon_32x32@2x.png"]);
        assert_eq!(choose_variant(&all, &preferred), Some("icon_32x32@2x.png"));

        let no_retina = names(&["icon_128x128.png", "icon_16x16.png"]);
        assert_eq!(choose_variant(&no_retina, &preferred), Some("icon_128x128.png"));

        let other = names(&["icon_512x512.png", "icon_256x256.png"]);
        assert_eq!(choose_variant(&other, &preferred), Some("icon_256x256.png"));

        assert_eq!(choose_variant(&[], &preferred), None);
    }

    #[tokio::test]
    async fn extracts_preferred_variant_and_removes_work_dir() {
        let temp = TempDir::new().unwrap();
        let settings = settings(temp.path().to_path_buf());
        let platform: SharedPlatform = Arc::new(FakePlatform::new());

        let path = extract_icon(&platform, Path::new("/x/AppIcon.icns"), "Safari", &settings)
            .await
            .expect("icon");
        let stem = icon_file_stem("Safari");
        assert_eq!(path, temp.path().join(format!("{stem}.png")));
        assert_eq!(std::fs::read(&path).unwrap(), b"icon_32x32@2x.png");
        assert!(!temp.path().join(format!("{stem}.iconset")).exists());
    }

    #[tokio::test]
    async fn empty_conversion_is_an_error() {
        let temp = TempDir::new().unwrap();
        let fake = FakePlatform::new();
        fake.set_icon_behavior("Empty.icns", IconBehavior::Variants(Vec::new()));
        let platform: SharedPlatform = Arc::new(fake);

        let result = extract_icon(
            &platform,
            Path::new("/x/Empty.icns"),
            "Empty",
            &settings(temp.path().to_path_buf()),
        )
        .await;
        assert!(matches!(result, Err(AppIndexError::IconConversion(_))));
    }

    #[tokio::test]
    async fn slow_conversion_times_out() {
        let temp = TempDir::new().unwrap();
        let fake = FakePlatform::new();
        fake.set_icon_behavior("Slow.icns", IconBehavior::Hang(Duration::from_secs(30)));
        let platform: SharedPlatform = Arc::new(fake);

        let result = extract_icon(
            &platform,
            Path::new("/x/Slow.icns"),
            "Slow",
            &settings(temp.path().to_path_buf()),
        )
        .await;
        assert!(matches!(result, Err(AppIndexError::Timeout(_))));
    }

    #[tokio::test]
    async fn failed_icons_drop_only_their_record() {
        let temp = TempDir::new().unwrap();
        let fake = FakePlatform::new();
        fake.set_icon_behavior("Broken.icns", IconBehavior::Fail);
        fake.set_icon_behavior("Slow.icns", IconBehavior::Hang(Duration::from_secs(30)));
        let platform: SharedPlatform = Arc::new(fake);

        let mut records: Records = [
            record("broken", "Broken", "Broken.icns"),
            record("good", "Good", "Good.icns"),
            record("slow", "Slow", "Slow.icns"),
            AppRecord::new(
                "plain".to_string(),
                PathBuf::from("/Applications/Plain.app"),
                "Plain".to_string(),
            ),
        ]
        .into_iter()
        .map(|record| (record.key.clone(), record))
        .collect();

        let stats = run_icon_phase(
            &mut records,
            &platform,
            &settings(temp.path().join("icons")),
        )
        .await;
        assert_eq!(stats.scheduled, 3);
        assert_eq!(stats.cached, 1);
        assert_eq!(stats.dropped, 2);

        let keys: Vec<_> = records.keys().cloned().collect();
        assert_eq!(keys, vec!["good".to_string(), "plain".to_string()]);
        let cached = records["good"].cached_icon.clone().expect("cached icon");
        assert!(cached.exists());
    }

    #[tokio::test]
    async fn cached_name_is_not_converted_again_for_another_key() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakePlatform::new());
        let platform: SharedPlatform = fake.clone();
        let survivor_icon = temp.path().join(format!("{}.png", icon_file_stem("Chrome")));
        std::fs::write(&survivor_icon, b"survivor").unwrap();

        let mut survivor = record("chrome", "Chrome", "chrome.icns");
        survivor.cached_icon = Some(survivor_icon.clone());
        let mut records = Records::new();
        records.insert("chrome".to_string(), survivor);
        records.insert(
            "chrome canary".to_string(),
            record("chrome canary", "Chrome", "canary.icns"),
        );

        let stats = run_icon_phase(&mut records, &platform, &settings(temp.path().to_path_buf()))
            .await;
        assert_eq!(stats.scheduled, 0);
        assert_eq!(fake.convert_calls(), 0);
        assert_eq!(std::fs::read(&survivor_icon).unwrap(), b"survivor");
    }

    #[tokio::test]
    async fn conversions_respect_icon_concurrency() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakePlatform::new().with_work_delay(Duration::from_millis(20)));
        let platform: SharedPlatform = fake.clone();

        let mut records = Records::new();
        for index in 0..5 {
            let key = format!("app{index}");
            let name = format!("App{index}");
            records.insert(key.clone(), record(&key, &name, "icon.icns"));
        }

        let stats = run_icon_phase(&mut records, &platform, &settings(temp.path().to_path_buf()))
            .await;
        assert_eq!(stats.cached, 5);
        assert!(fake.max_in_flight() >= 1);
        assert!(fake.max_in_flight() <= 2, "saw {} at once", fake.max_in_flight());
    }

    #[tokio::test]
    async fn records_with_cached_icons_are_skipped() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakePlatform::new());
        let platform: SharedPlatform = fake.clone();

        let mut done = record("done", "Done", "Done.icns");
        done.cached_icon = Some(temp.path().join("done.png"));
        let mut records = Records::new();
        records.insert("done".to_string(), done);

        let stats = run_icon_phase(&mut records, &platform, &settings(temp.path().to_path_buf()))
            .await;
        assert_eq!(stats, IconStats::default());
        assert_eq!(fake.convert_calls(), 0);
    }
}
