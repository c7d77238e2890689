//! In-memory platform for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Platform;
use crate::error::{AppIndexError, Result};
use crate::types::BundleTimestamps;

#[derive(Debug, Clone)]
pub enum IconBehavior {
    /// Writes the named variant files into the output directory.
    Variants(Vec<String>),
    Fail,
    /// Sleeps before writing nothing.
    Hang(Duration),
}

#[derive(Debug)]
pub struct FakePlatform {
    timestamps: Mutex<HashMap<PathBuf, BundleTimestamps>>,
    failing_timestamps: Mutex<Vec<PathBuf>>,
    icon_behaviors: Mutex<HashMap<String, IconBehavior>>,
    default_icon: IconBehavior,
    timestamp_calls: AtomicUsize,
    convert_calls: AtomicUsize,
    /// Added to every call so concurrent callers overlap.
    work_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            timestamps: Mutex::new(HashMap::new()),
            failing_timestamps: Mutex::new(Vec::new()),
            icon_behaviors: Mutex::new(HashMap::new()),
            default_icon: IconBehavior::Variants(vec![
                "icon_16x16.png".to_string(),
                "icon_32x32@2x.png".to_string(),
                "icon_128x128.png".to_string(),
            ]),
            timestamp_calls: AtomicUsize::new(0),
            convert_calls: AtomicUsize::new(0),
            work_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_delay(mut self, delay: Duration) -> Self {
        self.work_delay = delay;
        self
    }

    pub fn set_timestamps(&self, bundle: &Path, created: i64, opened: i64) {
        self.timestamps
            .lock()
            .insert(bundle.to_path_buf(), BundleTimestamps { created, opened });
    }

    pub fn fail_timestamps(&self, bundle: &Path) {
        self.failing_timestamps.lock().push(bundle.to_path_buf());
    }

    /// Overrides conversion for icon sets with this file name.
    pub fn set_icon_behavior(&self, icon_file_name: &str, behavior: IconBehavior) {
        self.icon_behaviors
            .lock()
            .insert(icon_file_name.to_string(), behavior);
    }

    pub fn timestamp_calls(&self) -> usize {
        self.timestamp_calls.load(Ordering::SeqCst)
    }

    pub fn convert_calls(&self) -> usize {
        self.convert_calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if !self.work_delay.is_zero() {
            tokio::time::sleep(self.work_delay).await;
        }
        guard
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn id(&self) -> &str {
        "fake"
    }

    async fn bundle_timestamps(&self, bundle: &Path) -> Result<BundleTimestamps> {
        self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter().await;
        if self.failing_timestamps.lock().iter().any(|path| path == bundle) {
            return Err(AppIndexError::Metadata("metadata unavailable".to_string()));
        }
        Ok(self
            .timestamps
            .lock()
            .get(bundle)
            .copied()
            .unwrap_or_default())
    }

    async fn convert_icon_set(&self, icon_set: &Path, output_dir: &Path) -> Result<()> {
        self.convert_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter().await;
        let file_name = icon_set
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let behavior = self
            .icon_behaviors
            .lock()
            .get(&file_name)
            .cloned()
            .unwrap_or_else(|| self.default_icon.clone());

        match behavior {
            IconBehavior::Variants(names) => {
                tokio::fs::create_dir_all(output_dir).await?;
                for name in names {
                    tokio::fs::write(output_dir.join(&name), name.as_bytes()).await?;
                }
                Ok(())
            }
            IconBehavior::Fail => Err(AppIndexError::IconConversion(format!(
                "cannot convert {file_name}"
            ))),
            IconBehavior::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}
