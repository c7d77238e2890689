use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::{AppIndexError, Result};
use crate::types::BundleTimestamps;

#[async_trait]
pub trait Platform: Send + Sync {
    fn id(&self) -> &str {
        "unsupported"
    }

    /// Creation and last-used times of `bundle`.
    async fn bundle_timestamps(&self, _bundle: &Path) -> Result<BundleTimestamps> {
        Err(AppIndexError::Unsupported("bundle_timestamps".to_string()))
    }

    /// Expands `icon_set` into a directory of raster variants at `output_dir`.
    ///
    /// Callers bound the duration; implementations must not leave child
    /// processes behind when the returned future is dropped, and must not
    /// write to `output_dir` once it has been dropped.
    async fn convert_icon_set(&self, _icon_set: &Path, _output_dir: &Path) -> Result<()> {
        Err(AppIndexError::Unsupported("convert_icon_set".to_string()))
    }
}

pub type SharedPlatform = Arc<dyn Platform>;

/// Unix milliseconds, or 0 for times before the epoch.
pub(crate) fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|value| i64::try_from(value.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(any(target_os = "macos", test))]
pub mod macos;
#[cfg(any(not(target_os = "macos"), test))]
pub mod portable;
