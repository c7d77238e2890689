use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppIndexError, Result};
use crate::types::BundleKind;

pub const APP_INDEX_CONFIG_FILENAME: &str = "app_index.json";
pub const STORE_FILENAME: &str = ".local_apps.json";
pub const ICON_DIR_NAME: &str = ".local_apps_icons";

/// A directory scanned for bundles.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanRoot {
    pub path: PathBuf,
    pub kind: BundleKind,
    /// When set, only bundles whose file name ends with this value are kept.
    #[serde(default)]
    pub only: Option<String>,
}

impl ScanRoot {
    pub fn applications(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: BundleKind::Application,
            only: None,
        }
    }

    pub fn preference_panes(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: BundleKind::PreferencePane,
            only: None,
        }
    }

    pub fn with_only(mut self, name: impl Into<String>) -> Self {
        self.only = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppIndexConfig {
    /// Directory holding the store file and the icon cache.
    pub base_path: PathBuf,
    pub roots: Vec<ScanRoot>,
    /// Entries whose name contains any of these fragments are skipped.
    pub ignored_name_fragments: Vec<String>,
    pub metadata_concurrency: usize,
    pub icon_concurrency: usize,
    pub icon_timeout_ms: u64,
    /// Icon variant name fragments, most preferred first.
    pub preferred_icon_variants: Vec<String>,
    pub resync_per_icon_ms: u64,
    pub resync_floor_ms: u64,
    pub file_manager_key: String,
    pub folder_type: String,
    /// Run passes in the background; otherwise only `sync_now` runs them.
    pub auto_sync: bool,
}

impl Default for AppIndexConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            roots: default_roots(),
            ignored_name_fragments: vec!["local_apps".to_string()],
            metadata_concurrency: 4,
            icon_concurrency: 2,
            icon_timeout_ms: 2_000,
            preferred_icon_variants: vec!["32x32@2x.".to_string(), "128x128.".to_string()],
            resync_per_icon_ms: 550,
            resync_floor_ms: 5 * 60 * 1_000,
            file_manager_key: "finder".to_string(),
            folder_type: "public.folder".to_string(),
            auto_sync: true,
        }
    }
}

impl AppIndexConfig {
    pub fn for_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Reads `<base>/app_index.json` when present; defaults otherwise.
    ///
    /// `base_path` always wins over any value in the file.
    pub fn load_or_default(base_path: &Path) -> Result<Self> {
        let path = base_path.join(APP_INDEX_CONFIG_FILENAME);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str::<Self>(&data).map_err(|error| {
                AppIndexError::InvalidInput(format!(
                    "failed to parse app index config {}: {error}",
                    path.display()
                ))
            })?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(error) => {
                return Err(AppIndexError::Internal(format!(
                    "failed to read app index config {}: {error}",
                    path.display()
                )))
            }
        };
        config.base_path = base_path.to_path_buf();
        Ok(config)
    }

    pub fn store_path(&self) -> PathBuf {
        self.base_path.join(STORE_FILENAME)
    }

    pub fn icon_dir(&self) -> PathBuf {
        self.base_path.join(ICON_DIR_NAME)
    }

    pub fn icon_timeout(&self) -> Duration {
        Duration::from_millis(self.icon_timeout_ms)
    }

    /// Delay before the next pass after `icon_jobs` conversions were scheduled.
    pub fn next_pass_delay(&self, icon_jobs: usize) -> Duration {
        let tail = self.resync_per_icon_ms.saturating_mul(icon_jobs as u64);
        Duration::from_millis(tail.max(self.resync_floor_ms))
    }
}

fn default_roots() -> Vec<ScanRoot> {
    let mut roots = vec![
        ScanRoot::applications("/Applications"),
        ScanRoot::preference_panes("/System/Library/PreferencePanes"),
    ];
    if let Some(home) = dirs::home_dir() {
        roots.push(ScanRoot::applications(home.join("Applications")));
        roots.push(ScanRoot::preference_panes(
            home.join("Library").join("PreferencePanes"),
        ));
    }
    roots.push(ScanRoot::applications("/System/Library/CoreServices").with_only("Finder.app"));
    roots
}
