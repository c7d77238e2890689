//! Core record types shared by every stage of a sync pass.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Prefix carried by keys and display names of preference panes.
pub const PREFERENCE_PREFIX: &str = "pref:";

/// Suffix of application bundles.
pub const APP_SUFFIX: &str = ".app";

/// Suffix of preference pane bundles.
pub const PREF_PANE_SUFFIX: &str = ".prefPane";

/// The persisted mapping, ordered by key.
pub type Records = BTreeMap<String, AppRecord>;

/// What kind of bundle a scan root yields.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleKind {
    Application,
    PreferencePane,
}

impl BundleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::PreferencePane => "preference_pane",
        }
    }
}

/// Declared capability of an application for a document type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DocumentRole {
    Editor,
    Viewer,
}

impl DocumentRole {
    /// Anything other than an explicit `Editor` declaration is a viewer.
    pub fn from_declared(role: Option<&str>) -> Self {
        match role {
            Some("Editor") => Self::Editor,
            _ => Self::Viewer,
        }
    }
}

/// Timestamps read from the OS metadata layer, in Unix milliseconds.
///
/// Zero means the value was unavailable.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BundleTimestamps {
    pub created: i64,
    pub opened: i64,
}

/// A bundle found on disk during the scan phase.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DiscoveredBundle {
    pub path: PathBuf,
    pub kind: BundleKind,
}

impl DiscoveredBundle {
    pub fn new(path: PathBuf, kind: BundleKind) -> Self {
        Self { path, kind }
    }

    /// Bundle file name up to its first `.`, e.g. `pgAdmin3` for
    /// `/Applications/pgAdmin3.app`.
    pub fn file_stem(&self) -> String {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        match file_name.split_once('.') {
            Some((stem, _)) => stem.to_string(),
            None => file_name,
        }
    }

    /// Normalized record key for this bundle.
    pub fn key(&self) -> String {
        let key = self.file_stem().to_lowercase();
        match self.kind {
            BundleKind::Application => key,
            BundleKind::PreferencePane => format!("{PREFERENCE_PREFIX}{key}"),
        }
    }
}

/// One cached application.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    pub key: String,
    pub location: PathBuf,
    pub name: String,
    #[serde(default)]
    pub icon_set: Option<PathBuf>,
    #[serde(default)]
    pub cached_icon: Option<PathBuf>,
    #[serde(default)]
    pub editor_for: BTreeSet<String>,
    #[serde(default)]
    pub viewer_for: BTreeSet<String>,
    /// Present once the one-time metadata extraction has completed.
    #[serde(default)]
    pub metadata: Option<BundleTimestamps>,
}

impl AppRecord {
    pub fn new(key: String, location: PathBuf, name: String) -> Self {
        Self {
            key,
            location,
            name,
            icon_set: None,
            cached_icon: None,
            editor_for: BTreeSet::new(),
            viewer_for: BTreeSet::new(),
            metadata: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn created(&self) -> i64 {
        self.metadata.map(|value| value.created).unwrap_or(0)
    }

    pub fn opened(&self) -> i64 {
        self.metadata.map(|value| value.opened).unwrap_or(0)
    }

    /// True when this record still needs a manifest read for `location`.
    pub fn needs_extraction(&self, location: &Path) -> bool {
        self.location != location || !self.is_finalized()
    }

    pub fn needs_icon(&self) -> bool {
        self.icon_set.is_some() && self.cached_icon.is_none()
    }
}
