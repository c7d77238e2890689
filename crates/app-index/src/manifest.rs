//! Bundle manifest (`Contents/Info.plist`) parsing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppIndexError, Result};
use crate::types::{BundleKind, DocumentRole, PREFERENCE_PREFIX};

/// The subset of `Info.plist` keys the index cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleManifest {
    #[serde(rename = "CFBundleName")]
    pub bundle_name: Option<String>,
    /// Human-readable name of Chrome-style web app shortcuts, whose bundle
    /// names are auto-generated ids.
    #[serde(rename = "CrAppModeShortcutName")]
    pub shortcut_name: Option<String>,
    #[serde(rename = "NSPrefPaneIconLabel")]
    pub pref_pane_label: Option<String>,
    #[serde(rename = "CFBundleIconFile")]
    pub icon_file: Option<String>,
    #[serde(rename = "CFBundleIconName")]
    pub icon_name: Option<String>,
    #[serde(rename = "CFBundleDocumentTypes", default)]
    pub document_types: Vec<DocumentType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentType {
    #[serde(rename = "CFBundleTypeExtensions", default)]
    pub extensions: Vec<String>,
    #[serde(rename = "LSItemContentTypes", default)]
    pub content_types: Vec<String>,
    #[serde(rename = "CFBundleTypeRole")]
    pub role: Option<String>,
}

/// Document type identifiers split by declared role.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Associations {
    pub editor_for: BTreeSet<String>,
    pub viewer_for: BTreeSet<String>,
}

pub fn manifest_path(bundle: &Path) -> PathBuf {
    bundle.join("Contents").join("Info.plist")
}

/// Reads and parses the manifest of `bundle`. Binary and XML plists are accepted.
pub fn read_manifest(bundle: &Path) -> Result<BundleManifest> {
    let path = manifest_path(bundle);
    plist::from_file(&path).map_err(|error| AppIndexError::Manifest {
        path,
        message: error.to_string(),
    })
}

impl BundleManifest {
    /// Display name by precedence: pane label, shortcut name, bundle name,
    /// then the bundle's file stem.
    ///
    /// Preference pane names carry [`PREFERENCE_PREFIX`].
    pub fn display_name(&self, kind: BundleKind, file_stem: &str) -> String {
        let mut name = self
            .bundle_name
            .clone()
            .unwrap_or_else(|| file_stem.to_string());
        if let Some(shortcut) = self.shortcut_name.as_ref().filter(|value| !value.is_empty()) {
            name = shortcut.clone();
        }
        match kind {
            BundleKind::Application => name,
            BundleKind::PreferencePane => {
                if let Some(label) = self.pref_pane_label.as_ref() {
                    name = label.clone();
                }
                format!("{PREFERENCE_PREFIX}{name}")
            }
        }
    }

    /// Resolves the icon resource inside `bundle`, if it exists on disk.
    pub fn icon_set(&self, bundle: &Path) -> Option<PathBuf> {
        let icon_name = self.icon_file.as_deref().or(self.icon_name.as_deref())?;
        let resources = bundle.join("Contents").join("Resources");
        let bare = resources.join(icon_name);
        if bare.is_file() {
            return Some(bare);
        }
        let with_ext = resources.join(format!("{icon_name}.icns"));
        with_ext.is_file().then_some(with_ext)
    }

    pub fn associations(&self) -> Associations {
        let mut associations = Associations::default();
        for document_type in &self.document_types {
            let target = match DocumentRole::from_declared(document_type.role.as_deref()) {
                DocumentRole::Editor => &mut associations.editor_for,
                DocumentRole::Viewer => &mut associations.viewer_for,
            };
            target.extend(
                document_type
                    .extensions
                    .iter()
                    .chain(document_type.content_types.iter())
                    .map(|value| value.to_lowercase()),
            );
        }
        associations
    }
}
