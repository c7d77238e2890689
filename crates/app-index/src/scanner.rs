//! Bundle discovery under the configured scan roots.
//!
//! Each root contributes the `.app` / `.prefPane` entries it contains plus
//! those one directory level further down, which catches vendor folders such
//! as `/Applications/Utilities` or `/Applications/Adobe Photoshop 2024`.
//! Roots that are missing or unreadable contribute nothing.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ScanRoot;
use crate::types::{DiscoveredBundle, APP_SUFFIX, PREF_PANE_SUFFIX};

/// How many directory levels below a root are searched.
const MAX_NESTING: usize = 1;

/// Walks every root in order and returns the discovered bundles.
pub fn scan_roots(roots: &[ScanRoot], ignored_fragments: &[String]) -> Vec<DiscoveredBundle> {
    let mut bundles = Vec::new();
    for root in roots {
        let mut paths = Vec::new();
        collect_bundles(&root.path, 0, ignored_fragments, &mut paths);
        let before = bundles.len();
        bundles.extend(
            paths
                .into_iter()
                .filter(|path| matches_only(path, root.only.as_deref()))
                .map(|path| DiscoveredBundle::new(path, root.kind)),
        );
        log::debug!(
            "scanned root={} kind={} bundles={}",
            root.path.display(),
            root.kind.as_str(),
            bundles.len() - before
        );
    }
    bundles
}

fn collect_bundles(dir: &Path, level: usize, ignored: &[String], out: &mut Vec<PathBuf>) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };

    let mut names: Vec<String> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !is_hidden_or_ignored(name, ignored))
        .collect();
    // Sorted so repeated passes see bundles in the same order.
    names.sort();

    for name in &names {
        if is_bundle_name(name) {
            out.push(dir.join(name));
        }
    }

    if level >= MAX_NESTING {
        return;
    }
    for name in names.iter().filter(|name| !is_bundle_name(name)) {
        let child = dir.join(name);
        if child.is_dir() {
            collect_bundles(&child, level + 1, ignored, out);
        }
    }
}

fn is_hidden_or_ignored(name: &str, ignored: &[String]) -> bool {
    name.starts_with('.') || ignored.iter().any(|fragment| name.contains(fragment.as_str()))
}

fn is_bundle_name(name: &str) -> bool {
    name.ends_with(APP_SUFFIX) || name.ends_with(PREF_PANE_SUFFIX)
}

fn matches_only(path: &Path, only: Option<&str>) -> bool {
    let Some(only) = only else {
        return true;
    };
    path.file_name()
        .map(|name| name.to_string_lossy().ends_with(only))
        .unwrap_or(false)
}
