//! File type → preferred application resolution.
//!
//! Every finalized record offers a claim for each type it declares. A claim
//! replaces the current holder when:
//!
//! 1. the roles differ and the new claim is an editor;
//! 2. the roles match and the new record was opened more recently;
//! 3. the opened times match and the new record was created earlier.
//!
//! The file manager then takes the folder type unconditionally.

use std::collections::HashMap;
use std::path::Path;

use crate::types::{AppRecord, DocumentRole, Records, APP_SUFFIX, PREF_PANE_SUFFIX};

#[derive(Debug, Clone)]
struct Claim {
    key: String,
    role: DocumentRole,
    opened: i64,
    created: i64,
}

impl Claim {
    fn new(record: &AppRecord, role: DocumentRole) -> Self {
        Self {
            key: record.key.clone(),
            role,
            opened: record.opened(),
            created: record.created(),
        }
    }

    fn beats(&self, existing: &Claim) -> bool {
        if self.role != existing.role {
            return self.role == DocumentRole::Editor;
        }
        if self.opened != existing.opened {
            return self.opened > existing.opened;
        }
        self.created < existing.created
    }
}

/// Winning record key per lower-cased type identifier.
#[derive(Debug, Clone, Default)]
pub struct AssociationIndex {
    claims: HashMap<String, Claim>,
}

impl AssociationIndex {
    pub fn build(records: &Records, file_manager_key: &str, folder_type: &str) -> Self {
        let mut index = Self::default();
        for record in records.values().filter(|record| record.is_finalized()) {
            for type_id in &record.editor_for {
                index.offer(type_id, Claim::new(record, DocumentRole::Editor));
            }
            for type_id in &record.viewer_for {
                index.offer(type_id, Claim::new(record, DocumentRole::Viewer));
            }
        }

        if let Some(file_manager) = records.get(file_manager_key) {
            index.claims.insert(
                folder_type.to_lowercase(),
                Claim::new(file_manager, DocumentRole::Editor),
            );
        }
        index
    }

    fn offer(&mut self, type_id: &str, candidate: Claim) {
        match self.claims.get(type_id) {
            Some(existing) if !candidate.beats(existing) => {}
            _ => {
                self.claims.insert(type_id.to_string(), candidate);
            }
        }
    }

    /// Key of the record that handles `type_id`; case-insensitive.
    pub fn winner(&self, type_id: &str) -> Option<&str> {
        self.claims
            .get(&type_id.to_lowercase())
            .map(|claim| claim.key.as_str())
    }

    pub fn resolve<'a>(&self, records: &'a Records, type_id: &str) -> Option<&'a AppRecord> {
        self.winner(type_id).and_then(|key| records.get(key))
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Lookup key for a file: `folder_type` for plain directories, otherwise
/// the lower-cased extension.
pub fn type_identifier_for_path(path: &Path, folder_type: &str) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    let is_bundle = name.ends_with(APP_SUFFIX) || name.ends_with(PREF_PANE_SUFFIX);
    if path.is_dir() && !is_bundle {
        return Some(folder_type.to_lowercase());
    }
    path.extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
}
