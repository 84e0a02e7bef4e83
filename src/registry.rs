//! File catalog plus per-owner listings, guarded together by one lock.

use crate::logger::Logger;
use crate::protocol_core::storage_key;
use crate::store::{JsonDocument, StateFiles};
use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One uploaded file. Persisted as a `[displayName, storageKey, owner]` triple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct FileEntry {
    pub display_name: String,
    pub storage_key: String,
    pub owner: String,
}

impl FileEntry {
    pub fn new(display_name: &str, owner: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            storage_key: storage_key(owner, display_name),
            owner: owner.to_string(),
        }
    }

    /// `"<displayName> (Uploaded by: <owner>)"`
    pub fn listing_line(&self) -> String {
        format!("{} (Uploaded by: {})", self.display_name, self.owner)
    }
}

impl From<(String, String, String)> for FileEntry {
    fn from((display_name, storage_key, owner): (String, String, String)) -> Self {
        Self {
            display_name,
            storage_key,
            owner,
        }
    }
}

impl From<FileEntry> for (String, String, String) {
    fn from(e: FileEntry) -> Self {
        (e.display_name, e.storage_key, e.owner)
    }
}

pub type OwnerFiles = BTreeMap<String, Vec<String>>;

#[derive(Default)]
struct Inner {
    catalog: Vec<FileEntry>,
    owners: OwnerFiles,
}

impl Inner {
    fn forget_name(&mut self, owner: &str, display_name: &str) {
        if let Some(list) = self.owners.get_mut(owner) {
            list.retain(|n| n != display_name);
        }
    }
}

pub struct FileRegistry {
    inner: Mutex<Inner>,
    catalog_doc: JsonDocument,
    owners_doc: JsonDocument,
}

impl FileRegistry {
    /// Load both documents and bring the owner lists back in line with the
    /// catalog: cataloged names are restored, names without an entry dropped.
    pub fn open(files: &StateFiles, logger: &dyn Logger) -> Self {
        let catalog: Vec<FileEntry> = files.catalog.load_or_default(logger);
        let mut owners: OwnerFiles = files.owners.load_or_default(logger);
        for (owner, names) in owners.iter_mut() {
            names.retain(|n| {
                let cataloged = catalog
                    .iter()
                    .any(|e| &e.owner == owner && &e.display_name == n);
                if !cataloged {
                    logger.info(&format!(
                        "Owner list of '{}' had uncataloged '{}', dropped.",
                        owner, n
                    ));
                }
                cataloged
            });
        }
        for e in &catalog {
            let list = owners.entry(e.owner.clone()).or_default();
            if !list.contains(&e.display_name) {
                logger.info(&format!(
                    "Owner list of '{}' was missing '{}', restored.",
                    e.owner, e.display_name
                ));
                list.push(e.display_name.clone());
            }
        }
        Self {
            inner: Mutex::new(Inner { catalog, owners }),
            catalog_doc: files.catalog.clone(),
            owners_doc: files.owners.clone(),
        }
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        self.catalog_doc.save(&inner.catalog)?;
        self.owners_doc.save(&inner.owners)?;
        Ok(())
    }

    // Every mutation below keeps its in-memory effect even when the save
    // fails: memory mirrors the upload directory, the error is for the log.

    /// Create an empty listing for a first-time owner. Returns true if created.
    pub fn ensure_owner(&self, owner: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.owners.contains_key(owner) {
            return Ok(false);
        }
        inner.owners.insert(owner.to_string(), Vec::new());
        self.persist(&inner)?;
        Ok(true)
    }

    /// Record an upload. A storage key already present keeps its single entry
    /// and position. When another `(owner, name)` pair produced the same key
    /// (`a_b` + `c` vs `a` + `b_c`), its bytes were just overwritten, so the
    /// entry is taken over and the old name leaves the old owner's list.
    pub fn add(&self, entry: FileEntry) -> Result<()> {
        let mut inner = self.inner.lock();
        let pos = inner
            .catalog
            .iter()
            .position(|e| e.storage_key == entry.storage_key);
        match pos {
            Some(i) => {
                let old = std::mem::replace(&mut inner.catalog[i], entry.clone());
                if old != entry {
                    inner.forget_name(&old.owner, &old.display_name);
                }
            }
            None => inner.catalog.push(entry.clone()),
        }
        let list = inner.owners.entry(entry.owner).or_default();
        if !list.contains(&entry.display_name) {
            list.push(entry.display_name);
        }
        self.persist(&inner)
    }

    /// Drop the catalog entry `owner` would store `display_name` under, the
    /// entry's name from its owner's list and `display_name` from `owner`'s.
    pub fn remove(&self, owner: &str, display_name: &str) -> Result<Option<FileEntry>> {
        let key = storage_key(owner, display_name);
        let mut inner = self.inner.lock();
        let pos = inner.catalog.iter().position(|e| e.storage_key == key);
        let removed = pos.map(|i| inner.catalog.remove(i));
        if let Some(e) = &removed {
            inner.forget_name(&e.owner, &e.display_name);
        }
        inner.forget_name(owner, display_name);
        self.persist(&inner)?;
        Ok(removed)
    }

    /// Snapshot of the catalog in insertion order.
    pub fn list(&self) -> Vec<FileEntry> {
        self.inner.lock().catalog.clone()
    }

    pub fn owner_files(&self, owner: &str) -> Option<Vec<String>> {
        self.inner.lock().owners.get(owner).cloned()
    }

    pub fn owners(&self) -> OwnerFiles {
        self.inner.lock().owners.clone()
    }
}
