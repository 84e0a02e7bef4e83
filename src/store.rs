//! Whole-document JSON snapshots of the shared registries.

use crate::logger::Logger;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CATALOG_FILE: &str = "uploaded_files.json";
pub const OWNERS_FILE: &str = "uploader_files.json";
pub const NOTIFICATIONS_FILE: &str = "notifications.json";

/// One persisted document, rewritten in full on every save.
#[derive(Clone, Debug)]
pub struct JsonDocument {
    path: PathBuf,
}

impl JsonDocument {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strict load: `Ok(None)` when the document does not exist yet.
    pub fn read<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let data = match std::fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let value = serde_json::from_slice(&data)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(value))
    }

    /// Startup load: a missing document is empty, a malformed one is logged and
    /// treated as empty.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, logger: &dyn Logger) -> T {
        match self.read() {
            Ok(Some(v)) => {
                logger.info(&format!("Loaded {}.", self.path.display()));
                v
            }
            Ok(None) => {
                logger.info(&format!("No existing {} found.", self.path.display()));
                T::default()
            }
            Err(e) => {
                logger.error("loading state", &format!("{:#}", e));
                T::default()
            }
        }
    }

    /// Atomic rewrite: temp file in the same directory, then rename over.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        let dir = self
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        {
            let mut w = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut w, value)?;
            w.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

/// The three documents making up the server state.
#[derive(Clone, Debug)]
pub struct StateFiles {
    pub catalog: JsonDocument,
    pub owners: JsonDocument,
    pub notifications: JsonDocument,
}

impl StateFiles {
    pub fn new(dir: &Path) -> Self {
        Self {
            catalog: JsonDocument::new(dir.join(CATALOG_FILE)),
            owners: JsonDocument::new(dir.join(OWNERS_FILE)),
            notifications: JsonDocument::new(dir.join(NOTIFICATIONS_FILE)),
        }
    }
}
