use crate::config::ServerConfig;
use crate::logger::Logger;
use crate::notifications::NotificationStore;
use crate::registry::FileRegistry;
use crate::sessions::SessionRegistry;
use crate::store::StateFiles;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// shared server state, one per running server
pub struct AppState {
    pub config: ServerConfig,
    pub upload_dir: PathBuf,
    pub files: FileRegistry,
    pub notifications: NotificationStore,
    pub sessions: SessionRegistry,
    pub logger: Arc<dyn Logger>,
}

impl AppState {
    /// Validate the config, create the state directory and load the snapshots.
    pub fn open(config: ServerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        config.validate()?;
        let upload_dir = std::fs::canonicalize(&config.upload_dir).with_context(|| {
            format!(
                "Failed to canonicalize upload directory: {}",
                config.upload_dir.display()
            )
        })?;
        let state_dir = config.state_dir();
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("create state directory {}", state_dir.display()))?;

        let state_files = StateFiles::new(&state_dir);
        let files = FileRegistry::open(&state_files, logger.as_ref());
        let notifications = NotificationStore::open(&state_files, logger.as_ref());

        Ok(Self {
            config,
            upload_dir,
            files,
            notifications,
            sessions: SessionRegistry::new(),
            logger,
        })
    }
}
