use crate::protocol::timeouts;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9040;
pub const STATE_DIR_NAME: &str = ".fileshare";

/// Server configuration, loadable from a TOML file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// interface to listen on
    pub host: String,
    pub port: u16,
    /// where uploaded bytes live, as `<owner>_<displayName>`
    pub upload_dir: PathBuf,
    /// where the JSON snapshots live (default: `<upload_dir>/.fileshare`)
    pub state_dir: Option<PathBuf>,
    /// concurrent session cap
    pub max_sessions: usize,
    pub io_timeout_secs: u64,
    /// 0 disables the idle deadline
    pub idle_timeout_secs: u64,
    pub max_upload_bytes: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            upload_dir: PathBuf::new(),
            state_dir: None,
            max_sessions: 256,
            io_timeout_secs: timeouts::IO_SECS,
            idle_timeout_secs: timeouts::IDLE_SECS,
            max_upload_bytes: None,
        }
    }
}

impl ServerConfig {
    pub fn new<P: Into<PathBuf>>(port: u16, upload_dir: P) -> Self {
        Self {
            port,
            upload_dir: upload_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: ServerConfig =
            toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.upload_dir.join(STATE_DIR_NAME))
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_secs > 0).then(|| Duration::from_secs(self.io_timeout_secs))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload_dir.as_os_str().is_empty() {
            bail!("Please select an upload directory");
        }
        if !self.upload_dir.exists() {
            bail!("Upload directory does not exist: {}", self.upload_dir.display());
        }
        if !self.upload_dir.is_dir() {
            bail!("Upload path is not a directory: {}", self.upload_dir.display());
        }
        if self.max_sessions == 0 {
            bail!("max_sessions must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::new(7000, "/srv/files");
        assert_eq!(cfg.bind_addr(), "0.0.0.0:7000");
        assert_eq!(cfg.state_dir(), PathBuf::from("/srv/files/.fileshare"));
        assert_eq!(cfg.io_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(cfg.max_upload_bytes, None);
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let mut cfg = ServerConfig::new(7000, "/srv/files");
        cfg.idle_timeout_secs = 0;
        assert_eq!(cfg.idle_timeout(), None);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fileshare.toml");
        std::fs::write(
            &path,
            "port = 5555\nupload_dir = \"/data/up\"\nstate_dir = \"/data/state\"\nmax_sessions = 4\n",
        )
        .unwrap();
        let cfg = ServerConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.port, 5555);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.max_sessions, 4);
        assert_eq!(cfg.state_dir(), PathBuf::from("/data/state"));
    }

    #[test]
    fn bad_toml_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fileshare.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(ServerConfig::from_toml_file(&path).is_err());
    }

    #[test]
    fn validate_upload_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(ServerConfig::new(1, "").validate().is_err());
        assert!(ServerConfig::new(1, tmp.path().join("missing")).validate().is_err());

        let file = tmp.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(ServerConfig::new(1, &file).validate().is_err());

        assert!(ServerConfig::new(1, tmp.path()).validate().is_ok());

        let mut cfg = ServerConfig::new(1, tmp.path());
        cfg.max_sessions = 0;
        assert!(cfg.validate().is_err());
    }
}
