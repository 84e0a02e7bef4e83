//! Daemon command-line options, layered over an optional TOML config file

use crate::config::ServerConfig;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Shared file exchange daemon")]
pub struct DaemonOpts {
    /// TOML config file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding uploaded files
    #[arg(short = 'd', long = "upload-dir")]
    pub upload_dir: Option<PathBuf>,

    /// Directory for the JSON state snapshots (default: <upload-dir>/.fileshare)
    #[arg(long = "state-dir")]
    pub state_dir: Option<PathBuf>,

    /// Maximum concurrent sessions
    #[arg(long = "max-sessions")]
    pub max_sessions: Option<usize>,

    /// Append log lines to this file as well as stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

impl DaemonOpts {
    pub fn to_config(&self) -> Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServerConfig::from_toml_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            cfg.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(dir) = &self.upload_dir {
            cfg.upload_dir = dir.clone();
        }
        if let Some(dir) = &self.state_dir {
            cfg.state_dir = Some(dir.clone());
        }
        if let Some(n) = self.max_sessions {
            cfg.max_sessions = n;
        }
        Ok(cfg)
    }
}
