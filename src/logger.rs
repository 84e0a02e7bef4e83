//! Line-oriented log sink shared by the acceptor and every session.
//!
//! Each event has a default rendering that funnels into `line`, so a sink
//! only has to decide where lines go.

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;

pub trait Logger: Send + Sync {
    fn line(&self, _msg: &str) {}

    fn started(&self, addr: SocketAddr, upload_dir: &Path) {
        self.line(&format!(
            "Server started on {}, listening for connections...",
            addr
        ));
        self.line(&format!("Upload directory: {}", upload_dir.display()));
    }
    fn stopped(&self) {
        self.line("Server stopped.");
    }
    fn connected(&self, name: &str, peer: SocketAddr) {
        self.line(&format!("{} connected from {}.", name, peer));
    }
    fn disconnected(&self, name: &str) {
        self.line(&format!("{} disconnected.", name));
    }
    fn rejected(&self, peer: SocketAddr, reason: &str) {
        self.line(&format!("Connection from {} rejected: {}", peer, reason));
    }
    fn uploaded(&self, display_name: &str, owner: &str, bytes: u64) {
        self.line(&format!(
            "File '{}' uploaded by '{}' ({} bytes).",
            display_name, owner, bytes
        ));
    }
    fn sent(&self, storage_key: &str, to: &str, bytes: u64) {
        self.line(&format!(
            "File '{}' sent to '{}' ({} bytes).",
            storage_key, to, bytes
        ));
    }
    fn deleted(&self, display_name: &str, owner: &str) {
        self.line(&format!("File '{}' deleted by '{}'.", display_name, owner));
    }
    fn notification_stored(&self, owner: &str, text: &str) {
        self.line(&format!("Notification stored for '{}': '{}'", owner, text));
    }
    fn notification_pushed(&self, owner: &str) {
        self.line(&format!("Real-time notification sent to '{}'.", owner));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("Error {}: {}", context, msg));
    }
    fn info(&self, msg: &str) {
        self.line(msg);
    }
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Plain stderr output for the foreground daemon
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn line(&self, s: &str) {
        eprintln!("[{}] {}", Utc::now().format("%H:%M:%S"), s);
    }
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }
}

impl Logger for TextLogger {
    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

/// Keeps every line in memory, e.g. for a console's scrolling view.
#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn line(&self, s: &str) {
        self.lines.lock().push(s.to_string());
    }
}

/// Fans every line out to several sinks.
pub struct TeeLogger(pub Vec<std::sync::Arc<dyn Logger>>);

impl Logger for TeeLogger {
    fn line(&self, s: &str) {
        for sink in &self.0 {
            sink.line(s);
        }
    }
}
