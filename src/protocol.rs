//! Shared protocol constants for the fileshare wire protocol

// Maximum length of one client text line (name, command, filename)
pub const MAX_LINE: usize = 1024;

// Download chunk size (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

// Maximum upload chunk payload (64MB) - larger frames are rejected
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// Storage key separator: "<owner>_<displayName>"
pub const KEY_SEPARATOR: char = '_';

/// Commands accepted in the active state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Upload,
    List,
    Download,
    Delete,
    Notifications,
    Exit,
}

impl Command {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "UPLOAD" => Some(Command::Upload),
            "LIST" => Some(Command::List),
            "DOWNLOAD" => Some(Command::Download),
            "DELETE" => Some(Command::Delete),
            "NOTIFICATIONS" => Some(Command::Notifications),
            "EXIT" => Some(Command::Exit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Upload => "UPLOAD",
            Command::List => "LIST",
            Command::Download => "DOWNLOAD",
            Command::Delete => "DELETE",
            Command::Notifications => "NOTIFICATIONS",
            Command::Exit => "EXIT",
        }
    }
}

// Literal server replies. Clients match on these verbatim.
pub mod reply {
    pub const WELCOME: &str = "Welcome to the server!\n";
    pub const NAME_IN_USE: &str = "ERROR: Name already in use. Connection closed.\n";
    pub const INVALID_NAME: &str = "ERROR: Invalid name. Connection closed.\n";
    pub const BUSY: &str = "ERROR: Server is busy. Connection closed.\n";
    pub const UNKNOWN_COMMAND: &str = "ERROR: Unknown command.\n";
    pub const NOT_FOUND: &str = "ERROR: File not found.\n";

    pub const UPLOAD_OK: &str = "File uploaded successfully.\n";
    pub const UPLOAD_ERROR: &str = "ERROR: An error occurred during file upload.\n";

    // Sent without newline, chunk frames follow immediately
    pub const DOWNLOAD_OK: &str = "OK";
    pub const DOWNLOAD_ERROR: &str = "ERROR: An error occurred during file download.\n";

    pub const LIST_EMPTY: &str = "No files available on the server.\n";
    pub const LIST_ERROR: &str = "ERROR: An error occurred during file listing.\n";

    pub const DELETE_OK: &str = "File deleted successfully.\n";
    pub const DELETE_ERROR: &str = "ERROR: An error occurred during file deletion.\n";

    pub const NO_NOTIFICATIONS: &str = "No new notifications.\n";
    pub const NOTIFICATIONS_ERROR: &str =
        "ERROR: An error occurred during notifications retrieval.\n";

    // Prefix of a real-time push to an online owner
    pub const NOTIFICATION_PREFIX: &str = "NOTIFICATION:";
}

// Centralized timeout defaults, overridable through ServerConfig
pub mod timeouts {
    // Per read/write step on a socket or file (s)
    pub const IO_SECS: u64 = 30;

    // Waiting for the next command from an idle client (s), 0 disables
    pub const IDLE_SECS: u64 = 600;

    // Cap on a real-time push when I/O deadlines are disabled (s)
    pub const PUSH_SECS: u64 = 30;

    // Pause after a failed accept before trying again (ms)
    pub const ACCEPT_BACKOFF_MS: u64 = 100;

    // Client side: quiet period that ends a multi-line reply (ms)
    pub const REPLY_SETTLE_MS: u64 = 150;
}
