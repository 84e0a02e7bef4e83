//! Fileshare Library
//!
//! Shared file exchange over a raw TCP protocol: clients claim a display
//! name, then upload, list, download and delete files; downloads notify the
//! uploader.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod notifications;
pub mod protocol;
pub mod protocol_core;
pub mod registry;
pub mod server;
pub mod session;
pub mod sessions;
pub mod state;
pub mod store;
