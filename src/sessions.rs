//! Connected display names and their live write handles.

use crate::error::SessionResult;
use crate::protocol_core::with_deadline;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one session. A session holds the lock for a whole response,
/// so pushes from other sessions land between responses, never inside one.
pub type PeerWriter = Arc<tokio::sync::Mutex<BoxedWriter>>;

pub fn peer_writer<W>(w: W) -> PeerWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(tokio::sync::Mutex::new(Box::new(w)))
}

#[derive(Default)]
pub struct SessionRegistry {
    online: Mutex<HashMap<String, PeerWriter>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name`. Check and insert happen under one lock, so of two
    /// concurrent claims exactly one wins.
    pub fn try_register(&self, name: &str, writer: PeerWriter) -> bool {
        let mut online = self.online.lock();
        if online.contains_key(name) {
            return false;
        }
        online.insert(name.to_string(), writer);
        true
    }

    /// Release `name` if it is still held by `writer`.
    pub fn unregister(&self, name: &str, writer: &PeerWriter) -> bool {
        let mut online = self.online.lock();
        match online.get(name) {
            Some(w) if Arc::ptr_eq(w, writer) => {
                online.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<PeerWriter> {
        self.online.lock().get(name).cloned()
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.online.lock().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.online.lock().keys().cloned().collect();
        v.sort();
        v
    }

    pub fn len(&self) -> usize {
        self.online.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort write to `name`'s live connection. `limit` bounds the wait
    /// for the writer (held for a whole response) and the write together.
    /// `Ok(false)` when `name` is not online.
    pub async fn push(&self, name: &str, text: &str, limit: Duration) -> SessionResult<bool> {
        let Some(writer) = self.get(name) else {
            return Ok(false);
        };
        with_deadline(Some(limit), async move {
            let mut w = writer.lock().await;
            w.write_all(text.as_bytes()).await?;
            w.flush().await
        })
        .await?;
        Ok(true)
    }
}
