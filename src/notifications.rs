//! Per-owner pending notification queues, under their own lock.
//!
//! Never acquired while the file registry lock is held (and vice versa).

use crate::logger::Logger;
use crate::store::{JsonDocument, StateFiles};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub owner: String,
    pub text: String,
}

impl Notification {
    pub fn downloaded(owner: &str, display_name: &str, by: &str) -> Self {
        Self {
            owner: owner.to_string(),
            text: format!("Your file '{}' was downloaded by {}.", display_name, by),
        }
    }

    /// Line pushed to the owner's live connection
    pub fn live_message(&self) -> String {
        format!(
            "{}{}\n",
            crate::protocol::reply::NOTIFICATION_PREFIX,
            self.text
        )
    }
}

pub type Pending = BTreeMap<String, Vec<String>>;

pub struct NotificationStore {
    pending: Mutex<Pending>,
    doc: JsonDocument,
}

impl NotificationStore {
    pub fn open(files: &StateFiles, logger: &dyn Logger) -> Self {
        Self {
            pending: Mutex::new(files.notifications.load_or_default(logger)),
            doc: files.notifications.clone(),
        }
    }

    pub fn enqueue(&self, n: &Notification) -> Result<()> {
        let mut pending = self.pending.lock();
        pending
            .entry(n.owner.clone())
            .or_default()
            .push(n.text.clone());
        self.doc.save(&*pending)
    }

    /// Return and clear everything pending for `owner` in one step. If the
    /// cleared queue cannot be saved, nothing is handed out and it stays.
    pub fn drain(&self, owner: &str) -> Result<Vec<String>> {
        let mut pending = self.pending.lock();
        let texts = match pending.get_mut(owner) {
            Some(q) if !q.is_empty() => std::mem::take(q),
            _ => return Ok(Vec::new()),
        };
        if let Err(e) = self.doc.save(&*pending) {
            pending.insert(owner.to_string(), texts);
            return Err(e);
        }
        Ok(texts)
    }

    pub fn pending(&self, owner: &str) -> Vec<String> {
        self.pending.lock().get(owner).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> Pending {
        self.pending.lock().clone()
    }
}
