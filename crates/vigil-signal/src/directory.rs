//! Live set of broadcasting devices.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use vigil_common::{DeviceSession, Document, Error, Result, ACTIVE_CAMERAS};

use crate::feed::LiveFeed;
use crate::store::SignalingStore;

/// One selectable device in the directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub channel_id: String,
    pub owner_label: String,
}

impl From<DeviceSession> for DeviceEntry {
    fn from(session: DeviceSession) -> Self {
        Self {
            channel_id: session.channel_id,
            owner_label: session.owner_label,
        }
    }
}

/// Membership change between two directory snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryDiff {
    pub joined: Vec<DeviceEntry>,
    pub left: Vec<DeviceEntry>,
}

impl DirectoryDiff {
    pub fn between(previous: &[DeviceEntry], current: &[DeviceEntry]) -> Self {
        let before: HashSet<&str> = previous.iter().map(|e| e.channel_id.as_str()).collect();
        let after: HashSet<&str> = current.iter().map(|e| e.channel_id.as_str()).collect();
        Self {
            joined: current
                .iter()
                .filter(|e| !before.contains(e.channel_id.as_str()))
                .cloned()
                .collect(),
            left: previous
                .iter()
                .filter(|e| !after.contains(e.channel_id.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

pub struct SessionDirectory {
    store: Arc<dyn SignalingStore>,
}

impl SessionDirectory {
    pub fn new(store: Arc<dyn SignalingStore>) -> Self {
        Self { store }
    }

    /// Follow `active_cameras`. The feed runs until unsubscribed or dropped.
    pub fn subscribe(
        &self,
        on_error: impl FnMut(Error) + Send + 'static,
    ) -> Result<LiveFeed<DeviceEntry>> {
        let subscription = self.store.list(ACTIVE_CAMERAS)?;
        info!(collection = ACTIVE_CAMERAS, "directory subscribed");
        LiveFeed::spawn(
            "directory",
            subscription,
            project_entries,
            on_error,
        )
    }
}

fn project_entries(docs: &[Document]) -> Vec<DeviceEntry> {
    docs.iter()
        .map(|doc| DeviceEntry::from(DeviceSession::from_document(doc)))
        .collect()
}
