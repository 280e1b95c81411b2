//! Fire-and-forget command dispatch from viewer to device.
//!
//! Delivery is best-effort with at most one pending command per device: each
//! send fully replaces `commands/{channel}`, so an unconsumed command is
//! silently superseded by the next one. There is no acknowledgment and no
//! retry; an offline device only ever sees the last write.
//!
//! A write is bounded by a timeout so a stalled store cannot hold up the
//! session task that issues it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};
use vigil_common::{Command, CommandAction, Error, Result, COMMANDS};

use crate::store::SignalingStore;

/// Default bound on a single command write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct CommandChannel {
    store: Arc<dyn SignalingStore>,
    write_timeout: Duration,
}

impl CommandChannel {
    pub fn new(store: Arc<dyn SignalingStore>) -> Self {
        Self {
            store,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub async fn send(&self, channel_id: &str, action: CommandAction) -> Result<()> {
        if channel_id.trim().is_empty() {
            return Err(Error::invalid_input("command target channel is empty"));
        }
        let command = Command {
            target_channel_id: channel_id.to_string(),
            action,
        };
        let write = self.store.put(COMMANDS, channel_id, command.to_fields());
        match timeout(self.write_timeout, write).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    channel = %channel_id,
                    timeout = ?self.write_timeout,
                    "command write timed out"
                );
                return Err(Error::store(format!(
                    "command write for {channel_id} timed out after {:?}",
                    self.write_timeout
                )));
            }
        }
        info!(channel = %channel_id, action = %action, "command written");
        Ok(())
    }

    /// The command currently waiting for the device, if any.
    pub async fn pending(&self, channel_id: &str) -> Result<Option<Command>> {
        match self.store.get(COMMANDS, channel_id).await? {
            Some(doc) => Command::from_document(&doc).map(Some),
            None => Ok(None),
        }
    }
}
