//! Checkpoint store: per-channel progress persisted across restarts
//!
//! One JSON file maps channel id to `{message_count, timestamp}`. The file is
//! rewritten wholesale on every update; a missing or corrupt file loads as an
//! empty map and is never fatal, and a failed write is logged rather than
//! raised.
//!
//! The store is informational progress tracking only: pagination never
//! consults it to resume from a mid-history cursor, so a restart re-fetches a
//! channel from its newest message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Progress record for one channel
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Messages fetched for the channel as of the last flush; never decreases
    /// within a run
    pub message_count: u64,
    /// When the entry was last written
    pub timestamp: DateTime<Utc>,
}

/// Shared checkpoint mapping, loaded once at startup and flushed on every
/// update
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, CheckpointEntry>>,
}

impl CheckpointStore {
    /// Load the checkpoint file at `path`; missing or unparseable content
    /// yields an empty mapping
    pub async fn load(path: PathBuf) -> Self {
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Checkpoint file unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read checkpoint file, starting empty");
                HashMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Record progress for a channel and rewrite the file immediately.
    ///
    /// The lock is held across the write so concurrent updates serialize and
    /// the file never regresses to an older snapshot. Write failures are
    /// logged, never raised; losing a checkpoint only costs progress
    /// information.
    pub async fn record(&self, channel_id: &str, message_count: u64) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            channel_id.to_string(),
            CheckpointEntry {
                message_count,
                timestamp: Utc::now(),
            },
        );
        self.write(&entries).await;
    }

    /// Rewrite the file from the current in-memory mapping (shutdown flush)
    pub async fn flush(&self) {
        let entries = self.entries.lock().await;
        self.write(&entries).await;
    }

    /// Last recorded message count for a channel, if any
    pub async fn message_count(&self, channel_id: &str) -> Option<u64> {
        self.entries
            .lock()
            .await
            .get(channel_id)
            .map(|entry| entry.message_count)
    }

    async fn write(&self, snapshot: &HashMap<String, CheckpointEntry>) {
        let body = match serde_json::to_vec(snapshot) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode checkpoint");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.path, body).await {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to write checkpoint");
        }
    }
}
