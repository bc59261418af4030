//! Message history pagination
//!
//! Walks a channel's history backward in fixed-size batches using the oldest
//! id of the previous batch as the `before` cursor, then reverses once so the
//! result is chronological oldest-first. Paging within a channel is strictly
//! sequential: each page's cursor depends on the previous page's result.

use crate::checkpoint::CheckpointStore;
use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::types::{Event, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Consecutive no-progress fetches tolerated before giving up on a channel
/// whose history misbehaves (e.g. a server repeating pages)
const STALL_LIMIT: u32 = 4;

/// Accumulated-message interval between checkpoint flushes
const CHECKPOINT_INTERVAL: usize = 1000;

/// Drives the API client through a channel's entire message history
pub(crate) struct HistoryFetcher {
    pub(crate) client: Arc<ApiClient>,
    pub(crate) checkpoint: Arc<CheckpointStore>,
    pub(crate) batch_size: usize,
    pub(crate) page_delay: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: broadcast::Sender<Event>,
}

impl HistoryFetcher {
    /// Fetch the channel's full history, oldest first.
    ///
    /// Stops on an empty batch, a short batch, or [`STALL_LIMIT`] consecutive
    /// fetches with no count increase. Non-cancellation fetch errors end the
    /// walk with whatever was accumulated, matching the per-channel error
    /// policy: a forbidden or vanished channel yields its partial (possibly
    /// empty) history rather than a failure.
    pub(crate) async fn fetch_all(&self, channel_id: &str) -> Result<Vec<Message>> {
        let mut all: Vec<Message> = Vec::new();
        let mut before: Option<String> = None;
        let mut no_progress = 0u32;
        let mut checkpointed = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let batch = match self
                .client
                .messages(channel_id, before.as_deref(), self.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if e.is_empty_history() => {
                    tracing::warn!(channel_id, error = %e, "Channel history unavailable, stopping pagination");
                    break;
                }
                Err(e) => {
                    tracing::warn!(channel_id, error = %e, "History fetch failed, keeping partial result");
                    break;
                }
            };

            if batch.is_empty() {
                break;
            }
            let short_batch = batch.len() < self.batch_size;
            let next_cursor = batch[batch.len() - 1].id.clone();

            // Only accept messages strictly older than the cursor; a server
            // that repeats a page therefore adds nothing and trips the stall
            // guard instead of duplicating history.
            let floor = before.as_deref().and_then(snowflake);
            let accepted_before = all.len();
            for message in batch {
                let older = match (floor, snowflake(&message.id)) {
                    (Some(floor), Some(id)) => id < floor,
                    _ => true,
                };
                if older {
                    all.push(message);
                }
            }

            if all.len() == accepted_before {
                no_progress += 1;
                if no_progress >= STALL_LIMIT {
                    tracing::warn!(channel_id, fetched = all.len(), "No pagination progress, stopping");
                    break;
                }
            } else {
                no_progress = 0;
            }

            let _ = self.events.send(Event::Progress {
                channel_id: channel_id.to_string(),
                fetched: all.len(),
            });

            if all.len() / CHECKPOINT_INTERVAL > checkpointed {
                checkpointed = all.len() / CHECKPOINT_INTERVAL;
                self.checkpoint.record(channel_id, all.len() as u64).await;
            }

            before = Some(next_cursor);

            if short_batch {
                break;
            }

            // Fixed pacing between pages, independent of rate-limit signals
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.page_delay) => {}
            }
        }

        all.reverse();
        Ok(all)
    }
}

fn snowflake(id: &str) -> Option<u64> {
    id.parse().ok()
}
