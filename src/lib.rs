//! # dm-archiver
//!
//! Resumable private-message archiving for Discord-compatible chat APIs.
//!
//! The crate downloads a user's complete direct and group conversation
//! history over the service's HTTP API and persists each conversation as one
//! JSON document, with attachments stored alongside. The engine is built for
//! hostile conditions: rate-limit-aware fetching with retry/backoff, a fixed
//! worker budget across channels, per-channel progress checkpoints, and
//! crash-safe atomic document replacement.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - no CLI or UI; the embedding application collects the
//!   credential and decides how to present progress
//! - **Event-driven** - consumers subscribe to run events, no polling
//! - **Failure-isolating** - one conversation's failure never aborts the rest
//! - **Idempotent on disk** - re-runs in update mode touch nothing that is
//!   already current
//!
//! ## Quick Start
//!
//! ```no_run
//! use dm_archiver::{Config, DmArchiver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let token = std::env::var("CHAT_TOKEN")?;
//!     let archiver = DmArchiver::new(&token, Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = archiver.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = archiver.archive_all(false).await?;
//!     println!("archived {} conversations", summary.archived);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Conversation assembly and atomic persistence
mod archiver;
/// Attachment downloads
mod attachments;
/// Checkpoint store for per-channel progress
pub mod checkpoint;
/// Rate-limited API client
pub mod client;
/// Configuration types
pub mod config;
/// Bounded-concurrency fan-out across channels
mod coordinator;
/// Error types
pub mod error;
/// Message history pagination
mod history;
/// Retry policy for transient request failures
pub mod retry;
/// Run statistics
pub mod stats;
/// Core data model and events
pub mod types;

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use checkpoint::{CheckpointEntry, CheckpointStore};
pub use client::ApiClient;
pub use config::{Config, RetryConfig};
pub use error::{Error, Result};
pub use stats::{RunStatistics, StatsSnapshot};
pub use types::{
    ArchiveOutcome, BatchSummary, Channel, ChannelKind, ConversationDocument, CurrentUser, Event,
    Message, Recipient,
};

/// Capacity of the event broadcast channel; slow subscribers lag rather than
/// block the run
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle for one archiving run's worth of state: API client, checkpoint
/// store, statistics, and the cancellation token shared by every worker
///
/// The network client and directories are acquired in [`DmArchiver::new`] and
/// live for the run; cancellation releases everything on every exit path.
#[derive(Debug)]
pub struct DmArchiver {
    config: Config,
    client: Arc<ApiClient>,
    checkpoint: Arc<CheckpointStore>,
    stats: Arc<RunStatistics>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl DmArchiver {
    /// Create an archiver for `token`, creating the output and attachment
    /// directories and loading the checkpoint file.
    ///
    /// Fails on an unusable credential value, an invalid base URL, or
    /// uncreatable directories; the credential itself is only validated
    /// against the service when a run starts.
    pub async fn new(token: &str, config: Config) -> Result<Self> {
        let cancel = CancellationToken::new();
        let client = Arc::new(ApiClient::new(token, &config, cancel.clone())?);

        tokio::fs::create_dir_all(&config.output_dir).await?;
        tokio::fs::create_dir_all(&config.attachment_dir).await?;

        let checkpoint = Arc::new(CheckpointStore::load(config.checkpoint_file.clone()).await);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            client,
            checkpoint,
            stats: Arc::new(RunStatistics::new()),
            event_tx,
            cancel,
        })
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Validate the credential against the identity endpoint
    pub async fn verify_token(&self) -> Result<CurrentUser> {
        self.client.current_user().await
    }

    /// List the private channels available to the credential
    pub async fn private_channels(&self) -> Result<Vec<Channel>> {
        self.client.private_channels().await
    }

    /// Archive every private channel.
    ///
    /// Validates the credential, fetches the channel list, then fans the
    /// archiver out across channels under the configured worker budget. In
    /// update mode each channel gets a single freshness check and is left
    /// untouched when already current. The checkpoint file is flushed before
    /// returning on every path, including cancellation.
    ///
    /// Only credential-validation failure and cancellation end the run early;
    /// per-channel failures are tallied in the returned summary.
    pub async fn archive_all(&self, update_mode: bool) -> Result<BatchSummary> {
        let user = self.client.current_user().await?;
        tracing::info!(username = %user.username, "Credential verified");

        let channels = self.client.private_channels().await?;
        tracing::info!(channels = channels.len(), update_mode, "Starting archive run");
        let _ = self.event_tx.send(Event::RunStarted {
            channels: channels.len(),
        });

        let result = coordinator::archive_channels(
            self.context(),
            channels,
            update_mode,
            self.config.max_concurrent_channels,
        )
        .await;

        // Best-effort flush on success and cancellation alike
        self.checkpoint.flush().await;

        let summary = result?;
        let snapshot = self.stats.snapshot();
        tracing::info!(
            archived = summary.archived,
            already_current = summary.already_current,
            skipped = summary.skipped,
            failed = summary.failed,
            messages = snapshot.messages,
            attachments = snapshot.attachments,
            elapsed_secs = snapshot.elapsed.as_secs(),
            "Archive run finished"
        );
        let _ = self.event_tx.send(Event::RunCompleted { summary });
        Ok(summary)
    }

    /// Consistent snapshot of the run counters
    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Request cancellation: in-flight workers stop at the next page or
    /// channel boundary and the run returns [`Error::Cancelled`]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel the run and flush the checkpoint file
    pub async fn shutdown(&self) {
        tracing::info!("Shutdown requested");
        self.cancel.cancel();
        self.checkpoint.flush().await;
    }

    fn context(&self) -> Arc<archiver::ArchiveContext> {
        Arc::new(archiver::ArchiveContext {
            attachments: attachments::AttachmentFetcher::new(
                Arc::clone(&self.client),
                self.config.attachment_dir.clone(),
                Arc::clone(&self.stats),
            ),
            client: Arc::clone(&self.client),
            checkpoint: Arc::clone(&self.checkpoint),
            stats: Arc::clone(&self.stats),
            output_dir: self.config.output_dir.clone(),
            batch_size: self.config.batch_size,
            page_delay: self.config.page_delay,
            cancel: self.cancel.clone(),
            events: self.event_tx.clone(),
        })
    }
}

/// Run a full archive pass with graceful signal handling.
///
/// Drives [`DmArchiver::archive_all`] while listening for termination
/// signals. On SIGTERM/SIGINT (Ctrl+C elsewhere) the run is cancelled, the
/// checkpoint is flushed, and [`Error::Cancelled`] is returned; archives
/// already written stay valid.
///
/// # Example
///
/// ```no_run
/// use dm_archiver::{Config, DmArchiver, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let token = std::env::var("CHAT_TOKEN")?;
///     let archiver = DmArchiver::new(&token, Config::default()).await?;
///     let summary = run_with_shutdown(&archiver, false).await?;
///     println!("archived {} conversations", summary.archived);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(archiver: &DmArchiver, update_mode: bool) -> Result<BatchSummary> {
    tokio::select! {
        summary = archiver.archive_all(update_mode) => summary,
        _ = wait_for_signal() => {
            archiver.shutdown().await;
            Err(Error::Cancelled)
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        _ => {
            tracing::warn!("Could not register unix signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    }
}
