//! Core types for dm-archiver
//!
//! Wire types mirror the service's JSON shapes (unknown fields ignored,
//! optional fields defaulted). Document types are what lands on disk.
//! Everything is `serde`-serializable; message timestamps are archived as the
//! wire strings, only locally-generated timestamps use [`chrono`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of a private channel, from the service's integer `type` field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelKind {
    /// One-to-one direct message channel (wire type 1)
    Direct,
    /// Multi-participant group channel (wire type 3)
    Group,
    /// Any other channel type; preserved but not archived
    Other(u8),
}

impl From<u8> for ChannelKind {
    fn from(value: u8) -> Self {
        match value {
            1 => ChannelKind::Direct,
            3 => ChannelKind::Group,
            other => ChannelKind::Other(other),
        }
    }
}

impl From<ChannelKind> for u8 {
    fn from(kind: ChannelKind) -> u8 {
        match kind {
            ChannelKind::Direct => 1,
            ChannelKind::Group => 3,
            ChannelKind::Other(other) => other,
        }
    }
}

impl ChannelKind {
    /// Label used in archive documents
    pub fn label(&self) -> &'static str {
        match self {
            ChannelKind::Direct => "DM",
            ChannelKind::Group => "Group DM",
            ChannelKind::Other(_) => "Unsupported",
        }
    }
}

/// The authenticated user, as returned by the identity endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CurrentUser {
    /// Stable user id
    pub id: String,
    /// Account handle
    pub username: String,
    /// Legacy discriminator; `"0"` on migrated accounts
    #[serde(default = "default_discriminator")]
    pub discriminator: String,
}

/// A participant in a private channel
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recipient {
    /// Stable user id
    pub id: String,
    /// Account handle
    pub username: String,
    /// Display name, if the user has set one
    #[serde(default)]
    pub global_name: Option<String>,
}

/// A private conversation, immutable snapshot fetched once per run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    /// Stable channel id
    pub id: String,
    /// Channel kind (wire field `type`)
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    /// Group name, set only on named group channels
    #[serde(default)]
    pub name: Option<String>,
    /// Participant list, excluding the authenticated user
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

/// Message author as it appears on the wire
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Author {
    /// Stable user id
    pub id: String,
    /// Account handle
    pub username: String,
    /// Legacy discriminator; `"0"` on migrated accounts
    #[serde(default = "default_discriminator")]
    pub discriminator: String,
    /// Display name, if set
    #[serde(default)]
    pub global_name: Option<String>,
}

/// Attachment reference as it appears on the wire
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    /// Remote URL of the binary content
    pub url: String,
    /// Original filename
    pub filename: String,
    /// Declared size in bytes
    #[serde(default)]
    pub size: u64,
}

/// A single message, immutable once fetched
///
/// Ids are snowflakes: monotonically increasing, so they double as pagination
/// cursors and as a total order over a channel's history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Snowflake id
    pub id: String,
    /// Creation timestamp (ISO-8601 wire string)
    pub timestamp: String,
    /// Last-edit timestamp, if the message was edited
    #[serde(default)]
    pub edited_timestamp: Option<String>,
    /// Message author
    pub author: Author,
    /// Text body
    #[serde(default)]
    pub content: String,
    /// Attachment references
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Embeds, preserved verbatim
    #[serde(default)]
    pub embeds: Vec<serde_json::Value>,
    /// Reactions, preserved verbatim
    #[serde(default)]
    pub reactions: Vec<serde_json::Value>,
    /// Reply reference, preserved verbatim
    #[serde(default)]
    pub message_reference: Option<serde_json::Value>,
    /// Stickers (wire field `sticker_items`), preserved verbatim
    #[serde(default, rename = "sticker_items")]
    pub stickers: Vec<serde_json::Value>,
}

/// An attachment after archive processing, with its local path once the byte
/// stream has been fully written
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivedAttachment {
    /// Original filename
    pub filename: String,
    /// Remote URL the content was fetched from
    pub url: String,
    /// Declared size in bytes
    pub size: u64,
    /// Local storage path; `None` if the download failed or was skipped
    pub local_path: Option<PathBuf>,
}

/// A message as it appears in an archive document
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivedMessage {
    /// Snowflake id
    pub id: String,
    /// Creation timestamp (ISO-8601 wire string)
    pub timestamp: String,
    /// Last-edit timestamp, if edited
    pub edited_timestamp: Option<String>,
    /// Message author
    pub author: Author,
    /// Text body
    pub content: String,
    /// Attachments with local paths resolved
    pub attachments: Vec<ArchivedAttachment>,
    /// Embeds, verbatim
    pub embeds: Vec<serde_json::Value>,
    /// Reactions, verbatim
    pub reactions: Vec<serde_json::Value>,
    /// Reply reference, verbatim
    pub message_reference: Option<serde_json::Value>,
    /// Stickers, verbatim
    pub stickers: Vec<serde_json::Value>,
}

/// One archive per channel, the unit of persistence and of atomic replace
///
/// `messages` is strictly chronological, oldest first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationDocument {
    /// Channel id the archive belongs to
    pub channel_id: String,
    /// Human-readable channel kind (`"DM"` / `"Group DM"`)
    pub channel_kind: String,
    /// Participant list at archive time
    pub participants: Vec<Recipient>,
    /// Number of messages in the archive
    pub total_messages: usize,
    /// Timestamp of the oldest message
    pub first_message_date: Option<String>,
    /// Timestamp of the newest message
    pub last_message_date: Option<String>,
    /// When this archive was created
    pub downloaded_at: DateTime<Utc>,
    /// Messages in chronological order, oldest first
    pub messages: Vec<ArchivedMessage>,
}

/// Outcome of archiving a single channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// A new or refreshed archive was written
    Archived {
        /// Number of messages in the written document
        messages: usize,
    },
    /// Update mode found the on-disk archive already matches the remote history
    AlreadyCurrent,
    /// Nothing to archive: empty history, malformed channel, or unsupported kind
    Skipped,
}

/// Per-run outcome tally across all channels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Channels for which a document was written
    pub archived: usize,
    /// Channels already up to date (update mode)
    pub already_current: usize,
    /// Channels with nothing to archive
    pub skipped: usize,
    /// Channels that failed; failures never abort sibling channels
    pub failed: usize,
}

impl BatchSummary {
    pub(crate) fn record(&mut self, outcome: &ArchiveOutcome) {
        match outcome {
            ArchiveOutcome::Archived { .. } => self.archived += 1,
            ArchiveOutcome::AlreadyCurrent => self.already_current += 1,
            ArchiveOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Events broadcast during a run
///
/// Consumers subscribe via [`DmArchiver::subscribe`](crate::DmArchiver::subscribe);
/// there is no polling and no console output from the library itself.
#[derive(Clone, Debug)]
pub enum Event {
    /// A run started over this many channels
    RunStarted {
        /// Number of channels to be archived
        channels: usize,
    },
    /// A channel's history download began
    ChannelStarted {
        /// Channel id
        channel_id: String,
        /// Display name derived from participants or group name
        name: String,
    },
    /// Pagination progress within one channel
    Progress {
        /// Channel id
        channel_id: String,
        /// Messages accumulated so far
        fetched: usize,
    },
    /// A channel's archive document was written
    ChannelArchived {
        /// Channel id
        channel_id: String,
        /// Display name
        name: String,
        /// Number of messages archived
        messages: usize,
    },
    /// A channel was already up to date (update mode)
    ChannelUpToDate {
        /// Channel id
        channel_id: String,
    },
    /// A channel had nothing to archive
    ChannelSkipped {
        /// Channel id
        channel_id: String,
    },
    /// A channel failed; siblings continue
    ChannelFailed {
        /// Channel id
        channel_id: String,
        /// Rendered error
        error: String,
    },
    /// The run finished
    RunCompleted {
        /// Per-channel outcome tally
        summary: BatchSummary,
    },
}

fn default_discriminator() -> String {
    "0".to_string()
}
