//! Conversation archiving: one channel's history to one document on disk
//!
//! The archiver assembles a [`ConversationDocument`] from the paginated
//! history (resolving attachments as it goes) and persists it atomically:
//! the canonical file is always either the previous complete version or the
//! new complete version, never a partial write.

use crate::attachments::AttachmentFetcher;
use crate::checkpoint::CheckpointStore;
use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::history::HistoryFetcher;
use crate::stats::RunStatistics;
use crate::types::{
    ArchiveOutcome, ArchivedAttachment, ArchivedMessage, Channel, ChannelKind,
    ConversationDocument, Event, Message,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Maximum length of a derived document filename
const MAX_DOCUMENT_NAME_LEN: usize = 100;

/// Group channels without a name are labelled by their first members
const GROUP_NAME_MEMBERS: usize = 3;

/// Everything one archive worker needs; the coordinator dispatches at most
/// one worker per channel id at a time, so the temp-write/rename sequence
/// never races a second writer for the same channel
pub(crate) struct ArchiveContext {
    pub(crate) client: Arc<ApiClient>,
    pub(crate) checkpoint: Arc<CheckpointStore>,
    pub(crate) stats: Arc<RunStatistics>,
    pub(crate) attachments: AttachmentFetcher,
    pub(crate) output_dir: PathBuf,
    pub(crate) batch_size: usize,
    pub(crate) page_delay: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: broadcast::Sender<Event>,
}

/// Stable naming for a channel's archive
pub(crate) struct ChannelNaming {
    /// Document filename inside the output directory
    pub(crate) file_name: String,
    /// Human-readable name for events and logs
    pub(crate) display_name: String,
}

/// Derive the archive filename and display name for a channel.
///
/// Direct channels are named after the other participant's handle; groups
/// after the group name, or the first three member handles joined. Returns
/// `None` for malformed channels (no recipients) and unsupported kinds.
pub(crate) fn channel_naming(channel: &Channel) -> Option<ChannelNaming> {
    match channel.kind {
        ChannelKind::Direct => {
            let recipient = channel.recipients.first()?;
            Some(ChannelNaming {
                file_name: sanitize_document_name(&format!("{}.json", recipient.username)),
                display_name: recipient
                    .global_name
                    .clone()
                    .unwrap_or_else(|| recipient.username.clone()),
            })
        }
        ChannelKind::Group => {
            if let Some(name) = channel.name.as_deref().filter(|n| !n.is_empty()) {
                return Some(ChannelNaming {
                    file_name: sanitize_document_name(&format!("group_{name}.json")),
                    display_name: format!("Group: {name}"),
                });
            }
            if channel.recipients.is_empty() {
                return None;
            }
            let members: Vec<&str> = channel
                .recipients
                .iter()
                .take(GROUP_NAME_MEMBERS)
                .map(|r| r.username.as_str())
                .collect();
            Some(ChannelNaming {
                file_name: sanitize_document_name(&format!("group_{}.json", members.join("_"))),
                display_name: format!("Group: {}", members.join(", ")),
            })
        }
        ChannelKind::Other(_) => None,
    }
}

/// Sanitize a document filename: filesystem-reserved characters become `_`,
/// anything outside ASCII that is not alphanumeric is dropped, result capped
/// at 100 characters
fn sanitize_document_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if "<>:\"/\\|?*".contains(c) {
                '_'
            } else {
                c
            }
        })
        .filter(|c| (*c as u32) < 128 || c.is_alphanumeric() || "._- ".contains(*c))
        .take(MAX_DOCUMENT_NAME_LEN)
        .collect()
}

/// Archive one channel, reporting the outcome.
///
/// Failures returned here are per-channel: the coordinator logs and tallies
/// them without touching sibling channels. Only [`Error::Cancelled`] travels
/// further up.
pub(crate) async fn archive_channel(
    ctx: &ArchiveContext,
    channel: &Channel,
    update_mode: bool,
) -> Result<ArchiveOutcome> {
    let Some(naming) = channel_naming(channel) else {
        tracing::warn!(channel_id = %channel.id, kind = ?channel.kind, "Channel has no usable naming, skipping");
        let _ = ctx.events.send(Event::ChannelSkipped {
            channel_id: channel.id.clone(),
        });
        return Ok(ArchiveOutcome::Skipped);
    };
    let path = ctx.output_dir.join(&naming.file_name);

    if update_mode && !needs_update(ctx, &channel.id, &path).await? {
        tracing::info!(channel_id = %channel.id, name = %naming.display_name, "Archive already current");
        let _ = ctx.events.send(Event::ChannelUpToDate {
            channel_id: channel.id.clone(),
        });
        return Ok(ArchiveOutcome::AlreadyCurrent);
    }

    let _ = ctx.events.send(Event::ChannelStarted {
        channel_id: channel.id.clone(),
        name: naming.display_name.clone(),
    });

    let history = HistoryFetcher {
        client: Arc::clone(&ctx.client),
        checkpoint: Arc::clone(&ctx.checkpoint),
        batch_size: ctx.batch_size,
        page_delay: ctx.page_delay,
        cancel: ctx.cancel.clone(),
        events: ctx.events.clone(),
    };
    let messages = history.fetch_all(&channel.id).await?;

    if messages.is_empty() {
        tracing::info!(channel_id = %channel.id, name = %naming.display_name, "No messages, skipping");
        let _ = ctx.events.send(Event::ChannelSkipped {
            channel_id: channel.id.clone(),
        });
        return Ok(ArchiveOutcome::Skipped);
    }

    let mut archived = Vec::with_capacity(messages.len());
    for message in &messages {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        archived.push(format_message(ctx, message, &channel.id).await);
    }

    let document = ConversationDocument {
        channel_id: channel.id.clone(),
        channel_kind: channel.kind.label().to_string(),
        participants: channel.recipients.clone(),
        total_messages: archived.len(),
        first_message_date: archived.first().map(|m| m.timestamp.clone()),
        last_message_date: archived.last().map(|m| m.timestamp.clone()),
        downloaded_at: Utc::now(),
        messages: archived,
    };

    write_document(&path, &document).await?;

    ctx.stats.add_messages(document.total_messages as u64);
    ctx.stats.add_conversation();
    tracing::info!(
        channel_id = %channel.id,
        name = %naming.display_name,
        messages = document.total_messages,
        file = %naming.file_name,
        "Conversation archived"
    );
    let _ = ctx.events.send(Event::ChannelArchived {
        channel_id: channel.id.clone(),
        name: naming.display_name,
        messages: document.total_messages,
    });

    Ok(ArchiveOutcome::Archived {
        messages: document.total_messages,
    })
}

/// Freshness check for update mode: one newest-batch fetch, compared against
/// the last message already on disk.
///
/// A missing or unreadable prior archive means a full download is needed. A
/// fetch failure (or an empty remote history) means there is nothing newer to
/// pull, so the archive counts as current.
async fn needs_update(ctx: &ArchiveContext, channel_id: &str, path: &Path) -> Result<bool> {
    let on_disk: ConversationDocument = match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "Existing archive unreadable, re-downloading");
                return Ok(true);
            }
        },
        Err(_) => return Ok(true),
    };

    let newest_batch = match ctx.client.messages(channel_id, None, ctx.batch_size).await {
        Ok(batch) => batch,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            tracing::warn!(channel_id, error = %e, "Freshness check failed, keeping existing archive");
            return Ok(false);
        }
    };

    let Some(newest) = newest_batch.first() else {
        return Ok(false);
    };
    match on_disk.messages.last() {
        Some(last) => Ok(last.id != newest.id),
        None => Ok(false),
    }
}

/// Convert a wire message into its archived form, downloading attachments
async fn format_message(ctx: &ArchiveContext, message: &Message, channel_id: &str) -> ArchivedMessage {
    let mut attachments = Vec::with_capacity(message.attachments.len());
    for attachment in &message.attachments {
        let local_path = ctx
            .attachments
            .fetch(&attachment.url, &attachment.filename, channel_id)
            .await;
        attachments.push(ArchivedAttachment {
            filename: attachment.filename.clone(),
            url: attachment.url.clone(),
            size: attachment.size,
            local_path,
        });
    }

    ArchivedMessage {
        id: message.id.clone(),
        timestamp: message.timestamp.clone(),
        edited_timestamp: message.edited_timestamp.clone(),
        author: message.author.clone(),
        content: message.content.clone(),
        attachments,
        embeds: message.embeds.clone(),
        reactions: message.reactions.clone(),
        message_reference: message.message_reference.clone(),
        stickers: message.stickers.clone(),
    }
}

/// Atomically replace the archive at `path` with `document`.
///
/// Sequence: write a temp file, move any previous archive aside to `.bak`,
/// rename the temp file into place, then delete the backup. If anything
/// after the temp write fails, the temp file is removed, a displaced backup
/// is restored, and the error propagates; the canonical path keeps its
/// prior valid content.
pub(crate) async fn write_document(path: &Path, document: &ConversationDocument) -> Result<()> {
    let tmp = sibling(path, ".tmp");
    let bak = sibling(path, ".bak");

    let body = serde_json::to_vec(document)?;
    tokio::fs::write(&tmp, body).await?;

    let result = replace_canonical(path, &tmp, &bak).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

async fn replace_canonical(path: &Path, tmp: &Path, bak: &Path) -> Result<()> {
    let had_previous = tokio::fs::metadata(path).await.is_ok();
    if had_previous {
        tokio::fs::rename(path, bak).await?;
    }

    if let Err(e) = tokio::fs::rename(tmp, path).await {
        if had_previous {
            // Put the old archive back so the canonical path stays valid
            let _ = tokio::fs::rename(bak, path).await;
        }
        return Err(e.into());
    }

    if had_previous {
        let _ = tokio::fs::remove_file(bak).await;
    }
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Recipient;
    use tempfile::tempdir;

    fn recipient(username: &str, global_name: Option<&str>) -> Recipient {
        Recipient {
            id: "9".into(),
            username: username.into(),
            global_name: global_name.map(String::from),
        }
    }

    fn direct_channel(username: &str) -> Channel {
        Channel {
            id: "123".into(),
            kind: ChannelKind::Direct,
            name: None,
            recipients: vec![recipient(username, Some("Display"))],
        }
    }

    fn empty_document() -> ConversationDocument {
        ConversationDocument {
            channel_id: "123".into(),
            channel_kind: "DM".into(),
            participants: vec![],
            total_messages: 0,
            first_message_date: None,
            last_message_date: None,
            downloaded_at: Utc::now(),
            messages: vec![],
        }
    }

    #[test]
    fn direct_channel_named_after_recipient() {
        let naming = channel_naming(&direct_channel("alice")).unwrap();
        assert_eq!(naming.file_name, "alice.json");
        assert_eq!(naming.display_name, "Display");
    }

    #[test]
    fn direct_channel_without_recipients_is_unnameable() {
        let channel = Channel {
            id: "123".into(),
            kind: ChannelKind::Direct,
            name: None,
            recipients: vec![],
        };
        assert!(channel_naming(&channel).is_none());
    }

    #[test]
    fn named_group_uses_group_name() {
        let channel = Channel {
            id: "123".into(),
            kind: ChannelKind::Group,
            name: Some("plans: v2/final".into()),
            recipients: vec![recipient("alice", None)],
        };
        let naming = channel_naming(&channel).unwrap();
        assert_eq!(naming.file_name, "group_plans_ v2_final.json");
        assert_eq!(naming.display_name, "Group: plans: v2/final");
    }

    #[test]
    fn unnamed_group_joins_first_three_members() {
        let channel = Channel {
            id: "123".into(),
            kind: ChannelKind::Group,
            name: None,
            recipients: vec![
                recipient("a", None),
                recipient("b", None),
                recipient("c", None),
                recipient("d", None),
            ],
        };
        let naming = channel_naming(&channel).unwrap();
        assert_eq!(naming.file_name, "group_a_b_c.json");
        assert_eq!(naming.display_name, "Group: a, b, c");
    }

    #[test]
    fn unnamed_group_without_members_is_unnameable() {
        let channel = Channel {
            id: "123".into(),
            kind: ChannelKind::Group,
            name: None,
            recipients: vec![],
        };
        assert!(channel_naming(&channel).is_none());
    }

    #[test]
    fn unsupported_kind_is_unnameable() {
        let channel = Channel {
            id: "123".into(),
            kind: ChannelKind::Other(0),
            name: None,
            recipients: vec![recipient("alice", None)],
        };
        assert!(channel_naming(&channel).is_none());
    }

    #[test]
    fn document_name_caps_length() {
        let name = sanitize_document_name(&format!("{}.json", "x".repeat(300)));
        assert_eq!(name.chars().count(), 100);
    }

    #[tokio::test]
    async fn write_document_creates_valid_json_and_no_leftovers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice.json");

        write_document(&path, &empty_document()).await.unwrap();

        let parsed: ConversationDocument =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.channel_id, "123");
        assert!(!sibling(&path, ".tmp").exists());
        assert!(!sibling(&path, ".bak").exists());
    }

    #[tokio::test]
    async fn write_document_replaces_previous_version_completely() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice.json");
        std::fs::write(&path, br#"{"old": "archive"}"#).unwrap();

        let mut doc = empty_document();
        doc.total_messages = 42;
        write_document(&path, &doc).await.unwrap();

        let parsed: ConversationDocument =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.total_messages, 42);
        assert!(!sibling(&path, ".bak").exists(), "backup deleted after the move");
    }

    #[tokio::test]
    async fn write_document_survives_stale_tmp_and_bak_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice.json");
        std::fs::write(sibling(&path, ".tmp"), b"stale tmp").unwrap();
        std::fs::write(sibling(&path, ".bak"), b"stale bak").unwrap();

        write_document(&path, &empty_document()).await.unwrap();

        let parsed: ConversationDocument =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.channel_id, "123");
    }

    #[tokio::test]
    async fn failed_replace_keeps_prior_state_and_removes_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice.json");
        std::fs::write(&path, br#"{"old": true}"#).unwrap();

        // A non-empty directory at the backup path makes the move-aside fail
        let bak = sibling(&path, ".bak");
        std::fs::create_dir(&bak).unwrap();
        std::fs::write(bak.join("occupied"), b"x").unwrap();

        let err = write_document(&path, &empty_document()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(
            std::fs::read(&path).unwrap(),
            br#"{"old": true}"#,
            "canonical file keeps its prior valid content"
        );
        assert!(!sibling(&path, ".tmp").exists(), "temp file cleaned up");
    }
}
