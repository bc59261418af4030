//! Attachment downloads
//!
//! Attachments are stored under the attachment directory, namespaced by
//! channel id, named by sanitized original filename. Deduplication is by
//! path only: if the computed path already exists the download is skipped.
//! Two attachments in one channel whose names sanitize identically will
//! therefore collide; a known limitation, not content-hash dedup.

use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::stats::RunStatistics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Write-buffer size for streamed attachment bodies; bounds memory use
/// regardless of attachment size
const STREAM_BUFFER_SIZE: usize = 8 * 1024;

/// Maximum length of a sanitized attachment filename
const MAX_NAME_LEN: usize = 200;

/// Downloads attachment bodies to per-channel directories
#[derive(Debug, Clone)]
pub(crate) struct AttachmentFetcher {
    client: Arc<ApiClient>,
    root: PathBuf,
    stats: Arc<RunStatistics>,
}

impl AttachmentFetcher {
    pub(crate) fn new(client: Arc<ApiClient>, root: PathBuf, stats: Arc<RunStatistics>) -> Self {
        Self {
            client,
            root,
            stats,
        }
    }

    /// Fetch one attachment, returning its local path.
    ///
    /// Returns the existing path without a request if the file is already
    /// present. Any failure is logged and yields `None`; an attachment
    /// failure never aborts the enclosing conversation download. The
    /// returned path always refers to a fully-written file.
    pub(crate) async fn fetch(
        &self,
        url: &str,
        filename: &str,
        channel_id: &str,
    ) -> Option<PathBuf> {
        let safe = sanitize_attachment_name(filename);
        if safe.is_empty() {
            tracing::warn!(channel_id, filename, "Attachment filename sanitized to nothing, skipping");
            return None;
        }

        let dir = self.root.join(channel_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!(channel_id, error = %e, "Could not create attachment directory");
            return None;
        }

        let path = dir.join(&safe);
        if tokio::fs::metadata(&path).await.is_ok() {
            return Some(path);
        }

        match self.download(url, &path).await {
            Ok(()) => {
                self.stats.add_attachment();
                Some(path)
            }
            Err(e) => {
                tracing::error!(channel_id, filename, error = %e, "Attachment download failed");
                None
            }
        }
    }

    /// Stream the body to `<path>.part`, then rename into place
    async fn download(&self, url: &str, path: &Path) -> Result<()> {
        let part = part_path(path);
        let result = self.stream_to(url, &part, path).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        result
    }

    async fn stream_to(&self, url: &str, part: &Path, path: &Path) -> Result<()> {
        let mut response = self.client.fetch_binary(url).await?;

        let file = tokio::fs::File::create(part).await?;
        let mut writer = BufWriter::with_capacity(STREAM_BUFFER_SIZE, file);
        while let Some(chunk) = response.chunk().await.map_err(Error::Network)? {
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        drop(writer);

        tokio::fs::rename(part, path).await?;
        Ok(())
    }
}

/// Reduce a remote filename to a safe path component: alphanumeric characters
/// and `._- ` only, truncated to 200 characters
pub(crate) fn sanitize_attachment_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || "._- ".contains(*c))
        .take(MAX_NAME_LEN)
        .collect()
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
