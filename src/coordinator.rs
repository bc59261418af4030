//! Concurrency coordinator: fans the archiver out across channels
//!
//! A fixed worker budget (semaphore permits) bounds how many channels are
//! archived at once. Each channel runs as its own task; one channel's
//! failure is logged and tallied without touching siblings. Cancellation
//! stops dispatching new work and returns without waiting for in-flight
//! workers; they observe the shared token at page boundaries and wind down
//! on their own, so no rename sequence is interrupted midway.

use crate::archiver::{ArchiveContext, archive_channel};
use crate::error::{Error, Result};
use crate::types::{BatchSummary, Channel, Event};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Archive every channel with at most `worker_limit` running concurrently
pub(crate) async fn archive_channels(
    ctx: Arc<ArchiveContext>,
    channels: Vec<Channel>,
    update_mode: bool,
    worker_limit: usize,
) -> Result<BatchSummary> {
    let semaphore = Arc::new(Semaphore::new(worker_limit.max(1)));
    let mut tasks = Vec::with_capacity(channels.len());

    for channel in channels {
        let permit = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let ctx = Arc::clone(&ctx);
        tasks.push(tokio::spawn(async move {
            let _permit = permit;
            let outcome = archive_channel(&ctx, &channel, update_mode).await;
            (channel.id, outcome)
        }));
    }

    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let results = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
        results = futures::future::join_all(tasks) => results,
    };

    let mut summary = BatchSummary::default();
    for result in results {
        match result {
            Ok((_, Ok(outcome))) => summary.record(&outcome),
            Ok((_, Err(Error::Cancelled))) => return Err(Error::Cancelled),
            Ok((channel_id, Err(e))) => {
                tracing::error!(channel_id = %channel_id, error = %e, "Channel archive failed");
                let _ = ctx.events.send(Event::ChannelFailed {
                    channel_id,
                    error: e.to_string(),
                });
                summary.failed += 1;
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "Archive worker panicked");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
