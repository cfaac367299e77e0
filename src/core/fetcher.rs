use crate::core::api::{ApiError, ChatApi, ErrorContext};
use crate::core::ledger::CompletionLedger;
use crate::core::models::WorkItem;
use crate::core::progress::ProgressHandle;
use crate::core::sink::{SinkEntry, SinkSender, WriteDestination};
use log::{error, info, warn};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How a single video's pagination loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Completed { pages: usize },
    Cancelled { pages: usize },
    Failed(String),
}

#[derive(Debug)]
enum FetchState {
    Fetching,
    Retrying(ApiError),
    /// Last page queued; waiting for the sink to close the file.
    Flushing(oneshot::Receiver<io::Result<()>>),
    Cancelled,
}

/// Runs the cursor pagination loop for one video at a time. Shared by every
/// pool slot; all per-video state lives inside [`CommentFetcher::fetch`].
pub struct CommentFetcher {
    api: Arc<dyn ChatApi>,
    sink: SinkSender,
    ledger: Arc<CompletionLedger>,
    cancel: CancellationToken,
    output_root: PathBuf,
    retry_delay: Duration,
    log_dir: Option<PathBuf>,
}

impl CommentFetcher {
    pub fn new(
        api: Arc<dyn ChatApi>,
        sink: SinkSender,
        ledger: Arc<CompletionLedger>,
        cancel: CancellationToken,
        output_root: PathBuf,
    ) -> Self {
        Self {
            api,
            sink,
            ledger,
            cancel,
            log_dir: Some(output_root.clone()),
            output_root,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_error_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    pub async fn fetch(&self, item: &WorkItem, progress: &ProgressHandle) -> FetchOutcome {
        let path = item.output_path(&self.output_root);
        info!("Downloading chat for {} into {}", item.file_name(), path.display());

        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        let mut state = FetchState::Fetching;

        loop {
            state = match state {
                FetchState::Fetching => {
                    if self.cancel.is_cancelled() {
                        FetchState::Cancelled
                    } else {
                        match self
                            .api
                            .get_comment_page(&item.video_id, cursor.as_deref())
                            .await
                        {
                            Ok(page) => {
                                if progress.is_disconnected() {
                                    info!("Connection restored for {}", item.file_name());
                                    progress.set_disconnected(false);
                                }

                                // The file is only created once there is something to put in it.
                                let destination = if pages == 0 {
                                    match WriteDestination::create(&path) {
                                        Ok(destination) => Some(destination),
                                        Err(e) => {
                                            error!("Cannot start {}: {e}", item.file_name());
                                            return FetchOutcome::Failed(e.to_string());
                                        }
                                    }
                                } else {
                                    None
                                };

                                let next_cursor = page.next_cursor.clone();
                                let last_offset = page.last_offset();
                                let (written, flushed) = match next_cursor {
                                    Some(_) => (None, None),
                                    None => {
                                        let (ack, flushed) = oneshot::channel();
                                        (Some(ack), Some(flushed))
                                    }
                                };
                                let entry = SinkEntry {
                                    video_id: item.video_id.clone(),
                                    destination,
                                    page,
                                    written,
                                };
                                if self.sink.send(entry).await.is_err() {
                                    error!("Write sink stopped while downloading {}", item.file_name());
                                    return FetchOutcome::Failed("write sink stopped".to_string());
                                }
                                pages += 1;

                                if let Some(offset) = last_offset {
                                    progress.report(offset);
                                }

                                match flushed {
                                    Some(flushed) => FetchState::Flushing(flushed),
                                    None => {
                                        cursor = next_cursor;
                                        FetchState::Fetching
                                    }
                                }
                            }
                            Err(e) if e.is_connectivity() => FetchState::Retrying(e),
                            Err(e) => {
                                let mut context = ErrorContext::new("get_comment_page")
                                    .with_video(&item.video_id, &item.channel)
                                    .with_api_error(&e)
                                    .with_metadata("pages_received", &pages.to_string());
                                if let Some(cursor) = &cursor {
                                    context = context.with_metadata("cursor", cursor);
                                }
                                context.log_error(self.log_dir.as_deref());
                                return FetchOutcome::Failed(e.to_string());
                            }
                        }
                    }
                }
                FetchState::Retrying(e) => {
                    progress.set_disconnected(true);
                    warn!(
                        "Lost connection while downloading {}: {e}. Retrying in {:?}",
                        item.file_name(),
                        self.retry_delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => FetchState::Cancelled,
                        _ = tokio::time::sleep(self.retry_delay) => FetchState::Fetching,
                    }
                }
                FetchState::Flushing(flushed) => {
                    return match flushed.await {
                        Ok(Ok(())) => {
                            progress.finish();
                            self.ledger.add(
                                &item.channel,
                                &item.video_id,
                                &item.duration.display,
                                item.created_at,
                            );
                            info!("Finished {} ({pages} page(s))", item.file_name());
                            FetchOutcome::Completed { pages }
                        }
                        Ok(Err(e)) => {
                            error!("Failed to write {}: {e}", path.display());
                            FetchOutcome::Failed(format!("write failed: {e}"))
                        }
                        Err(_) => {
                            error!("Write sink stopped before {} was closed", item.file_name());
                            FetchOutcome::Failed("write sink stopped".to_string())
                        }
                    };
                }
                FetchState::Cancelled => {
                    info!("Stopped {} after {pages} page(s)", item.file_name());
                    return FetchOutcome::Cancelled { pages };
                }
            };
        }
    }
}
