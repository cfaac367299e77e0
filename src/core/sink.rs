//! Single consumer for all comment pages.
//!
//! Fetchers push `(destination, page)` entries into a bounded queue; a full
//! queue suspends the producer. One blocking task drains the queue and does
//! every file write, so no destination is ever touched by two tasks. The last
//! page of a video carries an acknowledgement that is answered once the file
//! is closed, so a video only counts as downloaded after it is on disk.

use crate::core::models::{Comment, Page};
use crate::core::template::CommentTemplate;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Output file for one video
#[derive(Debug)]
pub struct WriteDestination {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl WriteDestination {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to create output file {}: {e}", path.display()),
            )
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, template: &CommentTemplate, comments: &[Comment]) -> io::Result<()> {
        for comment in comments {
            writeln!(self.writer, "{}", template.render(comment))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn close(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Answered with the outcome of writing and closing a video's file.
pub type WriteAck = oneshot::Sender<io::Result<()>>;

/// One queued page. The first entry of a video carries its destination,
/// handing ownership of the file from the fetcher to the sink.
#[derive(Debug)]
pub struct SinkEntry {
    pub video_id: String,
    pub destination: Option<WriteDestination>,
    pub page: Page,
    /// Set on the last page only.
    pub written: Option<WriteAck>,
}

pub type SinkSender = mpsc::Sender<SinkEntry>;
pub type SinkReceiver = mpsc::Receiver<SinkEntry>;

pub fn hand_off_queue(capacity: usize) -> (SinkSender, SinkReceiver) {
    mpsc::channel(capacity.max(1))
}

/// What the sink did over its lifetime
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SinkReport {
    pub pages_written: usize,
    pub comments_written: usize,
    /// Videos whose destination was closed after their last page, in close order.
    pub closed: Vec<String>,
    /// Videos whose stream stopped before a last page arrived.
    pub left_open: Vec<String>,
    pub write_failures: Vec<(String, String)>,
}

pub struct OrderedWriteSink {
    template: CommentTemplate,
    open: HashMap<String, WriteDestination>,
    failed: HashMap<String, String>,
    report: SinkReport,
}

impl OrderedWriteSink {
    pub fn new(template: CommentTemplate) -> Self {
        Self {
            template,
            open: HashMap::new(),
            failed: HashMap::new(),
            report: SinkReport::default(),
        }
    }

    /// Start the drain task. It finishes once every sender is dropped and the
    /// queue is empty.
    pub fn spawn(self, receiver: SinkReceiver) -> JoinHandle<SinkReport> {
        tokio::task::spawn_blocking(move || self.drain(receiver))
    }

    pub fn drain(mut self, mut receiver: SinkReceiver) -> SinkReport {
        while let Some(entry) = receiver.blocking_recv() {
            self.handle(entry);
        }
        self.finish()
    }

    fn handle(&mut self, entry: SinkEntry) {
        let SinkEntry {
            video_id,
            destination,
            page,
            written,
        } = entry;

        let result = self.write_page(&video_id, destination, &page);
        if let Some(ack) = written {
            // A fetcher that stopped waiting has nothing left to update.
            let _ = ack.send(result);
        }
    }

    fn write_page(
        &mut self,
        video_id: &str,
        destination: Option<WriteDestination>,
        page: &Page,
    ) -> io::Result<()> {
        if let Some(destination) = destination {
            if self.open.insert(video_id.to_string(), destination).is_some() {
                warn!("Replaced an open destination for video {video_id}");
            }
        }

        let Some(destination) = self.open.get_mut(video_id) else {
            if let Some(reason) = self.failed.get(video_id) {
                return Err(io::Error::other(format!("earlier write failed: {reason}")));
            }
            warn!("Dropping page for video {video_id}: no open destination");
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no open destination for video {video_id}"),
            ));
        };

        if let Err(e) = destination.append(&self.template, &page.comments) {
            error!(
                "Failed to write comments to {}: {e}",
                destination.path().display()
            );
            self.open.remove(video_id);
            self.record_failure(video_id, &e);
            return Err(e);
        }

        self.report.pages_written += 1;
        self.report.comments_written += page.comments.len();

        if page.is_last() {
            if let Some(destination) = self.open.remove(video_id) {
                let path = destination.path().to_path_buf();
                if let Err(e) = destination.close() {
                    error!("Failed to close {}: {e}", path.display());
                    self.record_failure(video_id, &e);
                    return Err(e);
                }
                debug!("Closed {}", path.display());
                self.report.closed.push(video_id.to_string());
            }
        }

        Ok(())
    }

    fn record_failure(&mut self, video_id: &str, e: &io::Error) {
        self.failed.insert(video_id.to_string(), e.to_string());
        self.report
            .write_failures
            .push((video_id.to_string(), e.to_string()));
    }

    fn finish(mut self) -> SinkReport {
        // Streams that never saw a last page keep whatever was written so far.
        for (video_id, mut destination) in self.open.drain() {
            if let Err(e) = destination.flush() {
                error!("Failed to flush {}: {e}", destination.path().display());
            }
            info!(
                "Leaving partial output for video {video_id} at {}",
                destination.path().display()
            );
            self.report.left_open.push(video_id);
        }
        self.report.left_open.sort();
        self.report
    }
}
