//! Live download progress.
//!
//! Each in-flight video owns one [`ProgressHandle`]; the fetcher for that
//! video is its only writer. The renderer task periodically reads a snapshot
//! of every entry and redraws the live block, so fetchers never wait on it.

use crate::core::models::{VideoDuration, WorkItem};
use crate::terminal::ProgressOutput;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_secs(1);

const FINISHED: i64 = -1;
const BLOCK_COUNT: usize = 20;
const FILE_NAME_PADDING: usize = 35;
const DISPLAY_DURATION_PADDING: usize = 10;

pub const TRAILING_COMMENTS_STATUS: &str =
    " Downloading comments that were posted after the VOD finished";
pub const DISCONNECTED_STATUS: &str = "Connection lost, retrying...";

#[derive(Debug)]
struct ProgressEntry {
    video_id: String,
    label: String,
    duration: VideoDuration,
    offset: AtomicI64,
    disconnected: AtomicBool,
}

/// Point-in-time view of one entry
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressSnapshot {
    Pending,
    Downloading { offset: u64, duration: u64 },
    Finished,
}

/// Writer side of a single video's progress
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    entry: Arc<ProgressEntry>,
}

impl ProgressHandle {
    /// Record the offset of the newest comment seen. Values are clamped to the
    /// video's duration and never move backwards.
    pub fn report(&self, offset_seconds: u64) {
        let clamped = offset_seconds.min(self.entry.duration.seconds) as i64;
        let current = self.entry.offset.load(Ordering::Acquire);
        if current == FINISHED || clamped <= current {
            return;
        }
        self.entry.offset.store(clamped, Ordering::Release);
    }

    pub fn finish(&self) {
        self.entry.offset.store(FINISHED, Ordering::Release);
        self.entry.disconnected.store(false, Ordering::Release);
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.entry.disconnected.store(disconnected, Ordering::Release);
    }

    pub fn is_disconnected(&self) -> bool {
        self.entry.disconnected.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> ProgressSnapshot {
        snapshot_of(&self.entry)
    }
}

fn snapshot_of(entry: &ProgressEntry) -> ProgressSnapshot {
    match entry.offset.load(Ordering::Acquire) {
        FINISHED => ProgressSnapshot::Finished,
        0 => ProgressSnapshot::Pending,
        offset => ProgressSnapshot::Downloading {
            offset: offset as u64,
            duration: entry.duration.seconds,
        },
    }
}

/// Lines produced by one render pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderFrame {
    /// Permanent lines for videos that finished since the previous pass.
    pub completed: Vec<String>,
    /// Replaceable block describing videos still in progress.
    pub live: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: Mutex<Vec<Arc<ProgressEntry>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, item: &WorkItem) -> ProgressHandle {
        let entry = Arc::new(ProgressEntry {
            video_id: item.video_id.clone(),
            label: item.file_name(),
            duration: item.duration.clone(),
            offset: AtomicI64::new(0),
            disconnected: AtomicBool::new(false),
        });
        self.lock().push(Arc::clone(&entry));
        ProgressHandle { entry }
    }

    /// Drop an entry that will never finish (failed or cancelled).
    pub fn remove(&self, video_id: &str) {
        self.lock().retain(|e| e.video_id != video_id);
    }

    #[cfg(test)]
    pub fn any_disconnected(&self) -> bool {
        self.lock()
            .iter()
            .any(|e| e.disconnected.load(Ordering::Acquire))
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Build the next frame. Finished entries are reported once and then forgotten.
    pub fn render_frame(&self) -> RenderFrame {
        let mut entries = self.lock();
        let mut frame = RenderFrame::default();
        let mut disconnected = false;

        entries.retain(|entry| {
            if snapshot_of(entry) == ProgressSnapshot::Finished {
                frame
                    .completed
                    .push(format!("{:<FILE_NAME_PADDING$}Done.", entry.label));
                false
            } else {
                true
            }
        });

        for entry in entries.iter() {
            disconnected |= entry.disconnected.load(Ordering::Acquire);
            if let ProgressSnapshot::Downloading { offset, duration } = snapshot_of(entry) {
                frame.live.push(render_line(
                    &entry.label,
                    &entry.duration.display,
                    offset,
                    duration,
                ));
            }
        }

        if disconnected {
            frame.live.push(DISCONNECTED_STATUS.to_string());
        }

        frame
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<ProgressEntry>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn render_line(label: &str, display_duration: &str, offset: u64, duration: u64) -> String {
    let name = format!("{label:<FILE_NAME_PADDING$}");
    if offset >= duration {
        return format!("{name}{TRAILING_COMMENTS_STATUS}");
    }

    let fraction = offset as f64 / duration as f64;
    let blocks = (fraction * BLOCK_COUNT as f64) as usize;
    let bar = format!("{}>", "=".repeat(blocks));
    format!(
        "{name}{display_duration:<DISPLAY_DURATION_PADDING$} [{bar:<BLOCK_COUNT$}] {:>7.2}%",
        fraction * 100.0
    )
}

/// Periodic renderer driving a [`ProgressOutput`]
pub struct ProgressRenderer;

impl ProgressRenderer {
    /// Spawn the render loop. It draws every `interval` until `stop` is
    /// cancelled, then draws one final frame so no completion is lost.
    pub fn spawn(
        tracker: Arc<ProgressTracker>,
        mut output: Box<dyn ProgressOutput>,
        interval: Duration,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tick.tick() => {}
                }
                Self::draw(&tracker, output.as_mut());
            }
            Self::draw(&tracker, output.as_mut());
            if let Err(e) = output.clear_live() {
                log::debug!("Failed to clear progress display: {e}");
            }
        })
    }

    fn draw(tracker: &ProgressTracker, output: &mut dyn ProgressOutput) {
        let frame = tracker.render_frame();
        if let Err(e) = output.draw(&frame.completed, &frame.live) {
            log::debug!("Failed to draw progress: {e}");
        }
    }
}
