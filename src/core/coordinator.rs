use crate::core::api::ChatApi;
use crate::core::fetcher::{CommentFetcher, DEFAULT_RETRY_DELAY, FetchOutcome};
use crate::core::ledger::CompletionLedger;
use crate::core::models::WorkItem;
use crate::core::progress::ProgressTracker;
use crate::core::sink::{DEFAULT_QUEUE_CAPACITY, OrderedWriteSink, SinkReport, hand_off_queue};
use crate::core::template::CommentTemplate;
use log::{debug, error, info};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Result of one coordinated run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DownloadSummary {
    pub completed: Vec<String>,
    pub cancelled: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Work items never started because cancellation was raised first.
    pub not_started: usize,
    /// Highest number of fetchers running at the same time.
    pub peak_active: usize,
    pub sink: SinkReport,
}

/// Runs one fetcher per work item with at most `max_concurrent` in flight,
/// starting the next item as soon as any running fetcher returns.
pub struct DownloadCoordinator {
    api: Arc<dyn ChatApi>,
    ledger: Arc<CompletionLedger>,
    tracker: Arc<ProgressTracker>,
    template: CommentTemplate,
    output_root: PathBuf,
    max_concurrent: usize,
    queue_capacity: usize,
    retry_delay: Duration,
    error_log_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl DownloadCoordinator {
    pub fn new(
        api: Arc<dyn ChatApi>,
        ledger: Arc<CompletionLedger>,
        tracker: Arc<ProgressTracker>,
        template: CommentTemplate,
        output_root: PathBuf,
        max_concurrent: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            ledger,
            tracker,
            template,
            error_log_dir: Some(output_root.clone()),
            output_root,
            max_concurrent: max_concurrent.max(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_delay: DEFAULT_RETRY_DELAY,
            cancel,
        }
    }

    #[cfg(test)]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[cfg(test)]
    pub fn with_error_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.error_log_dir = dir;
        self
    }

    pub async fn run(&self, items: Vec<WorkItem>) -> io::Result<DownloadSummary> {
        let mut summary = DownloadSummary::default();

        // The sink must be draining before the first fetcher can push a page.
        let (sender, receiver) = hand_off_queue(self.queue_capacity);
        let sink = OrderedWriteSink::new(self.template.clone()).spawn(receiver);

        let fetcher = Arc::new(
            CommentFetcher::new(
                Arc::clone(&self.api),
                sender,
                Arc::clone(&self.ledger),
                self.cancel.clone(),
                self.output_root.clone(),
            )
            .with_retry_delay(self.retry_delay)
            .with_error_log_dir(self.error_log_dir.clone()),
        );

        info!(
            "Downloading {} video(s) with up to {} at a time",
            items.len(),
            self.max_concurrent
        );

        let mut pending = items.into_iter();
        let mut active: JoinSet<(String, FetchOutcome)> = JoinSet::new();
        let mut uncaught: Option<String> = None;

        loop {
            while active.len() < self.max_concurrent && !self.cancel.is_cancelled() {
                let Some(item) = pending.next() else { break };
                let progress = self.tracker.register(&item);
                let fetcher = Arc::clone(&fetcher);
                active.spawn(async move {
                    let outcome = fetcher.fetch(&item, &progress).await;
                    (item.video_id, outcome)
                });
                summary.peak_active = summary.peak_active.max(active.len());
            }

            let Some(joined) = active.join_next().await else {
                break;
            };

            match joined {
                Ok((video_id, FetchOutcome::Completed { pages })) => {
                    debug!("Video {video_id} completed with {pages} page(s)");
                    summary.completed.push(video_id);
                }
                Ok((video_id, FetchOutcome::Cancelled { pages })) => {
                    debug!("Video {video_id} cancelled after {pages} page(s)");
                    self.tracker.remove(&video_id);
                    summary.cancelled.push(video_id);
                }
                Ok((video_id, FetchOutcome::Failed(reason))) => {
                    error!("Download of video {video_id} failed: {reason}");
                    self.tracker.remove(&video_id);
                    summary.failed.push((video_id, reason));
                }
                Err(e) => {
                    error!("Fetch task aborted: {e}");
                    uncaught.get_or_insert_with(|| e.to_string());
                    self.cancel.cancel();
                }
            }
        }

        summary.not_started = pending.count();

        // Dropping the last sender closes the queue; the sink drains what is left.
        drop(fetcher);
        summary.sink = sink
            .await
            .map_err(|e| io::Error::other(format!("Write sink aborted: {e}")))?;

        if let Some(reason) = uncaught {
            return Err(io::Error::other(format!("Download aborted: {reason}")));
        }

        info!(
            "Wrote {} comment(s) in {} page(s), at most {} video(s) at once",
            summary.sink.comments_written, summary.sink.pages_written, summary.peak_active
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::api::ApiError;
    use crate::core::resolver::{WorkRequest, WorkResolver};
    use crate::test_fixtures::{MockChatApi, page, sample_video, wait_until, work_item};
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        ledger: Arc<CompletionLedger>,
        tracker: Arc<ProgressTracker>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let ledger =
                Arc::new(CompletionLedger::load(&dir.path().join("LogsDB.json")).unwrap());
            Self {
                dir,
                ledger,
                tracker: Arc::new(ProgressTracker::new()),
                cancel: CancellationToken::new(),
            }
        }

        fn coordinator(&self, api: Arc<MockChatApi>, max_concurrent: usize) -> DownloadCoordinator {
            DownloadCoordinator::new(
                api,
                Arc::clone(&self.ledger),
                Arc::clone(&self.tracker),
                CommentTemplate::default(),
                self.dir.path().to_path_buf(),
                max_concurrent,
                self.cancel.clone(),
            )
            .with_retry_delay(Duration::from_millis(10))
            .with_error_log_dir(None)
        }
    }

    fn single_page(body: &str) -> Vec<crate::core::models::Page> {
        vec![page(&[(1.0, body)], None)]
    }

    #[tokio::test]
    async fn test_greedy_refill_starts_next_item_when_any_slot_frees() {
        let harness = Harness::new();
        let api = Arc::new(
            MockChatApi::new()
                .with_user("streamer", "1", "Streamer")
                .with_channel_videos(
                    "1",
                    vec![
                        sample_video("long", "Streamer", "10s"),
                        sample_video("short", "Streamer", "5s"),
                        sample_video("mid", "Streamer", "8s"),
                    ],
                )
                .with_pages("long", single_page("l"))
                .with_pages("mid", single_page("m"))
                .with_pages("short", single_page("s"))
                .with_gate("long")
                .with_gate("mid"),
        );

        let items = WorkResolver::new(api.as_ref(), &harness.ledger)
            .resolve(&WorkRequest::Channels {
                names: vec!["streamer".to_string()],
                first: 20,
            })
            .await
            .unwrap();
        let order: Vec<_> = items.iter().map(|i| i.video_id.as_str()).collect();
        assert_eq!(order, vec!["long", "mid", "short"]);

        let coordinator = harness.coordinator(Arc::clone(&api), 2);
        let run = tokio::spawn(async move { coordinator.run(items).await });

        wait_until(|| api.started().len() == 2).await;
        let mut started = api.started();
        started.sort();
        assert_eq!(started, vec!["long".to_string(), "mid".to_string()]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(api.started().len(), 2, "third item must wait for a free slot");

        api.open_gate("mid");
        wait_until(|| api.started().contains(&"short".to_string())).await;
        assert!(!api.completed().contains(&"long".to_string()));

        api.open_gate("long");
        let summary = run.await.unwrap().unwrap();

        assert_eq!(summary.completed.len(), 3);
        assert_eq!(summary.peak_active, 2);
        assert!(api.peak_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_pool_never_exceeds_limit() {
        let harness = Harness::new();
        let mut api = MockChatApi::new().with_latency(Duration::from_millis(5));
        let mut items = Vec::new();
        for i in 0..12 {
            let id = i.to_string();
            api = api.with_pages(
                &id,
                vec![
                    page(&[(1.0, "a")], Some("c1")),
                    page(&[(2.0, "b")], None),
                ],
            );
            items.push(work_item(&id, 60));
        }
        let api = Arc::new(api);

        let summary = harness
            .coordinator(Arc::clone(&api), 3)
            .run(items)
            .await
            .unwrap();

        assert_eq!(summary.completed.len(), 12);
        assert_eq!(summary.peak_active, 3);
        assert!(api.peak_in_flight() <= 3);
        assert_eq!(summary.sink.closed.len(), 12);
        assert_eq!(harness.ledger.len(), 12);
    }

    #[tokio::test]
    async fn test_failure_is_contained_to_one_video() {
        let harness = Harness::new();
        let api = Arc::new(
            MockChatApi::new()
                .with_pages("ok", single_page("fine"))
                .with_pages("bad", single_page("never"))
                .with_failure_at("bad", 0, ApiError::Decode("garbage".to_string())),
        );

        let summary = harness
            .coordinator(Arc::clone(&api), 2)
            .run(vec![work_item("ok", 60), work_item("bad", 30)])
            .await
            .unwrap();

        assert_eq!(summary.completed, vec!["ok".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "bad");
        assert!(harness.ledger.contains("Streamer", "ok"));
        assert!(!harness.ledger.contains("Streamer", "bad"));
        assert_eq!(harness.tracker.render_frame().completed.len(), 1);
        assert_eq!(harness.tracker.active_count(), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_unwritable_output_is_failed_and_not_recorded() {
        let harness = Harness::new();
        let unwritable = work_item("1", 60).output_path(harness.dir.path());
        std::fs::create_dir_all(unwritable.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink("/dev/full", &unwritable).unwrap();
        let api = Arc::new(
            MockChatApi::new()
                .with_pages("1", single_page("lost"))
                .with_pages("2", single_page("kept")),
        );

        let summary = harness
            .coordinator(Arc::clone(&api), 2)
            .run(vec![work_item("1", 60), work_item("2", 30)])
            .await
            .unwrap();

        assert_eq!(summary.completed, vec!["2".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "1");
        assert_eq!(summary.sink.write_failures.len(), 1);
        assert!(!harness.ledger.contains("Streamer", "1"));
        assert!(harness.ledger.contains("Streamer", "2"));

        let frame = harness.tracker.render_frame();
        assert_eq!(frame.completed.len(), 1);
        assert!(frame.completed[0].starts_with("Streamer_2"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_scheduling() {
        let harness = Harness::new();
        let cancel = harness.cancel.clone();
        let api = Arc::new(
            MockChatApi::new()
                .with_pages(
                    "a",
                    vec![
                        page(&[(1.0, "a1")], Some("c1")),
                        page(&[(2.0, "a2")], Some("c2")),
                        page(&[(3.0, "a3")], None),
                    ],
                )
                .with_pages("b", single_page("b1"))
                .with_pages("c", single_page("c1"))
                .on_request(move |n| {
                    if n == 0 {
                        cancel.cancel();
                    }
                }),
        );

        let summary = harness
            .coordinator(Arc::clone(&api), 1)
            .run(vec![work_item("a", 60), work_item("b", 50), work_item("c", 40)])
            .await
            .unwrap();

        assert_eq!(summary.cancelled, vec!["a".to_string()]);
        assert!(summary.completed.is_empty());
        assert_eq!(summary.not_started, 2);
        assert_eq!(api.started(), vec!["a".to_string()]);
        assert_eq!(harness.ledger.len(), 0);
        assert_eq!(summary.sink.left_open, vec!["a".to_string()]);

        let content =
            std::fs::read_to_string(work_item("a", 60).output_path(harness.dir.path())).unwrap();
        assert_eq!(content, "1\tviewer: a1\n");
    }

    #[tokio::test]
    async fn test_second_run_schedules_nothing() {
        let harness = Harness::new();
        let api = Arc::new(
            MockChatApi::new()
                .with_user("streamer", "1", "Streamer")
                .with_channel_videos(
                    "1",
                    vec![
                        sample_video("x", "Streamer", "10s"),
                        sample_video("y", "Streamer", "20s"),
                    ],
                )
                .with_pages("x", single_page("x"))
                .with_pages("y", single_page("y")),
        );
        let request = WorkRequest::Channels {
            names: vec!["streamer".to_string()],
            first: 20,
        };

        let items = WorkResolver::new(api.as_ref(), &harness.ledger)
            .resolve(&request)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        let summary = harness
            .coordinator(Arc::clone(&api), 2)
            .run(items)
            .await
            .unwrap();
        assert_eq!(summary.completed.len(), 2);
        harness.ledger.save().unwrap();

        let reloaded = CompletionLedger::load(&harness.dir.path().join("LogsDB.json")).unwrap();
        let items = WorkResolver::new(api.as_ref(), &reloaded)
            .resolve(&request)
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_empty_work_list() {
        let harness = Harness::new();
        let api = Arc::new(MockChatApi::new());

        let summary = harness.coordinator(api, 4).run(Vec::new()).await.unwrap();

        assert_eq!(summary, DownloadSummary::default());
    }

    #[tokio::test]
    async fn test_small_queue_applies_backpressure_without_loss() {
        let harness = Harness::new();
        let pages: Vec<_> = (0..20)
            .map(|i| {
                let cursor = if i < 19 { Some(format!("c{i}")) } else { None };
                page(&[(i as f64, "m")], cursor.as_deref())
            })
            .collect();
        let api = Arc::new(MockChatApi::new().with_pages("v", pages));

        let summary = harness
            .coordinator(Arc::clone(&api), 1)
            .with_queue_capacity(1)
            .run(vec![work_item("v", 60)])
            .await
            .unwrap();

        assert_eq!(summary.sink.pages_written, 20);
        let content =
            std::fs::read_to_string(work_item("v", 60).output_path(harness.dir.path())).unwrap();
        assert_eq!(content.lines().count(), 20);
    }
}
