use crate::core::api::{ApiError, ChatApi};
use crate::core::models::{Comment, Page, UserInfo, VideoDuration, VideoMetadata, WorkItem};
use crate::core::settings::{Settings, SettingsFile};
use crate::core::template::DEFAULT_COMMENT_FORMAT;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub fn sample_created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap()
}

pub fn sample_video(video_id: &str, user_name: &str, duration: &str) -> VideoMetadata {
    VideoMetadata {
        video_id: video_id.to_string(),
        user_id: user_name.to_lowercase(),
        user_name: user_name.to_string(),
        duration: duration.to_string(),
        created_at: sample_created_at(),
    }
}

/// Work item on the "Streamer" channel
pub fn work_item(video_id: &str, duration_seconds: u64) -> WorkItem {
    WorkItem {
        video_id: video_id.to_string(),
        channel: "Streamer".to_string(),
        duration: VideoDuration::from_seconds(duration_seconds),
        created_at: sample_created_at(),
    }
}

pub fn comment(offset_seconds: f64, body: &str) -> Comment {
    Comment {
        offset_seconds,
        commenter_name: "viewer".to_string(),
        commenter_display_name: "Viewer".to_string(),
        message_body: body.to_string(),
    }
}

pub fn page(comments: &[(f64, &str)], next_cursor: Option<&str>) -> Page {
    Page {
        comments: comments
            .iter()
            .map(|(offset, body)| comment(*offset, body))
            .collect(),
        next_cursor: next_cursor.map(str::to_string),
    }
}

/// Settings pointing at `base_url`, with output (and `error.log`) under `output`.
pub fn settings_with_base_url(base_url: &str, output: &Path) -> Settings {
    let file = SettingsFile {
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        oauth_token: "test-token".to_string(),
        max_concurrent_downloads: 2,
        output_path: output.to_path_buf(),
        comment_format: DEFAULT_COMMENT_FORMAT.to_string(),
        api_base_url: Some(base_url.to_string()),
    };
    Settings::from_file(file, Path::new("settings.json")).unwrap()
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

type RequestHook = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct MockState {
    requests: Vec<(String, Option<String>)>,
    requests_per_video: HashMap<String, usize>,
    pages_served: HashMap<String, usize>,
    started: Vec<String>,
    completed: Vec<String>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// In-memory [`ChatApi`] with scripted pages and failures
#[derive(Default)]
pub struct MockChatApi {
    users: Vec<UserInfo>,
    channel_videos: HashMap<String, Vec<VideoMetadata>>,
    videos: Vec<VideoMetadata>,
    pages: HashMap<String, Vec<Page>>,
    connectivity_failures: HashMap<String, usize>,
    failures_at: HashMap<(String, usize), ApiError>,
    gates: HashMap<String, Arc<Semaphore>>,
    latency: Option<Duration>,
    hook: Option<RequestHook>,
    state: Mutex<MockState>,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, login: &str, user_id: &str, display_name: &str) -> Self {
        self.users.push(UserInfo {
            user_id: user_id.to_string(),
            login: login.to_string(),
            display_name: display_name.to_string(),
        });
        self
    }

    pub fn with_channel_videos(mut self, user_id: &str, videos: Vec<VideoMetadata>) -> Self {
        self.channel_videos.insert(user_id.to_string(), videos);
        self
    }

    pub fn with_video(mut self, video: VideoMetadata) -> Self {
        self.videos.push(video);
        self
    }

    pub fn with_pages(mut self, video_id: &str, pages: Vec<Page>) -> Self {
        self.pages.insert(video_id.to_string(), pages);
        self
    }

    /// The first `count` comment requests for the video fail with a connectivity error.
    pub fn with_connectivity_failures(mut self, video_id: &str, count: usize) -> Self {
        self.connectivity_failures
            .insert(video_id.to_string(), count);
        self
    }

    /// The comment request with zero-based index `request` for the video fails with `error`.
    pub fn with_failure_at(mut self, video_id: &str, request: usize, error: ApiError) -> Self {
        self.failures_at
            .insert((video_id.to_string(), request), error);
        self
    }

    /// Comment requests for the video block until [`MockChatApi::open_gate`] is called.
    pub fn with_gate(mut self, video_id: &str) -> Self {
        self.gates
            .insert(video_id.to_string(), Arc::new(Semaphore::new(0)));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Called with the global request number on every comment request,
    /// before the scripted response is chosen.
    pub fn on_request(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn open_gate(&self, video_id: &str) {
        if let Some(gate) = self.gates.get(video_id) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Videos in the order their first comment request arrived
    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    /// Videos whose last page has been served
    pub fn completed(&self) -> Vec<String> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    fn scripted_response(&self, video_id: &str, request: usize) -> Result<Page, ApiError> {
        let failures = self
            .connectivity_failures
            .get(video_id)
            .copied()
            .unwrap_or(0);
        if request < failures {
            return Err(ApiError::Connectivity("connection refused".to_string()));
        }
        if let Some(error) = self.failures_at.get(&(video_id.to_string(), request)) {
            return Err(error.clone());
        }

        let Some(pages) = self.pages.get(video_id) else {
            return Err(ApiError::Status {
                status: 404,
                body: format!("no comments for {video_id}"),
            });
        };

        let mut state = self.state.lock().unwrap();
        let served = state.pages_served.entry(video_id.to_string()).or_insert(0);
        let Some(page) = pages.get(*served).cloned() else {
            return Err(ApiError::Status {
                status: 400,
                body: "cursor past the last page".to_string(),
            });
        };
        *served += 1;
        if page.is_last() {
            state.completed.push(video_id.to_string());
        }
        Ok(page)
    }
}

#[async_trait::async_trait]
impl ChatApi for MockChatApi {
    async fn get_users_by_login(&self, logins: &[String]) -> Result<Vec<UserInfo>, ApiError> {
        Ok(self
            .users
            .iter()
            .filter(|u| logins.iter().any(|l| l.eq_ignore_ascii_case(&u.login)))
            .cloned()
            .collect())
    }

    async fn get_videos_by_ids(
        &self,
        video_ids: &[String],
    ) -> Result<Vec<VideoMetadata>, ApiError> {
        Ok(self
            .videos
            .iter()
            .filter(|v| video_ids.contains(&v.video_id))
            .cloned()
            .collect())
    }

    async fn get_videos_by_user(
        &self,
        user_id: &str,
        first: usize,
    ) -> Result<Vec<VideoMetadata>, ApiError> {
        Ok(self
            .channel_videos
            .get(user_id)
            .map(|videos| videos.iter().take(first).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_comment_page(
        &self,
        video_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page, ApiError> {
        let (number, request) = {
            let mut state = self.state.lock().unwrap();
            let number = state.requests.len();
            state
                .requests
                .push((video_id.to_string(), cursor.map(str::to_string)));
            let per_video = state
                .requests_per_video
                .entry(video_id.to_string())
                .or_insert(0);
            let request = *per_video;
            *per_video += 1;
            if request == 0 {
                state.started.push(video_id.to_string());
            }
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            (number, request)
        };

        if let Some(hook) = &self.hook {
            hook(number);
        }
        if let Some(gate) = self.gates.get(video_id) {
            let _permit = gate.acquire().await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let response = self.scripted_response(video_id, request);
        self.state.lock().unwrap().in_flight -= 1;
        response
    }
}
