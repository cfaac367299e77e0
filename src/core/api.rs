use crate::core::models::{Page, UserInfo, VideoMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Remote chat/video API consumed by the download pipeline
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    /// Resolve channel logins. Unknown logins are simply absent from the result.
    async fn get_users_by_login(&self, logins: &[String]) -> Result<Vec<UserInfo>, ApiError>;

    /// Look up metadata for up to 100 explicit video ids
    async fn get_videos_by_ids(&self, video_ids: &[String])
    -> Result<Vec<VideoMetadata>, ApiError>;

    /// Most recent `first` videos of a channel, following pagination as needed
    async fn get_videos_by_user(
        &self,
        user_id: &str,
        first: usize,
    ) -> Result<Vec<VideoMetadata>, ApiError>;

    /// One page of comments. `cursor` is `None` for the first page.
    async fn get_comment_page(
        &self,
        video_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page, ApiError>;
}

/// Error types for remote API operations
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The host could not be reached (no route, refused, timed out).
    Connectivity(String),
    /// The server answered with a non-success status.
    Status { status: u16, body: String },
    /// The response body did not match the expected shape.
    Decode(String),
    /// Credentials were rejected or could not be obtained.
    Auth(String),
}

impl ApiError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Connectivity(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Connectivity(_) => "connectivity_error",
            ApiError::Status { .. } => "api_error",
            ApiError::Decode(_) => "json_parse_error",
            ApiError::Auth(_) => "auth_error",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ApiError::Connectivity(err.to_string())
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            ApiError::Decode(err.to_string())
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Connectivity(msg) => write!(f, "Connection error: {msg}"),
            ApiError::Status { status, body } => write!(f, "API returned {status}: {body}"),
            ApiError::Decode(msg) => write!(f, "Data parse error: {msg}"),
            ApiError::Auth(msg) => write!(f, "Authentication error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<ApiError> for io::Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Auth(_) => io::Error::new(io::ErrorKind::PermissionDenied, err),
            _ => io::Error::other(err),
        }
    }
}

/// Structured record of a failed request, logged and appended to `error.log`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: String,
    pub video_id: Option<String>,
    pub channel: Option<String>,
    pub timestamp: String,
    pub error_type: String,
    pub error_message: String,
    pub request_url: Option<String>,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            video_id: None,
            channel: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            error_type: String::new(),
            error_message: String::new(),
            request_url: None,
            status_code: None,
            response_body: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_video(mut self, video_id: &str, channel: &str) -> Self {
        self.video_id = Some(video_id.to_string());
        self.channel = Some(channel.to_string());
        self
    }

    pub fn with_error(mut self, error_type: &str, message: &str) -> Self {
        self.error_type = error_type.to_string();
        self.error_message = message.to_string();
        self
    }

    pub fn with_api_error(self, err: &ApiError) -> Self {
        let ctx = self.with_error(err.error_type(), &err.to_string());
        match err {
            ApiError::Status { status, body } => {
                let mut ctx = ctx;
                ctx.status_code = Some(*status);
                ctx.response_body = Some(body.chars().take(512).collect());
                ctx
            }
            _ => ctx,
        }
    }

    pub fn with_request_details(
        mut self,
        url: &str,
        status_code: Option<u16>,
        response_body: Option<&str>,
    ) -> Self {
        self.request_url = Some(url.to_string());
        self.status_code = status_code;
        self.response_body = response_body.map(|s| s.chars().take(512).collect());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Log the failure and, when `log_dir` is given, append it to `<log_dir>/error.log`.
    pub fn log_error(&self, log_dir: Option<&Path>) {
        log::error!(
            target: "request_errors",
            "Request error | Operation: {} | Type: {} | Message: {} | Video: {:?} | Channel: {:?} | URL: {:?} | Status: {:?} | Context: {:?}",
            self.operation,
            self.error_type,
            self.error_message,
            self.video_id,
            self.channel,
            self.request_url,
            self.status_code,
            self.metadata
        );

        if let Some(dir) = log_dir {
            if let Err(e) = self.write_to_error_log(dir) {
                log::warn!("Failed to write to error log file: {e}");
            }
        }
    }

    fn write_to_error_log(&self, dir: &Path) -> io::Result<()> {
        use std::fs::OpenOptions;
        use std::io::Write;

        std::fs::create_dir_all(dir)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(error_log_path(dir))?;

        let error_json = serde_json::to_string(self).map_err(io::Error::other)?;
        writeln!(file, "{error_json}")?;

        Ok(())
    }
}

pub fn error_log_path(dir: &Path) -> PathBuf {
    dir.join("error.log")
}
