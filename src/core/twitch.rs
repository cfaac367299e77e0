use crate::core::api::{ApiError, ChatApi, ErrorContext};
use crate::core::models::{Comment, Page, UserInfo, VideoMetadata};
use crate::core::settings::Settings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_HELIX_URL: &str = "https://api.twitch.tv/helix/";
const DEFAULT_V5_URL: &str = "https://api.twitch.tv/v5/";
const DEFAULT_OAUTH_URL: &str = "https://id.twitch.tv/oauth2/";
const V5_MEDIA_TYPE: &str = "application/vnd.twitchtv.v5+json";
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct HelixUsersResponse {
    data: Vec<HelixUser>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct HelixVideosResponse {
    data: Vec<HelixVideo>,
    #[serde(default)]
    pagination: HelixPagination,
}

#[derive(Debug, Default, Deserialize)]
struct HelixPagination {
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixVideo {
    id: String,
    user_id: String,
    user_name: String,
    created_at: DateTime<Utc>,
    duration: String,
}

impl From<HelixVideo> for VideoMetadata {
    fn from(video: HelixVideo) -> Self {
        Self {
            video_id: video.id,
            user_id: video.user_id,
            user_name: video.user_name,
            duration: video.duration,
            created_at: video.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct V5CommentsResponse {
    comments: Vec<V5Comment>,
    #[serde(rename = "_next")]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V5Comment {
    content_offset_seconds: f64,
    commenter: V5Commenter,
    message: V5Message,
}

#[derive(Debug, Deserialize)]
struct V5Commenter {
    name: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct V5Message {
    body: String,
}

impl From<V5Comment> for Comment {
    fn from(comment: V5Comment) -> Self {
        Self {
            offset_seconds: comment.content_offset_seconds,
            commenter_name: comment.commenter.name,
            commenter_display_name: comment.commenter.display_name,
            message_body: comment.message.body,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenValidation {
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct AppTokenResponse {
    access_token: String,
}

/// HTTP client for the Twitch Helix and v5 comment endpoints
pub struct TwitchClient {
    client: Client,
    helix_url: String,
    v5_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
    access_token: String,
    log_dir: Option<PathBuf>,
}

impl TwitchClient {
    pub fn new(settings: &Settings) -> io::Result<Self> {
        let (helix_url, v5_url, oauth_url) = match &settings.api_base_url {
            Some(base) => {
                let base = normalize_base_url(base)?;
                (
                    join_root(&base, "helix/")?,
                    join_root(&base, "v5/")?,
                    join_root(&base, "oauth2/")?,
                )
            }
            None => (
                DEFAULT_HELIX_URL.to_string(),
                DEFAULT_V5_URL.to_string(),
                DEFAULT_OAUTH_URL.to_string(),
            ),
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| io::Error::other(format!("Failed to create HTTP client: {e}")))?;

        info!("Created Twitch client for {helix_url}");

        Ok(Self {
            client,
            helix_url,
            v5_url,
            oauth_url,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            access_token: settings.access_token.clone(),
            log_dir: Some(settings.output_path.clone()),
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Check the current token. `Ok(None)` means the token was rejected.
    pub async fn validate_token(&self) -> Result<Option<u64>, ApiError> {
        let url = format!("{}validate", self.oauth_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("OAuth {}", self.access_token))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let validation: TokenValidation = self.read_json(response, "validate_token", &url).await?;
        info!("OAuth token expires in {}s", validation.expires_in);
        Ok(Some(validation.expires_in))
    }

    /// Request a fresh app token with the client-credentials grant.
    pub async fn request_app_token(&self) -> Result<String, ApiError> {
        let url = format!("{}token", self.oauth_url);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            ErrorContext::new("request_app_token")
                .with_error("auth_error", &format!("HTTP {status}"))
                .with_request_details(&url, Some(status.as_u16()), Some(&body))
                .log_error(self.log_dir.as_deref());
            return Err(ApiError::Auth(format!(
                "Token request returned {status}: {body}"
            )));
        }

        let token: AppTokenResponse = self.read_json(response, "request_app_token", &url).await?;
        Ok(token.access_token)
    }

    /// Make sure the client holds a valid token, requesting a new one if needed.
    /// Returns `true` when the token was replaced.
    pub async fn ensure_access_token(&mut self) -> Result<bool, ApiError> {
        if !self.access_token.is_empty() && self.validate_token().await?.is_some() {
            return Ok(false);
        }

        if self.access_token.is_empty() {
            info!("No OAuth token configured, requesting a new one");
        } else {
            warn!("OAuth token is no longer valid, requesting a new one");
        }

        self.access_token = self.request_app_token().await?;
        Ok(true)
    }

    fn helix_request(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.access_token)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
        url: &str,
    ) -> Result<T, ApiError> {
        let response = request.send().await?;
        self.read_json(response, operation, url).await
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        operation: &str,
        url: &str,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = if status == reqwest::StatusCode::UNAUTHORIZED {
                ApiError::Auth(format!("HTTP {status}: {body}"))
            } else {
                ApiError::Status {
                    status: status.as_u16(),
                    body: body.clone(),
                }
            };
            ErrorContext::new(operation)
                .with_api_error(&err)
                .with_request_details(url, Some(status.as_u16()), Some(&body))
                .log_error(self.log_dir.as_deref());
            return Err(err);
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            let err = ApiError::Decode(e.to_string());
            ErrorContext::new(operation)
                .with_api_error(&err)
                .with_request_details(url, Some(status.as_u16()), Some(&text))
                .log_error(self.log_dir.as_deref());
            err
        })
    }
}

#[async_trait]
impl ChatApi for TwitchClient {
    async fn get_users_by_login(&self, logins: &[String]) -> Result<Vec<UserInfo>, ApiError> {
        let url = format!("{}users", self.helix_url);
        let query: Vec<(&str, &str)> = logins.iter().map(|l| ("login", l.as_str())).collect();

        info!("Resolving {} channel(s)", logins.len());
        let response: HelixUsersResponse = self
            .send_json(self.helix_request(&url).query(&query), "get_users", &url)
            .await?;

        Ok(response
            .data
            .into_iter()
            .map(|u| UserInfo {
                user_id: u.id,
                login: u.login,
                display_name: u.display_name,
            })
            .collect())
    }

    async fn get_videos_by_ids(
        &self,
        video_ids: &[String],
    ) -> Result<Vec<VideoMetadata>, ApiError> {
        let url = format!("{}videos", self.helix_url);
        let query: Vec<(&str, &str)> = video_ids.iter().map(|id| ("id", id.as_str())).collect();

        let response: HelixVideosResponse = self
            .send_json(
                self.helix_request(&url).query(&query),
                "get_videos_by_ids",
                &url,
            )
            .await?;

        Ok(response.data.into_iter().map(VideoMetadata::from).collect())
    }

    async fn get_videos_by_user(
        &self,
        user_id: &str,
        first: usize,
    ) -> Result<Vec<VideoMetadata>, ApiError> {
        let url = format!("{}videos", self.helix_url);
        let mut videos = Vec::new();
        let mut cursor: Option<String> = None;

        while videos.len() < first {
            let page_size = (first - videos.len()).min(MAX_PAGE_SIZE).to_string();
            let mut request = self
                .helix_request(&url)
                .query(&[("user_id", user_id), ("first", page_size.as_str())]);
            if let Some(after) = &cursor {
                request = request.query(&[("after", after.as_str())]);
            }

            let response: HelixVideosResponse =
                self.send_json(request, "get_videos_by_user", &url).await?;

            let received = response.data.len();
            videos.extend(response.data.into_iter().map(VideoMetadata::from));

            cursor = response.pagination.cursor.filter(|c| !c.is_empty());
            if cursor.is_none() || received == 0 {
                break;
            }
        }

        videos.truncate(first);
        Ok(videos)
    }

    async fn get_comment_page(
        &self,
        video_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page, ApiError> {
        let url = format!("{}videos/{video_id}/comments", self.v5_url);
        let mut request = self
            .client
            .get(&url)
            .header("Client-ID", &self.client_id)
            .header("Accept", V5_MEDIA_TYPE);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response: V5CommentsResponse =
            self.send_json(request, "get_comment_page", &url).await?;

        Ok(Page {
            comments: response.comments.into_iter().map(Comment::from).collect(),
            next_cursor: response.next.filter(|c| !c.is_empty()),
        })
    }
}

fn normalize_base_url(base: &str) -> io::Result<Url> {
    let with_slash = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    Url::parse(&with_slash).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid ApiBaseUrl '{base}': {e}"),
        )
    })
}

fn join_root(base: &Url, segment: &str) -> io::Result<String> {
    base.join(segment).map(|u| u.to_string()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid ApiBaseUrl '{base}': {e}"),
        )
    })
}
