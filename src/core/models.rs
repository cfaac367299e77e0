use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Maximum number of video ids the upstream accepts in a single lookup.
pub const MAX_VIDEO_IDS: usize = 100;

/// Videos fetched per channel when `--first` is not given.
pub const DEFAULT_VIDEOS_PER_CHANNEL: usize = 20;

/// Video length as reported upstream (`3h2m1s`), kept alongside its value in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDuration {
    pub seconds: u64,
    pub display: String,
}

impl VideoDuration {
    pub fn parse(raw: &str) -> io::Result<Self> {
        let invalid = || {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid video duration: '{raw}'"),
            )
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let mut seconds = 0u64;
        let mut digits = String::new();
        let mut last_unit = 0u8;

        for c in trimmed.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }

            let (rank, multiplier) = match c {
                'h' => (1, 3600),
                'm' => (2, 60),
                's' => (3, 1),
                _ => return Err(invalid()),
            };

            // Units must appear at most once and in h, m, s order.
            if digits.is_empty() || rank <= last_unit {
                return Err(invalid());
            }
            let value: u64 = digits.parse().map_err(|_| invalid())?;
            seconds = value
                .checked_mul(multiplier)
                .and_then(|part| seconds.checked_add(part))
                .ok_or_else(invalid)?;
            digits.clear();
            last_unit = rank;
        }

        if !digits.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            seconds,
            display: trimmed.to_string(),
        })
    }

    #[cfg(test)]
    pub fn from_seconds(seconds: u64) -> Self {
        let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
        let display = if h > 0 {
            format!("{h}h{m}m{s}s")
        } else if m > 0 {
            format!("{m}m{s}s")
        } else {
            format!("{s}s")
        };
        Self { seconds, display }
    }
}

impl fmt::Display for VideoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Video metadata as returned by the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub video_id: String,
    pub user_id: String,
    pub user_name: String,
    pub duration: String,
    pub created_at: DateTime<Utc>,
}

/// A resolved channel.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub user_id: String,
    pub login: String,
    pub display_name: String,
}

/// One video scheduled for comment retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub video_id: String,
    pub channel: String,
    pub duration: VideoDuration,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn from_metadata(channel: &str, video: &VideoMetadata) -> io::Result<Self> {
        Ok(Self {
            video_id: video.video_id.clone(),
            channel: channel.to_string(),
            duration: VideoDuration::parse(&video.duration)?,
            created_at: video.created_at,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}", self.channel, self.video_id)
    }

    /// `<root>/<channel>/<channel>_<video id>.txt`
    pub fn output_path(&self, root: &Path) -> PathBuf {
        root.join(&self.channel)
            .join(format!("{}.txt", self.file_name()))
    }
}

/// A single chat message replayed against the video timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub offset_seconds: f64,
    pub commenter_name: String,
    pub commenter_display_name: String,
    pub message_body: String,
}

/// One page of comments. A missing cursor marks the last page of a video.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub comments: Vec<Comment>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }

    /// Offset of the final comment, truncated to whole seconds.
    pub fn last_offset(&self) -> Option<u64> {
        self.comments
            .last()
            .map(|c| c.offset_seconds.max(0.0) as u64)
    }
}

pub fn parse_video_ids(raw: &str) -> io::Result<Vec<String>> {
    let ids: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if ids.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "No video ids given",
        ));
    }

    if ids.len() > MAX_VIDEO_IDS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("No more than {MAX_VIDEO_IDS} video ids may be given, got {}", ids.len()),
        ));
    }

    if let Some(bad) = ids.iter().find(|id| !id.chars().all(|c| c.is_ascii_digit())) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Video id must be numeric: '{bad}'"),
        ));
    }

    Ok(ids)
}

pub fn parse_channel_names(raw: &str) -> io::Result<Vec<String>> {
    let names: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if names.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "No channel names given",
        ));
    }

    for name in &names {
        validate_channel_name(name)?;
    }

    Ok(names)
}

pub fn validate_channel_name(name: &str) -> io::Result<()> {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '&', '='];
    if name.chars().any(|c| invalid_chars.contains(&c) || c.is_whitespace()) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Channel name contains invalid characters: '{name}'"),
        ));
    }

    if name.len() > 25 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Channel name too long (max 25 characters): '{name}'"),
        ));
    }

    Ok(())
}
