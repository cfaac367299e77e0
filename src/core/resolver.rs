use crate::core::api::ChatApi;
use crate::core::ledger::CompletionLedger;
use crate::core::models::{MAX_VIDEO_IDS, VideoMetadata, WorkItem};
use futures::future::try_join_all;
use log::{debug, info, warn};
use std::io;

/// What the operator asked to download
#[derive(Debug, Clone, PartialEq)]
pub enum WorkRequest {
    Videos(Vec<String>),
    Channels { names: Vec<String>, first: usize },
}

/// Turns a request into ledger-filtered work items, longest video first
pub struct WorkResolver<'a> {
    api: &'a dyn ChatApi,
    ledger: &'a CompletionLedger,
}

impl<'a> WorkResolver<'a> {
    pub fn new(api: &'a dyn ChatApi, ledger: &'a CompletionLedger) -> Self {
        Self { api, ledger }
    }

    pub async fn resolve(&self, request: &WorkRequest) -> io::Result<Vec<WorkItem>> {
        let mut items = match request {
            WorkRequest::Videos(ids) => self.resolve_videos(ids).await?,
            WorkRequest::Channels { names, first } => self.resolve_channels(names, *first).await?,
        };

        // Longest first so the pool does not drain on one long tail job.
        items.sort_by(|a, b| b.duration.seconds.cmp(&a.duration.seconds));
        Ok(items)
    }

    async fn resolve_videos(&self, ids: &[String]) -> io::Result<Vec<WorkItem>> {
        let mut videos = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_VIDEO_IDS) {
            videos.extend(self.api.get_videos_by_ids(chunk).await?);
        }

        if videos.len() < ids.len() {
            warn!(
                "{} of the specified video ids were not found",
                ids.len() - videos.len()
            );
        }

        Ok(videos
            .iter()
            .filter_map(|video| self.to_work_item(&video.user_name, video))
            .collect())
    }

    async fn resolve_channels(&self, names: &[String], first: usize) -> io::Result<Vec<WorkItem>> {
        let mut users = Vec::with_capacity(names.len());
        for chunk in names.chunks(MAX_VIDEO_IDS) {
            users.extend(self.api.get_users_by_login(chunk).await?);
        }

        for name in names {
            if !users.iter().any(|u| u.login.eq_ignore_ascii_case(name)) {
                warn!("Channel '{name}' was not found, skipping");
            }
        }

        let per_channel = try_join_all(users.iter().map(|user| async move {
            let videos = self.api.get_videos_by_user(&user.user_id, first).await?;
            info!(
                "Found {} video(s) for channel {}",
                videos.len(),
                user.display_name
            );
            Ok::<_, io::Error>((user, videos))
        }))
        .await?;

        Ok(per_channel
            .iter()
            .flat_map(|(user, videos)| {
                videos
                    .iter()
                    .filter_map(move |video| self.to_work_item(&user.display_name, video))
            })
            .collect())
    }

    fn to_work_item(&self, channel: &str, video: &VideoMetadata) -> Option<WorkItem> {
        if self.ledger.contains(channel, &video.video_id) {
            info!(
                "Skipping {channel}_{}: already downloaded",
                video.video_id
            );
            return None;
        }

        match WorkItem::from_metadata(channel, video) {
            Ok(item) => {
                debug!(
                    "Queued video {} of user {} ({}), {} long",
                    item.video_id, channel, video.user_id, item.duration
                );
                Some(item)
            }
            Err(e) => {
                warn!("Skipping video {}: {e}", video.video_id);
                None
            }
        }
    }
}
