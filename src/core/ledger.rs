//! Persistent record of videos whose chat has been fully downloaded.
//!
//! The ledger is loaded once per run, consulted while resolving work, grown
//! by fetchers as videos complete, and written back in one piece at the end
//! of the run. Entries are never removed or modified.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "Duration")]
    pub duration: String,
    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    #[serde(rename = "Videos", default)]
    pub videos: BTreeMap<String, LedgerEntry>,
}

/// On-disk layout. BTreeMaps keep the output sorted by channel, then video id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(rename = "Users", default)]
    pub users: BTreeMap<String, ChannelRecord>,
}

pub struct CompletionLedger {
    path: PathBuf,
    document: Mutex<LedgerDocument>,
}

impl CompletionLedger {
    /// Load the ledger at `path`, or start an empty one if the file does not exist.
    pub fn load(path: &Path) -> io::Result<Self> {
        let document = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let document: LedgerDocument = serde_json::from_str(&content).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid ledger format in {}: {e}", path.display()),
                )
            })?;
            info!(
                "Loaded ledger from {} ({} channel(s))",
                path.display(),
                document.users.len()
            );
            document
        } else {
            info!("No ledger at {}, starting a new one", path.display());
            LedgerDocument::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            document: Mutex::new(document),
        })
    }

    pub fn contains(&self, channel: &str, video_id: &str) -> bool {
        self.lock()
            .users
            .get(channel)
            .is_some_and(|record| record.videos.contains_key(video_id))
    }

    pub fn add(&self, channel: &str, video_id: &str, duration: &str, created_at: DateTime<Utc>) {
        let mut document = self.lock();
        document
            .users
            .entry(channel.to_string())
            .or_default()
            .videos
            .entry(video_id.to_string())
            .or_insert_with(|| LedgerEntry {
                duration: duration.to_string(),
                created_at,
            });
    }

    pub fn len(&self) -> usize {
        self.lock().users.values().map(|r| r.videos.len()).sum()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> LedgerDocument {
        self.lock().clone()
    }

    /// Overwrite the ledger file with the full current contents.
    pub fn save(&self) -> io::Result<()> {
        let content = {
            let document = self.lock();
            serde_json::to_string_pretty(&*document).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Failed to serialize ledger: {e}"),
                )
            })?
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        info!("Saved ledger to {}", self.path.display());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerDocument> {
        // A panic while holding the lock cannot leave a half-inserted entry.
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
