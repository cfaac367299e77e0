use crate::core::template::{CommentTemplate, DEFAULT_COMMENT_FORMAT};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";

/// On-disk shape of `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(rename = "ClientID")]
    pub client_id: String,
    #[serde(rename = "ClientSecret")]
    pub client_secret: String,
    #[serde(rename = "OAuthToken", default)]
    pub oauth_token: String,
    #[serde(rename = "MaxConcurrentDownloads", default = "default_max_concurrent")]
    pub max_concurrent_downloads: i64,
    #[serde(rename = "OutputPath", default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(rename = "CommentFormat", default = "default_comment_format")]
    pub comment_format: String,
    /// Overrides the upstream hosts, mainly for pointing at a local mock.
    #[serde(rename = "ApiBaseUrl", default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

fn default_max_concurrent() -> i64 {
    1
}
fn default_output_path() -> PathBuf {
    PathBuf::from("logs")
}
fn default_comment_format() -> String {
    DEFAULT_COMMENT_FORMAT.to_string()
}

/// Validated run configuration, built once and passed by reference to every component
#[derive(Debug, Clone)]
pub struct Settings {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub max_concurrent_downloads: usize,
    pub output_path: PathBuf,
    pub comment_format: String,
    pub template: CommentTemplate,
    pub api_base_url: Option<String>,
    source_path: PathBuf,
}

impl Settings {
    pub fn from_file(file: SettingsFile, source_path: &Path) -> io::Result<Self> {
        if file.client_id.trim().is_empty() || file.client_secret.trim().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "ClientID or ClientSecret were empty in {}",
                    source_path.display()
                ),
            ));
        }

        let max_concurrent_downloads = if file.max_concurrent_downloads <= 0 {
            warn!(
                "MaxConcurrentDownloads was {} in {}, using 1",
                file.max_concurrent_downloads,
                source_path.display()
            );
            1
        } else {
            file.max_concurrent_downloads as usize
        };

        let template = CommentTemplate::compile(&file.comment_format)?;

        Ok(Self {
            client_id: file.client_id.trim().to_string(),
            client_secret: file.client_secret.trim().to_string(),
            access_token: file.oauth_token.trim().to_string(),
            max_concurrent_downloads,
            output_path: file.output_path,
            comment_format: file.comment_format,
            template,
            api_base_url: file.api_base_url,
            source_path: source_path.to_path_buf(),
        })
    }

    pub fn to_file(&self) -> SettingsFile {
        SettingsFile {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            oauth_token: self.access_token.clone(),
            max_concurrent_downloads: self.max_concurrent_downloads as i64,
            output_path: self.output_path.clone(),
            comment_format: self.comment_format.clone(),
            api_base_url: self.api_base_url.clone(),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.output_path.join("LogsDB.json")
    }
}

/// Service for loading and persisting settings
pub struct SettingsService;

impl SettingsService {
    pub fn load(path: &Path) -> io::Result<Settings> {
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Settings file not found: {}", path.display()),
            ));
        }

        let content = std::fs::read_to_string(path)?;
        let file: SettingsFile = serde_json::from_str(&content).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid settings format in {}: {e}", path.display()),
            )
        })?;

        let settings = Settings::from_file(file, path)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(settings: &Settings) -> io::Result<()> {
        let content = serde_json::to_string_pretty(&settings.to_file()).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to serialize settings: {e}"),
            )
        })?;

        std::fs::write(settings.source_path(), content)?;
        info!("Saved settings to {}", settings.source_path().display());
        Ok(())
    }

    /// Create the output directory if it does not exist yet.
    pub fn prepare_output(settings: &Settings) -> io::Result<()> {
        std::fs::create_dir_all(&settings.output_path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!(
                    "Failed to create output directory {}: {e}",
                    settings.output_path.display()
                ),
            )
        })
    }
}
