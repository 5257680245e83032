use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use log::debug;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_YT_DLP: &str = "yt-dlp";

/// Tool-wide defaults from ~/.config/ytcorpus/config.toml
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub yt_dlp_path: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    /// Load config from ~/.config/ytcorpus/config.toml if it exists
    pub fn load() -> Result<Self> {
        let path = config_path();
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            debug!("No config file found at {}", path.display());
            Ok(Config::default())
        }
    }

    pub fn yt_dlp(&self) -> &str {
        self.yt_dlp_path.as_deref().unwrap_or(DEFAULT_YT_DLP)
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("ytcorpus")
        .join("config.toml")
}

/// How the list of items to download is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFetchType {
    Search,
}

/// Per-run download settings, read from the JSON file given on the command line
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadSetting {
    pub list_fetch_type: ListFetchType,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub output_directory: Option<String>,
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    #[serde(default)]
    pub extract_audio: bool,
}

impl DownloadSetting {
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading download setting from {}", path.display());
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read setting file {}", path.display()))?;
        Self::from_json(&content).wrap_err_with(|| format!("invalid setting file {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Output directory, falling back to the current directory when unset or blank
    pub fn output_dir(&self) -> PathBuf {
        match self.output_directory.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from("."),
        }
    }

    /// Channel scope, ignoring blank values
    pub fn channel(&self) -> Option<&str> {
        self.channel_id.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// Transcoder binary: setting first, then tool config, then `ffmpeg` on PATH
    pub fn ffmpeg<'a>(&'a self, config: &'a Config) -> &'a str {
        self.ffmpeg_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or(config.ffmpeg_path.as_deref())
            .unwrap_or(DEFAULT_FFMPEG)
    }
}
