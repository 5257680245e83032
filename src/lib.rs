pub mod captions;
pub mod config;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod search;
pub mod split;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single timed caption line, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionEntry {
    pub start_ms: u64,
    pub duration_ms: u64,
    pub text: String,
}

impl CaptionEntry {
    pub fn end_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.duration_ms)
    }
}

/// One emitted audio segment and the caption text it was cut for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitInformation {
    pub file: String,
    pub text: String,
}

static INVALID_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());

/// Watch page URL for a video ID
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Replace characters that are not allowed in file names with `_`
pub fn sanitize_file_name(name: &str) -> String {
    INVALID_FILE_CHARS.replace_all(name.trim(), "_").into_owned()
}
