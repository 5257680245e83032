use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr, eyre};
use log::{debug, info, warn};

use crate::captions::download_captions;
use crate::media::{Selection, decrypt_download_url, download, resolve_candidates, select_candidate, transcode_to_wav};
use crate::sanitize_file_name;

/// Everything needed to process one item
pub struct RunContext<'a> {
    pub client: &'a reqwest::Client,
    pub yt_dlp: &'a str,
    pub ffmpeg: &'a str,
    pub output_dir: &'a Path,
    pub extract_audio: bool,
}

/// Files produced for one downloaded item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub media_path: PathBuf,
    /// Audio-only file, when audio was requested
    pub audio_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub video_id: String,
    pub media: DownloadedMedia,
    pub caption_path: Option<PathBuf>,
}

/// How processing one item ended
#[derive(Debug)]
pub enum ItemOutcome {
    Completed(ItemReport),
    /// The item could not be downloaded; the run goes on
    Skipped { video_id: String, reason: String },
    /// The run cannot go on
    Fatal(eyre::Report),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub captions_missing: usize,
}

impl RunSummary {
    /// Count an outcome; a fatal outcome ends the run with its error
    pub fn record(&mut self, outcome: ItemOutcome) -> Result<()> {
        match outcome {
            ItemOutcome::Completed(report) => {
                self.completed += 1;
                if report.caption_path.is_none() {
                    self.captions_missing += 1;
                }
                Ok(())
            }
            ItemOutcome::Skipped { .. } => {
                self.skipped += 1;
                Ok(())
            }
            ItemOutcome::Fatal(e) => Err(e),
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} downloaded, {} skipped, {} without captions",
            self.completed, self.skipped, self.captions_missing
        )
    }
}

/// Create the output directory if needed
pub fn prepare_output_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        info!("Creating output directory {}", dir.display());
        std::fs::create_dir_all(dir).wrap_err_with(|| format!("failed to create output directory {}", dir.display()))?;
    }
    Ok(())
}

/// Download an item, then fetch its captions
pub async fn process_item(ctx: &RunContext<'_>, video_id: &str) -> ItemOutcome {
    let media = match download_item(ctx, video_id).await {
        Ok(media) => media,
        Err(e) => {
            warn!("{video_id}: download failed: {e:#}");
            return ItemOutcome::Skipped {
                video_id: video_id.to_string(),
                reason: format!("{e:#}"),
            };
        }
    };

    let file_stem = sanitize_file_name(video_id);
    match download_captions(ctx.client, video_id, ctx.output_dir, &file_stem).await {
        Ok(caption_path) => ItemOutcome::Completed(ItemReport {
            video_id: video_id.to_string(),
            media,
            caption_path,
        }),
        Err(e) => ItemOutcome::Fatal(e.wrap_err(format!("failed to fetch captions for {video_id}"))),
    }
}

/// Resolve, select, download, and if needed transcode one item
pub async fn download_item(ctx: &RunContext<'_>, video_id: &str) -> Result<DownloadedMedia> {
    let candidates = resolve_candidates(ctx.yt_dlp, video_id)?;
    let selection = select_candidate(&candidates, ctx.extract_audio)
        .ok_or_else(|| eyre!("no downloadable stream among {} candidates", candidates.len()))?;

    let mut candidate = selection.candidate().clone();
    debug!(
        "{video_id}: selected format {} ({}, {} kbps, {}p)",
        candidate.format_id,
        candidate.container.extension(),
        candidate.audio_bitrate,
        candidate.resolution
    );
    if candidate.requires_decryption {
        decrypt_download_url(ctx.yt_dlp, video_id, &mut candidate)?;
    }

    let file_stem = sanitize_file_name(video_id);
    let media_path = ctx.output_dir.join(format!("{file_stem}.{}", candidate.container.extension()));
    if let Err(e) = download(ctx.client, &candidate, &media_path).await {
        let _ = std::fs::remove_file(&media_path);
        return Err(e);
    }

    let audio_path = match selection {
        Selection::Audio(_) => Some(media_path.clone()),
        Selection::Video(_) => None,
        Selection::VideoThenTranscode(_) => Some(transcode_to_wav(ctx.ffmpeg, &media_path)?),
    };

    Ok(DownloadedMedia { media_path, audio_path })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(video_id: &str, caption: bool) -> ItemOutcome {
        ItemOutcome::Completed(ItemReport {
            video_id: video_id.to_string(),
            media: DownloadedMedia {
                media_path: PathBuf::from(format!("{video_id}.mp4")),
                audio_path: None,
            },
            caption_path: caption.then(|| PathBuf::from(format!("{video_id}.xml"))),
        })
    }

    #[test]
    fn test_prepare_creates_nested_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a").join("b");
        assert!(!dir.exists());
        prepare_output_dir(&dir).unwrap();
        assert!(dir.is_dir());
        // already present is fine
        prepare_output_dir(&dir).unwrap();
    }

    #[test]
    fn test_prepare_fails_on_file() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(prepare_output_dir(&file.join("sub")).is_err());
    }

    #[test]
    fn test_summary_counts_outcomes() {
        let mut summary = RunSummary::default();
        summary.record(completed("a", true)).unwrap();
        summary.record(completed("b", false)).unwrap();
        summary
            .record(ItemOutcome::Skipped {
                video_id: "c".to_string(),
                reason: "no stream".to_string(),
            })
            .unwrap();

        assert_eq!(
            summary,
            RunSummary {
                completed: 2,
                skipped: 1,
                captions_missing: 1
            }
        );
        assert_eq!(summary.to_string(), "2 downloaded, 1 skipped, 1 without captions");
    }

    #[test]
    fn test_summary_stops_on_fatal() {
        let mut summary = RunSummary::default();
        let err = summary.record(ItemOutcome::Fatal(eyre!("disk full"))).unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn test_unresolvable_item_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let ctx = RunContext {
            client: &client,
            yt_dlp: "ytcorpus-no-such-yt-dlp",
            ffmpeg: "ytcorpus-no-such-ffmpeg",
            output_dir: dir.path(),
            extract_audio: false,
        };

        match process_item(&ctx, "abc123def45").await {
            ItemOutcome::Skipped { video_id, reason } => {
                assert_eq!(video_id, "abc123def45");
                assert!(reason.contains("not found"));
            }
            other => panic!("expected skip, got {other:?}"),
        }
    }
}
