use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use eyre::{Result, WrapErr, bail};
use log::debug;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::watch_url;

/// Container of a resolved stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    Mp4,
    M4a,
    WebM,
    ThreeGp,
    Other(String),
}

impl Container {
    pub fn from_ext(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp4" => Container::Mp4,
            "m4a" => Container::M4a,
            "webm" => Container::WebM,
            "3gp" => Container::ThreeGp,
            other => Container::Other(other.to_string()),
        }
    }

    pub fn extension(&self) -> &str {
        match self {
            Container::Mp4 => "mp4",
            Container::M4a => "m4a",
            Container::WebM => "webm",
            Container::ThreeGp => "3gp",
            Container::Other(ext) => ext.as_str(),
        }
    }
}

/// A downloadable stream variant of one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCandidate {
    pub format_id: String,
    pub container: Container,
    /// kbps, 0 when the stream has no audio
    pub audio_bitrate: u32,
    /// vertical resolution, 0 for audio-only streams
    pub resolution: u32,
    pub audio_extractable: bool,
    pub requires_decryption: bool,
    pub url: Option<String>,
}

/// Which candidate to download and what to do with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Audio(MediaCandidate),
    Video(MediaCandidate),
    /// No audio-only stream; download the video and transcode to wav
    VideoThenTranscode(MediaCandidate),
}

impl Selection {
    pub fn candidate(&self) -> &MediaCandidate {
        match self {
            Selection::Audio(c) | Selection::Video(c) | Selection::VideoThenTranscode(c) => c,
        }
    }
}

/// Pick the stream to download.
///
/// With `extract_audio`, the audio-only stream with the highest bitrate wins. Otherwise (or when
/// there is no audio-only stream) the best mp4 with audio is chosen by resolution, then audio
/// bitrate. Format id breaks the remaining ties.
pub fn select_candidate(candidates: &[MediaCandidate], extract_audio: bool) -> Option<Selection> {
    if extract_audio {
        let best_audio = candidates
            .iter()
            .filter(|c| c.audio_extractable)
            .max_by(|a, b| a.audio_bitrate.cmp(&b.audio_bitrate).then_with(|| tie_break(a, b)));
        if let Some(c) = best_audio {
            return Some(Selection::Audio(c.clone()));
        }
    }

    let best_video = candidates
        .iter()
        .filter(|c| c.container == Container::Mp4 && c.audio_bitrate > 0)
        .max_by(|a, b| {
            a.resolution
                .cmp(&b.resolution)
                .then_with(|| a.audio_bitrate.cmp(&b.audio_bitrate))
                .then_with(|| tie_break(a, b))
        })?
        .clone();

    if extract_audio {
        Some(Selection::VideoThenTranscode(best_video))
    } else {
        Some(Selection::Video(best_video))
    }
}

// Lower format id wins so the choice does not depend on input order
fn tie_break(a: &MediaCandidate, b: &MediaCandidate) -> Ordering {
    b.format_id.cmp(&a.format_id)
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    ext: String,
    url: Option<String>,
    protocol: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
    height: Option<u32>,
}

impl YtDlpFormat {
    fn is_single_file(&self) -> bool {
        match self.protocol.as_deref() {
            None => true,
            Some(p) => p == "http" || p == "https",
        }
    }

    fn into_candidate(self) -> MediaCandidate {
        let has_video = codec_present(self.vcodec.as_deref());
        let has_audio = codec_present(self.acodec.as_deref());
        let audio_bitrate = if has_audio {
            self.abr.map(|abr| abr.round().max(0.0) as u32).unwrap_or(0)
        } else {
            0
        };

        MediaCandidate {
            container: Container::from_ext(&self.ext),
            format_id: self.format_id,
            audio_bitrate,
            resolution: self.height.unwrap_or(0),
            audio_extractable: has_audio && !has_video,
            requires_decryption: self.url.as_deref().is_none_or(|u| u.is_empty()),
            url: self.url.filter(|u| !u.is_empty()),
        }
    }
}

// yt-dlp reports "none" for absent streams; a missing field means unknown, treated as absent
fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if c != "none")
}

/// Map yt-dlp `--dump-json` output to candidates, dropping manifest-based streams
pub fn parse_candidates(json: &str) -> Result<Vec<MediaCandidate>> {
    let info: YtDlpInfo = serde_json::from_str(json).wrap_err("unexpected yt-dlp JSON output")?;
    Ok(info
        .formats
        .into_iter()
        .filter(YtDlpFormat::is_single_file)
        .map(YtDlpFormat::into_candidate)
        .collect())
}

/// Resolve every stream variant of a video through yt-dlp
pub fn resolve_candidates(yt_dlp: &str, video_id: &str) -> Result<Vec<MediaCandidate>> {
    let url = watch_url(video_id);
    debug!("Resolving formats via {yt_dlp}: {url}");

    let output = run_tool(yt_dlp, &["--dump-json", "--no-playlist", "--no-warnings", &url])?;
    let candidates = parse_candidates(&output)?;
    debug!("{video_id}: {} candidates", candidates.len());
    Ok(candidates)
}

/// Ask yt-dlp to decipher the download URL of a protected format
pub fn decrypt_download_url(yt_dlp: &str, video_id: &str, candidate: &mut MediaCandidate) -> Result<()> {
    let url = watch_url(video_id);
    debug!("Deciphering format {} of {video_id}", candidate.format_id);

    let output = run_tool(yt_dlp, &["-f", &candidate.format_id, "--get-url", "--no-playlist", &url])?;
    let direct = output.lines().next().unwrap_or("").trim().to_string();
    if direct.is_empty() {
        bail!("yt-dlp returned no URL for format {}", candidate.format_id);
    }

    candidate.url = Some(direct);
    candidate.requires_decryption = false;
    Ok(())
}

fn run_tool(program: &str, args: &[&str]) -> Result<String> {
    let output = match Command::new(program).args(args).stdin(Stdio::null()).output() {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("{program} not found. Install it or set its path in {}", crate::config::config_path().display());
        }
        Err(e) => bail!("failed to run {program}: {e}"),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{program} exited with status {}: {}", output.status, stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Stream a candidate's URL into `path`
pub async fn download(client: &reqwest::Client, candidate: &MediaCandidate, path: &Path) -> Result<u64> {
    let Some(url) = candidate.url.as_deref() else {
        bail!("format {} has no download URL", candidate.format_id);
    };
    debug!("Downloading format {} to {}", candidate.format_id, path.display());

    let mut resp = client.get(url).send().await?.error_for_status()?;
    let mut file = tokio::fs::File::create(path)
        .await
        .wrap_err_with(|| format!("failed to create {}", path.display()))?;

    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    debug!("Wrote {written} bytes to {}", path.display());
    Ok(written)
}

/// Convert a downloaded video into a standalone wav next to it
pub fn transcode_to_wav(ffmpeg: &str, input: &Path) -> Result<PathBuf> {
    let output = input.with_extension("wav");
    debug!("Transcoding {} -> {}", input.display(), output.display());

    let result = Command::new(ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg(&output)
        .stdin(Stdio::null())
        .output();

    match result {
        Ok(o) if o.status.success() => {}
        Ok(o) => {
            let stderr = String::from_utf8_lossy(&o.stderr);
            let tail = stderr.lines().last().unwrap_or("").trim();
            bail!("{ffmpeg} exited with status {} while transcoding {}: {tail}", o.status, input.display());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("{ffmpeg} not found. Set ffmpeg_path in the setting file or install ffmpeg");
        }
        Err(e) => bail!("failed to run {ffmpeg}: {e}"),
    }

    if !output.exists() {
        bail!("{ffmpeg} did not produce expected output file: {}", output.display());
    }

    Ok(output)
}
