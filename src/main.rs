use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::Command;

use eyre::{Result, bail};
use log::{debug, info};

use ytcorpus::config::{Config, DEFAULT_YT_DLP, DownloadSetting, ListFetchType};
use ytcorpus::pipeline::{ItemOutcome, RunContext, RunSummary, prepare_output_dir, process_item};
use ytcorpus::search::{Credentials, search_videos};

mod cli;

use cli::Cli;

fn tool_version(name: &str) -> Option<String> {
    Command::new(name)
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .trim()
                .lines()
                .next()
                .unwrap_or("")
                .to_string()
        })
}

fn tool_line(name: &str, purpose: &str) -> String {
    match tool_version(name) {
        Some(v) => format!("  \x1b[32m✅\x1b[0m {name:<10} {v}"),
        None => format!("  \x1b[31m❌\x1b[0m {name:<10} (not found, needed for {purpose})"),
    }
}

fn build_after_help() -> String {
    let ffmpeg = tool_line("ffmpeg", "extract_audio without audio-only streams");
    let yt_dlp = tool_line(DEFAULT_YT_DLP, "stream resolution");

    format!(
        "\nREQUIRED TOOLS:\n{yt_dlp}\n{ffmpeg}\n\nCREDENTIALS:\n  YOUTUBE_ACCESS_TOKEN or YOUTUBE_API_KEY, or api_key in {}\n\nLogs are written to: {}",
        ytcorpus::config::config_path().display(),
        ytcorpus::logging::log_file().display()
    )
}

/// Settings path from the command line, or asked for when running interactively
fn settings_path(arg: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = arg {
        return Ok(path);
    }

    let stdin = io::stdin();
    if !stdin.is_terminal() {
        bail!("no setting file provided\n\nUsage: ytcorpus <SETTINGS.json>");
    }

    print!("setting json path: ");
    io::stdout().flush()?;
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;

    let line = line.trim();
    if line.is_empty() {
        bail!("no setting file provided\n\nUsage: ytcorpus <SETTINGS.json>");
    }
    Ok(PathBuf::from(line))
}

#[tokio::main]
async fn main() -> Result<()> {
    ytcorpus::logging::setup_logging()?;

    let after_help = build_after_help();
    let cmd = <Cli as clap::CommandFactory>::command().after_help(after_help);
    let matches = cmd.get_matches();
    let cli = <Cli as clap::FromArgMatches>::from_arg_matches(&matches)?;

    // Tool config is optional; a broken one only loses its defaults
    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("Ignoring tool config: {e:#}");
        Config::default()
    });

    let credentials = Credentials::resolve(&config)?;

    let path = settings_path(cli.settings)?;
    let setting = DownloadSetting::load(&path)?;
    let output_dir = setting.output_dir();

    if cli.verbose {
        eprintln!("Setting: {}", path.display());
        let config_path = ytcorpus::config::config_path();
        if config_path.exists() {
            eprintln!("Config: {}", config_path.display());
        }
        eprintln!("Output: {}", output_dir.display());
    }
    debug!("{setting:?}");

    let client = reqwest::Client::new();

    let video_ids = match setting.list_fetch_type {
        ListFetchType::Search => {
            let ids = search_videos(&client, &credentials, &setting.query, setting.channel()).await?;
            println!("search result count: {}", ids.len());
            ids
        }
    };

    prepare_output_dir(&output_dir)?;

    let ctx = RunContext {
        client: &client,
        yt_dlp: config.yt_dlp(),
        ffmpeg: setting.ffmpeg(&config),
        output_dir: &output_dir,
        extract_audio: setting.extract_audio,
    };

    let mut summary = RunSummary::default();
    for video_id in &video_ids {
        info!("Processing {video_id}");
        let outcome = process_item(&ctx, video_id).await;
        match &outcome {
            ItemOutcome::Completed(report) => {
                if report.caption_path.is_none() {
                    println!("{} caption not found", report.video_id);
                }
                if cli.verbose {
                    eprintln!("{}: {}", report.video_id, report.media.media_path.display());
                    if let Some(ref audio) = report.media.audio_path {
                        eprintln!("{}: audio {}", report.video_id, audio.display());
                    }
                }
            }
            ItemOutcome::Skipped { video_id, reason } => eprintln!("{video_id} skipped: {reason}"),
            ItemOutcome::Fatal(_) => {}
        }
        summary.record(outcome)?;
    }

    info!("Run finished: {summary}");
    if cli.verbose {
        eprintln!("{summary}");
    }

    Ok(())
}
