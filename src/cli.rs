use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ytcorpus",
    about = "Download YouTube search results with their captions",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Download setting JSON file (prompted for if omitted)
    pub settings: Option<PathBuf>,

    /// Show config, search and summary details
    #[arg(short, long)]
    pub verbose: bool,
}
