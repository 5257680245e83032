use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use clap::Parser;
use eyre::{Result, bail};
use log::info;

use ytcorpus::split::{DEFAULT_RESULT_FILE, load_results, split_directory};

#[derive(Parser)]
#[command(
    name = "ytcorpus-split",
    about = "Split downloaded wav files into one file per caption line",
    version = env!("GIT_DESCRIBE"),
)]
struct Cli {
    /// Directory holding <id>.wav files and their <id>.xml captions (prompted for if omitted)
    dir: Option<PathBuf>,

    /// Where segment files and the result file are written
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Result file, relative to the output directory unless absolute
    #[arg(short, long, default_value = DEFAULT_RESULT_FILE)]
    result: PathBuf,
}

fn input_dir(arg: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = arg {
        return Ok(dir);
    }

    let stdin = io::stdin();
    if !stdin.is_terminal() {
        bail!("no directory provided\n\nUsage: ytcorpus-split <DIR>");
    }

    println!("Type *.wav path.");
    print!("> ");
    io::stdout().flush()?;
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;

    let line = line.trim();
    if line.is_empty() {
        bail!("no directory provided\n\nUsage: ytcorpus-split <DIR>");
    }
    Ok(PathBuf::from(line))
}

fn main() -> Result<()> {
    ytcorpus::logging::setup_logging()?;

    let cli = Cli::parse();
    let dir = input_dir(cli.dir)?;
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let result_path = cli.output_dir.join(&cli.result);
    let previous = load_results(&result_path)?;
    let previous_count = previous.len();

    let results = split_directory(&dir, &cli.output_dir, &result_path, previous)?;

    let added = results.len() - previous_count;
    info!("Added {added} segments, {} total in {}", results.len(), result_path.display());
    println!("{added} segments written, {} entries in {}", results.len(), result_path.display());

    Ok(())
}
