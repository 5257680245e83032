use std::path::PathBuf;

use eyre::Result;
use log::info;

/// Send `log` output to an append-only file under the local data dir; level comes from RUST_LOG
pub fn setup_logging() -> Result<()> {
    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = log_file();

    let target = Box::new(std::fs::OpenOptions::new().create(true).append(true).open(&log_file)?);

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized: {}", log_file.display());
    Ok(())
}

pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytcorpus")
        .join("logs")
}

pub fn log_file() -> PathBuf {
    log_dir().join("ytcorpus.log")
}
