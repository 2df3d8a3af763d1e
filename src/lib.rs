pub mod cli;
pub mod config;
pub mod downloader;
pub mod logging;
pub mod ytdlp;

use cli::CliCommand;

/// Binary entry: logging, runtime, then the parsed command
pub fn run() -> anyhow::Result<()> {
    if let Err(e) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!("file logging unavailable, using stderr: {:#}", e);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(CliCommand::run_from_args())
}
