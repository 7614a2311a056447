mod blobs;
mod cli;
mod engine;
mod input;
mod model;
mod orchestrator;
mod session;
mod settings;
mod storage;
mod store;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr, except in the TUI where they would corrupt the screen.
fn init_tracing(args: &cli::Cli) {
    let default_level = match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("genstudio={default_level}")));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    let interactive = cfg!(feature = "tui") && args.command.is_none() && !args.json;
    if interactive {
        let dir = cli::data_dir(args);
        let file = std::fs::create_dir_all(&dir)
            .and_then(|_| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join("genstudio.log"))
            });
        // No log file, no logs: stderr belongs to the terminal UI.
        if let Ok(f) = file {
            let _ = subscriber
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(f))
                .try_init();
        }
    } else {
        let _ = subscriber.with_writer(std::io::stderr).try_init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(&args);
    let is_non_tui = args.command.is_some() || args.json;

    cli::run(args).await?;
    // Explicitly exit with code 0 on success, especially for non-TUI modes
    if is_non_tui {
        std::process::exit(0);
    }
    Ok(())
}
