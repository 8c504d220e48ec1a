mod cli;
mod effect;
mod engine;
mod error;
mod metrics;
mod model;
mod orchestrator;
mod storage;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = args.json || args.text;
    cli::init_tracing(&args)?;

    cli::run(args).await?;
    // Exit explicitly in non-TUI modes so lingering blocking tasks do not hold the runtime.
    if is_non_tui {
        std::process::exit(0);
    }
    Ok(())
}
