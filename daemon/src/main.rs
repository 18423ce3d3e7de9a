//! Logly daemon entry point.

use clap::Parser;

use logly_daemon::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    cli::run(args).await
}
