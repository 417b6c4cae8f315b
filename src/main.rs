//! nova-lifecycle - plugin lifecycle runtime
//!
//! Main binary entry point for the command-line interface.

use clap::Parser;
use nova_lifecycle::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli::run(cli).await
}
