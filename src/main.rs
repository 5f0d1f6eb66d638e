use anyhow::Result;
use clap::Parser;

use fwsync::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
