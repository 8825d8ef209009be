use anyhow::Result;
use clap::Parser;
use hookbot_cli::{init_tracing, run_hookbot, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);
    run_hookbot(cli).await
}
