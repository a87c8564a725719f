use std::path::Path;

use anyhow::Result;
use clap::Parser;
use zip_sender::logging::{self, LOG_FILE};
use zip_sender::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    logging::init(Path::new(LOG_FILE))?;

    if let Err(e) = run(cli).await {
        tracing::error!(error = %format!("{e:#}"), "Run failed");
        eprintln!("[ERROR] {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
