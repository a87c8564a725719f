use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use zip_sender_core::delivery::{
    deliver_all, pending_output_folders, DeliveryContext, DeliveryPolicy,
};
use zip_sender_core::pipeline::{list_subdirectories, process_input, FolderOutcome};
use zip_sender_core::progress::Progress;

use crate::channel::select_channel;
use crate::load_config::{ConfigStore, DEFAULT_CONFIG_FILE};
use crate::session::{authenticate, SessionFile, SESSION_FILE};
use crate::telegram::BotApiClient;

/// CLI for zip-sender: pack input folders into zip parts and post them to a Telegram channel.
#[derive(Parser, Debug)]
#[clap(
    name = "zip-sender",
    version,
    about = "Bundle input folders into size-capped zip parts and deliver them to a Telegram channel"
)]
pub struct Cli {
    /// Path to the JSON config file; created with defaults if missing
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Folder whose subfolders are packed
    #[clap(long, default_value = "input")]
    pub input: PathBuf,

    /// Folder receiving one subfolder of parts per input folder
    #[clap(long, default_value = "output")]
    pub output: PathBuf,

    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Pack everything in the input folder, then send everything in the output folder (default)
    Run,
    /// Only pack the input folder
    Pack,
    /// Only send what is already in the output folder
    Send,
}

impl Commands {
    fn packs(self) -> bool {
        matches!(self, Commands::Run | Commands::Pack)
    }

    fn sends(self) -> bool {
        matches!(self, Commands::Run | Commands::Send)
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create folder {}", path.display()))?;
        info!(path = %path.display(), "Created folder");
    }
    Ok(())
}

/// Async CLI entrypoint shared by main() and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let command = cli.command.unwrap_or(Commands::Run);
    let mut store = ConfigStore::load(&cli.config)?;
    ensure_dir(&cli.input)?;
    ensure_dir(&cli.output)?;

    let settings = store.settings().clone();
    info!(
        delete_after_upload = settings.delete_after_upload,
        "Input folders are removed once all of their parts are archived"
    );

    let input_has_content = !list_subdirectories(&cli.input)?.is_empty();
    let output_has_content = !pending_output_folders(&cli.output)
        .with_context(|| format!("Failed to read {}", cli.output.display()))?
        .is_empty();

    let will_pack = command.packs() && input_has_content;
    let will_send = command.sends() && (input_has_content || output_has_content);
    if !will_pack && !will_send {
        warn!(
            input = %cli.input.display(),
            output = %cli.output.display(),
            "Nothing to do: no input folders and no zip parts waiting to be sent"
        );
        println!("Nothing to do. Add folders to {} and run again.", cli.input.display());
        return Ok(());
    }

    let progress = Progress::stderr();

    if will_pack {
        println!("Packing {} ...", cli.input.display());
        let config = settings.pipeline_config(cli.input.clone(), cli.output.clone());
        let report = process_input(&config, &progress).await?;
        for folder in &report.folders {
            match &folder.outcome {
                FolderOutcome::Archived {
                    parts,
                    failed_parts,
                    skipped_files,
                    source_removed,
                } => {
                    println!(
                        "  {}: {} part(s), {} failed, source {}",
                        folder.name,
                        parts.len(),
                        failed_parts.len(),
                        if *source_removed { "removed" } else { "kept" }
                    );
                    if *skipped_files > 0 {
                        println!("    {skipped_files} file(s) could not be archived");
                    }
                }
                FolderOutcome::Empty => println!("  {}: empty, skipped", folder.name),
                FolderOutcome::Failed(reason) => println!("  {}: failed ({reason})", folder.name),
            }
        }
    } else if command.packs() {
        info!("Input folder is empty; skipping packing");
    }

    if !command.sends() {
        return Ok(());
    }
    let pending = pending_output_folders(&cli.output)
        .with_context(|| format!("Failed to read {}", cli.output.display()))?;
    if pending.is_empty() {
        warn!(output = %cli.output.display(), "No zip parts to send");
        println!("No zip parts to send.");
        return Ok(());
    }

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut prompt_out = std::io::stderr();

    let session = SessionFile::new(SESSION_FILE);
    let base_url = settings.api_base_url.clone();
    let max_concurrent = settings.max_concurrent_transmissions;
    let (client, identity) = authenticate(
        &mut store,
        &session,
        |token| Ok(BotApiClient::new(&base_url, token, max_concurrent)?),
        &mut input,
        &mut prompt_out,
    )
    .await
    .context("Could not connect to Telegram")?;
    println!(
        "Connected as {} (@{})",
        identity.first_name,
        identity.username.as_deref().unwrap_or("-")
    );

    let chat = match select_channel(&client, &mut store, &mut input, &mut prompt_out).await? {
        Some(chat) => chat,
        None => bail!("No channel selected"),
    };

    println!("Sending {} folder(s) to {chat} ...", pending.len());
    let ctx = DeliveryContext::new(DeliveryPolicy::default(), progress);
    let report = deliver_all(&client, &chat, &cli.output, &ctx).await?;
    for folder in &report.folders {
        println!(
            "  {}: {} sent, {} failed",
            folder.name,
            folder.sent.len(),
            folder.failed.len()
        );
    }
    println!("Delivery complete.");

    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| {
        info!(failed_files = report.failed_files(), "Run finished");
    });
    Ok(())
}
