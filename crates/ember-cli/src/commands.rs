use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use chrono::Utc;
use colored::Colorize;
use ember_server::{EmberServer, ServerConfig};
use ember_store::{FilesystemStore, ObjectStore};
use ember_types::ObjectInfo;
use ember_vault::{SweepReport, Vault, VaultConfig};
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::cli::*;

const READ_CHUNK_SIZE: usize = 64 * 1024;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Serve(args) => cmd_serve(args).await,
        Command::Sweep(args) => cmd_sweep(args, format).await,
        Command::List(args) => cmd_list(args, format).await,
        Command::Put(args) => cmd_put(args, format).await,
        Command::Get(args) => cmd_get(args).await,
    }
}

/// Open a vault over `storage` without purging staging files, so a server
/// running on the same directory is left alone.
async fn open_vault(storage: &Path, config: VaultConfig) -> anyhow::Result<Vault> {
    let store = FilesystemStore::open(storage)
        .await
        .with_context(|| format!("cannot open storage at {}", storage.display()))?;
    store.health_check().await?;
    Ok(Vault::new(Arc::new(store), config)?)
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(storage) = args.storage {
        config.storage_dir = storage;
    }
    info!(
        bind = %config.bind_addr,
        storage = %config.storage_dir.display(),
        rate_limit = config.rate_limit.enabled,
        "starting server"
    );
    println!(
        "{} Ember server on {} (storage: {})",
        "▶".green().bold(),
        config.bind_addr.to_string().bold(),
        config.storage_dir.display()
    );
    EmberServer::new(config).serve().await?;
    Ok(())
}

async fn cmd_sweep(args: SweepArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = VaultConfig {
        expiration_secs: args.ttl,
        ..Default::default()
    };
    let vault = open_vault(&args.storage.storage, config).await?;
    let report = vault.sweep_now().await;
    info!(
        storage = %args.storage.storage.display(),
        ttl_secs = args.ttl,
        scanned = report.scanned,
        expired = report.expired,
        "manual sweep finished"
    );
    if report.failed > 0 {
        warn!(failed = report.failed, "manual sweep had failures");
    }
    print_report(&report, format)
}

fn print_report(report: &SweepReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            println!(
                "{} Sweep complete: {} scanned, {} expired, {} purged",
                "✓".green().bold(),
                report.scanned,
                report.expired.to_string().yellow(),
                report.purged
            );
            if report.failed > 0 {
                println!("  {} {} failures (see log)", "!".red().bold(), report.failed);
            }
        }
    }
    Ok(())
}

async fn cmd_list(args: StorageArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = FilesystemStore::open(&args.storage).await?;
    let mut objects: Vec<ObjectInfo> = store.list_all().try_collect().await?;
    objects.sort_by_key(|info| info.created_at);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&objects)?);
        return Ok(());
    }
    if objects.is_empty() {
        println!("No objects stored.");
        return Ok(());
    }
    let now = Utc::now();
    for info in &objects {
        let mode = if info.mode.is_burn() {
            "burn".red()
        } else {
            "normal".green()
        };
        println!(
            "{}  {:>6}  {:>12} B  {} old",
            info.id.to_string().yellow(),
            mode,
            info.size,
            format_age(info.age(now))
        );
    }
    Ok(())
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m", secs / 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

fn file_chunks(file: tokio::fs::File) -> impl Stream<Item = io::Result<Bytes>> + Send {
    futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), file)))
    })
}

async fn cmd_put(args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let vault = open_vault(&args.storage.storage, VaultConfig::default()).await?;
    let file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("cannot open {}", args.file.display()))?;
    let declared = file.metadata().await?.len();

    let receipt = vault
        .ingest(file_chunks(file), Some(declared), args.burn)
        .await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&receipt)?),
        OutputFormat::Text => println!(
            "{} Stored {} bytes as {} ({})",
            "✓".green().bold(),
            receipt.size,
            receipt.id.to_string().yellow(),
            receipt.mode
        ),
    }
    Ok(())
}

async fn cmd_get(args: GetArgs) -> anyhow::Result<()> {
    let config = VaultConfig {
        burn_grace_secs: 0,
        ..Default::default()
    };
    let vault = open_vault(&args.storage.storage, config).await?;
    let retrieval = vault.retrieve(&args.id).await?;
    let burned = retrieval.mode.is_burn();

    let copied = match &args.output {
        Some(path) => {
            let mut out = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?;
            let copied = copy_stream(retrieval.stream, &mut out).await;
            if copied.is_err() {
                let _ = tokio::fs::remove_file(path).await;
            }
            copied
        }
        None => copy_stream(retrieval.stream, &mut tokio::io::stdout()).await,
    };
    vault.wait_for_burn_deletions().await;
    let bytes = copied?;

    if let Some(path) = &args.output {
        let note = if burned { " (burned)".red().to_string() } else { String::new() };
        eprintln!(
            "{} Wrote {} bytes to {}{}",
            "✓".green().bold(),
            bytes,
            path.display(),
            note
        );
    }
    Ok(())
}

async fn copy_stream<S, W>(stream: S, out: &mut W) -> anyhow::Result<u64>
where
    S: Stream<Item = ember_store::StoreResult<Bytes>> + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut stream = stream;
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(total)
}
