//! Command-line front end for the transfer engine
//!
//! ```bash
//! # Upload, choosing single PUT or multipart by size
//! s3xfer put ./backup.sql.gz --key backups/2024-01-15.sql.gz
//!
//! # Force multipart with 8 MiB parts, 4 at a time
//! s3xfer put-large ./disk.img --part-size 8M --concurrency 4
//!
//! # Download, list, delete
//! s3xfer get backups/2024-01-15.sql.gz --output /tmp/restore.sql.gz
//! s3xfer ls backups/ --format json
//! s3xfer rm backups/2024-01-15.sql.gz
//!
//! # Share a download link for a day
//! s3xfer presign backups/2024-01-15.sql.gz --expires 86400
//! ```

pub mod args;
pub mod commands;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config;
use crate::transfer::TransferEngine;
use args::{Cli, Commands};
use commands::*;

/// Run one parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    debug!("CLI arguments: {:?}", cli);

    let config = config::load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let engine = TransferEngine::from_config(&config).context("Failed to create store client")?;
    info!(
        "Using bucket {} at {}",
        config.store.bucket, config.store.endpoint
    );

    let format = cli.format;
    match cli.command {
        Commands::Put { file, key } => cmd_put(&engine, format, &file, key).await?,
        Commands::PutSmall { file, key } => cmd_put_small(&engine, format, &file, key).await?,
        Commands::PutLarge {
            file,
            key,
            part_size,
            concurrency,
        } => cmd_put_large(&engine, format, &file, key, part_size, concurrency).await?,
        Commands::Get { key, output } => cmd_get(&engine, format, &key, output).await?,
        Commands::Ls { prefix } => cmd_ls(&engine, format, &prefix).await?,
        Commands::Rm { key } => cmd_rm(&engine, format, &key).await?,
        Commands::Presign { key, expires } => cmd_presign(&engine, format, &key, expires).await?,
    }

    debug!("Command completed successfully");
    Ok(())
}

/// Install the tracing subscriber: `RUST_LOG` if set, otherwise `level`
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
