//! Maintenance CLI for stitch upload storage.
//!
//! Sweeps abandoned chunks and orphans, and inspects what a session holds.
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use stitch_core::{AppConfig, SessionId};
use stitch_uploader::{BlobStorage, ChunkStorage, OrphanageStorage, StaticSession};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stitchctl")]
#[command(version, about = "Maintenance CLI for stitch upload storage", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "STITCH_CONFIG",
        default_value = "config/stitch.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete chunk data older than the maximum age
    ClearChunks {
        /// Maximum age in seconds (default: chunks.max_age_secs)
        #[arg(long)]
        max_age: Option<u64>,
    },
    /// Delete orphans older than the maximum age
    ClearOrphans {
        /// Maximum age in seconds (default: orphanage.max_age_secs)
        #[arg(long)]
        max_age: Option<u64>,
    },
    /// List the pending chunks of an upload session
    Chunks {
        /// Upload session identifier
        session_id: String,
    },
    /// List the orphans of a web session
    Orphans {
        /// Web session identifier
        web_session_id: String,
        /// Upload type the orphans were staged under
        upload_type: String,
    },
}

#[derive(Serialize)]
struct ChunkListing {
    session_id: String,
    chunks: Vec<String>,
}

#[derive(Serialize)]
struct OrphanListing {
    web_session_id: String,
    upload_type: String,
    files: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli.config)?;
    let store = stitch_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    store
        .health_check()
        .await
        .context("storage health check failed")?;
    let chunks = ChunkStorage::from_config(store.clone(), &config.chunks)
        .context("failed to initialize chunk storage")?;

    match cli.command {
        Commands::ClearChunks { max_age } => {
            let max_age = max_age
                .map(seconds)
                .unwrap_or_else(|| config.chunks.max_age());
            let report = chunks.clear(max_age, None).await?;
            print_json(&report)
        }
        Commands::ClearOrphans { max_age } => {
            let max_age = max_age
                .map(seconds)
                .unwrap_or_else(|| config.orphanage.max_age());
            let report = chunks
                .clear(max_age, Some(&config.orphanage.directory))
                .await?;
            print_json(&report)
        }
        Commands::Chunks { session_id } => {
            let id = SessionId::parse(&session_id)?;
            let listing = ChunkListing {
                chunks: chunks.get_chunks(&id).await?,
                session_id,
            };
            print_json(&listing)
        }
        Commands::Orphans {
            web_session_id,
            upload_type,
        } => {
            // Listing never promotes, so the destination is only a placeholder.
            let orphanage = OrphanageStorage::new(
                Arc::new(BlobStorage::new(store)?),
                Arc::new(StaticSession::active(web_session_id.clone())),
                &chunks,
                &config.orphanage,
                upload_type.clone(),
            )?;
            let files = orphanage.get_files().await?.into_keys().collect();
            print_json(&OrphanListing {
                web_session_id,
                upload_type,
                files,
            })
        }
    }
}

/// Load configuration from an optional TOML file overlaid with `STITCH_`
/// environment variables (`STITCH_CHUNKS__PREFIX=...`).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if Path::new(path).exists() {
        tracing::debug!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {path}, using defaults");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("STITCH_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

fn seconds(secs: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
