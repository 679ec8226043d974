use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use revsync_store::LocalStore;
use revsync_sync::{retention, OfflineQueue, RetentionPolicy};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "revsync")]
#[command(about = "Inspect and maintain an offline-first project store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use this config file instead of ~/.revsync/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new device and its local store
    Init {
        /// Device name
        #[arg(short, long)]
        name: String,

        /// Where the local store lives
        #[arg(long)]
        storage: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show device, storage and last sync
    Status,

    /// List locally stored projects
    Projects {
        /// Only projects for this person
        #[arg(long)]
        person: Option<String>,
    },

    /// Show work waiting for connectivity
    Pending,

    /// Delete closed projects older than the retention window
    Sweep {
        /// Only list what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Clean up interrupted writes and report orphaned uploads
    Recover,

    /// Give up on a queued bill upload
    Discard {
        /// Temp id of the queued upload
        temp_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::get_config_path()?,
    };

    match cli.command {
        Commands::Init {
            name,
            storage,
            force,
        } => {
            if config_path.exists() && !force {
                bail!(
                    "Already initialized ({}); pass --force to replace it",
                    config_path.display()
                );
            }

            let storage_path = match storage {
                Some(path) => path,
                None => config::default_storage_path()?,
            };
            let config = Config::generate(&name, storage_path);
            LocalStore::open(&config.storage_path)
                .await
                .with_context(|| {
                    format!("Failed to create store at {}", config.storage_path.display())
                })?;
            config.save_to(&config_path)?;

            println!("Initialized device: {}", config.device_name);
            println!("Device ID: {}", config.device_id);
            println!("Store: {}", config.storage_path.display());
            println!("Config saved to {}", config_path.display());
        }
        Commands::Status => {
            let (config, store) = open(&config_path).await?;
            let stats = store.stats().await?;
            let status = store.load_sync_status().await?;

            println!("Device: {} ({})", config.device_name, config.device_id);
            println!("Store: {}", config.storage_path.display());
            match status.last_successful_sync {
                Some(at) => println!("Last successful sync: {}", at.to_rfc3339()),
                None => println!("Last successful sync: never"),
            }
            println!(
                "Projects: {} ({} closed)",
                stats.project_count, stats.closed_project_count
            );
            println!(
                "Attachments: {} ({} bytes)",
                stats.attachment_count, stats.attachment_bytes
            );
            println!("Cached images: {}", stats.cached_image_count);
            println!("Pending pushes: {}", stats.pending_push_count);
            println!(
                "Pending uploads: {} ({} bytes)",
                stats.pending_upload_count, stats.pending_upload_bytes
            );
        }
        Commands::Projects { person } => {
            let (_, store) = open(&config_path).await?;
            let pending = store.pending_pushes().await?;

            let mut projects = store.list_projects().await?;
            if let Some(person) = &person {
                projects.retain(|project| &project.person == person);
            }
            projects.sort_by(|a, b| b.transaction_date.cmp(&a.transaction_date));

            for project in &projects {
                println!(
                    "{}  {}  {:<12} {:<8} {}{}",
                    project.transaction_date.format("%Y-%m-%d"),
                    project.id,
                    project.person,
                    if project.is_closed { "closed" } else { "open" },
                    project.title,
                    if pending.contains(&project.id) {
                        "  [unsynced]"
                    } else {
                        ""
                    }
                );
            }
            println!("{} projects", projects.len());
        }
        Commands::Pending => {
            let (_, store) = open(&config_path).await?;
            let queue = OfflineQueue::new(store);

            let pushes = queue.pending_pushes().await?;
            println!("Pending pushes: {}", pushes.len());
            for id in &pushes {
                println!("  {}", id);
            }

            let uploads = queue.pending_uploads().await?;
            println!("Pending uploads: {}", uploads.len());
            for upload in &uploads {
                println!(
                    "  {}  project {}  {}  queued {}{}",
                    upload.temp_id,
                    upload.project_id,
                    upload.original_filename,
                    upload.queued_at.to_rfc3339(),
                    if upload.temp_path.exists() {
                        ""
                    } else {
                        "  [temp file missing]"
                    }
                );
            }
        }
        Commands::Sweep { dry_run } => {
            let (config, store) = open(&config_path).await?;
            let policy = RetentionPolicy::days(config.retention_days);
            let report = retention::sweep(&store, &policy, Utc::now(), dry_run).await?;

            for id in &report.removed {
                println!("{} {}", if dry_run { "would remove" } else { "removed" }, id);
            }
            println!(
                "{} of {} projects {} (closed and dated before {})",
                report.removed.len(),
                report.examined,
                if dry_run { "selected" } else { "removed" },
                policy.cutoff(Utc::now()).format("%Y-%m-%d")
            );
        }
        Commands::Recover => {
            let (_, store) = open(&config_path).await?;
            let stats = store.recover().await?;

            println!("Cleaned {} interrupted writes", stats.cleaned);
            for temp_id in &stats.orphaned_uploads {
                println!("Queued upload {} has no temp file", temp_id);
            }
            for error in &stats.errors {
                println!("Error: {}", error);
            }
        }
        Commands::Discard { temp_id } => {
            let (_, store) = open(&config_path).await?;
            if OfflineQueue::new(store).discard_upload(&temp_id).await? {
                println!("Discarded queued upload {}", temp_id);
            } else {
                bail!("No queued upload with id {}", temp_id);
            }
        }
    }

    Ok(())
}

async fn open(config_path: &std::path::Path) -> Result<(Config, Arc<LocalStore>)> {
    let config = Config::load_from(config_path).context("Not initialized; run `revsync init` first")?;
    debug!("Opening store at {}", config.storage_path.display());
    let store = LocalStore::open(&config.storage_path)
        .await
        .with_context(|| format!("Failed to open store at {}", config.storage_path.display()))?;
    Ok((config, Arc::new(store)))
}
