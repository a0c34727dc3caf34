//! drivelink CLI - upload order files to a Microsoft Graph drive.
//!
//! Configuration comes from the environment (a `.env` file in the working
//! directory is loaded first). Reports are printed to stdout as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use drivelink_storage::{DrivePipeline, FileUpload, GraphConfig, OrderUpload, Payload};

#[derive(Parser)]
#[command(name = "drivelink")]
#[command(about = "drivelink - Resilient uploads to SharePoint document libraries")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether an order folder exists and what it holds.
    Check {
        /// Customer name.
        #[arg(short, long)]
        customer: String,

        /// Order number.
        #[arg(short, long)]
        order: String,
    },

    /// Upload files into an order folder, creating it if needed.
    Upload {
        /// Customer name.
        #[arg(short, long)]
        customer: String,

        /// Order number.
        #[arg(short, long)]
        order: String,

        /// Existing order folder ID (skips folder creation).
        #[arg(long)]
        folder_id: Option<String>,

        /// JSON file uploaded as the order manifest.
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        /// Files uploaded at the same time.
        #[arg(long, env = "DRIVELINK_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Files to upload.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the environment may already be set.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = GraphConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Check { customer, order } => cmd_check(config, &customer, &order).await,

        Commands::Upload {
            customer,
            order,
            folder_id,
            metadata,
            concurrency,
            files,
        } => {
            let mut config = config;
            if let Some(concurrency) = concurrency {
                config.upload_concurrency = concurrency;
            }
            cmd_upload(config, customer, order, folder_id, metadata, &files).await
        }
    }
}

/// Print the folder report for an order.
async fn cmd_check(config: GraphConfig, customer: &str, order: &str) -> Result<()> {
    let pipeline = DrivePipeline::new(config).context("Failed to create pipeline")?;

    let report = pipeline
        .check_order(customer, order)
        .await
        .context("Failed to check order folder")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Upload files for an order and print the batch report.
async fn cmd_upload(
    config: GraphConfig,
    customer: String,
    order_no: String,
    folder_id: Option<String>,
    metadata: Option<PathBuf>,
    paths: &[PathBuf],
) -> Result<()> {
    let pipeline = DrivePipeline::new(config).context("Failed to create pipeline")?;

    let metadata = match metadata {
        Some(path) => Some(read_metadata(&path).await?),
        None => None,
    };

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(open_file(path).await?);
    }

    info!("Uploading {} file(s) for order {}", files.len(), order_no);

    let report = pipeline
        .upload_order(OrderUpload {
            customer,
            order_no,
            files,
            metadata,
            folder_id,
        })
        .await
        .context("Upload failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.ok {
        bail!(
            "{} of {} file(s) uploaded",
            report.uploaded_count,
            report.uploaded.len()
        );
    }
    Ok(())
}

/// Prepare a local file as a streaming upload.
///
/// Only the size is read up front; the file is opened once its upload
/// starts, so large batches do not hold a descriptor per file.
async fn open_file(path: &Path) -> Result<FileUpload> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let payload = Payload::from_file(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(FileUpload::new(name, payload))
}

/// Read and parse the manifest JSON.
async fn read_metadata(path: &Path) -> Result<serde_json::Value> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}
