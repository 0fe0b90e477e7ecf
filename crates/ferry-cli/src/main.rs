//! ferry CLI
//!
//! Real-time file relay: run the relay server or push a file through one.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use ferry_files::UploadStore;
use ferry_gateway::{Gateway, RelayClient};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration};

/// ferry - share files with everyone online, or with one person
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Upload directory (overrides config)
        #[arg(short, long)]
        upload_dir: Option<PathBuf>,
    },

    /// Send a file through a relay
    Send {
        /// File to send
        #[arg(required = true)]
        file: PathBuf,

        /// Your user id
        #[arg(long)]
        user_id: String,

        /// Your display name
        #[arg(long)]
        name: String,

        /// Recipient user id; omit to share with everyone online
        #[arg(long)]
        to: Option<String>,

        /// Relay URL (overrides config)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output path (defaults to the standard config location)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Initialize logging; RUST_LOG wins over config
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Serve { bind, upload_dir } => {
            config.validate()?;
            serve(bind, upload_dir, &config).await?;
        }
        Commands::Send {
            file,
            user_id,
            name,
            to,
            server,
        } => {
            config.validate()?;
            send_file(file, user_id, name, to, server, &config).await?;
        }
        Commands::InitConfig { output, force } => {
            init_config(output, force)?;
        }
    }

    Ok(())
}

/// Run the relay until Ctrl+C
async fn serve(
    bind: Option<String>,
    upload_dir: Option<PathBuf>,
    config: &Config,
) -> anyhow::Result<()> {
    let addr = match bind {
        Some(bind) => bind.parse()?,
        None => config.parse_listen_addr()?,
    };
    let upload_dir = upload_dir.unwrap_or_else(|| config.storage.upload_dir.clone());
    let store = UploadStore::open(&upload_dir, config.storage.public_prefix.clone()).await?;

    let gateway = Gateway::bind_with_config(
        addr,
        store,
        config.relay_config(),
        config.gateway_config(),
    )
    .await?;

    let local = gateway.local_addr()?;
    println!("Relay listening on ws://{}", local);
    println!(
        "Downloads served at http://{}{}/",
        local,
        config.storage.public_prefix.trim_end_matches('/')
    );
    println!("Upload directory: {}", upload_dir.display());
    match config.relay_config().idle_timeout {
        Some(timeout) => println!("Idle transfers expire after {}", format_duration(timeout)),
        None => println!("Idle transfer expiry disabled"),
    }
    println!("Press Ctrl+C to stop");

    gateway
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}

/// Upload a file to everyone online or to one recipient
async fn send_file(
    file: PathBuf,
    user_id: String,
    name: String,
    to: Option<String>,
    server: Option<String>,
    config: &Config,
) -> anyhow::Result<()> {
    if !file.is_file() {
        anyhow::bail!("File not found: {}", file.display());
    }

    let file_size = std::fs::metadata(&file)?.len();
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    let url = server.unwrap_or_else(|| config.server.connect_url.clone());

    println!("File: {}", file.display());
    println!("Size: {}", format_bytes(file_size));
    println!("Recipient: {}", to.as_deref().unwrap_or("everyone"));
    println!("Relay: {}", url);

    let mut client = RelayClient::connect(&url)
        .await?
        .with_chunk_size(config.transfer.chunk_size)
        .with_reply_timeout(Duration::from_secs(config.transfer.reply_timeout_secs));
    client.join(user_id, name).await?;

    let transfer_id = chrono::Utc::now().timestamp_millis().to_string();
    tracing::debug!("Starting transfer {}", transfer_id);

    let progress = TransferProgress::new(file_size, &filename);
    let started = Instant::now();
    let result = client
        .send_file(&file, transfer_id, to.as_deref(), |sent| progress.update(sent))
        .await;

    match result {
        Ok(record) => {
            let target = record.recipient_name.as_deref().unwrap_or("everyone");
            progress.finish_with_message(format!(
                "Delivered to {} in {}",
                target,
                format_duration(started.elapsed())
            ));
            println!("Download path: {}", record.download_path);
        }
        Err(e) => {
            progress.abandon();
            return Err(e.into());
        }
    }

    client.close().await?;
    Ok(())
}

/// Write the default configuration
fn init_config(output: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = output.unwrap_or_else(Config::default_path);
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
