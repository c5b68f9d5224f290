use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::gcp;
use crate::handler::EventHandler;
use crate::load_config::load_config;
use crate::notification::StorageNotification;
use crate::records::{add_record, list_records};
use crate::server::serve;

/// CLI for bucket-ingest: move storage objects into a document collection or a warehouse table.
#[derive(Parser)]
#[clap(
    name = "bucket-ingest",
    version,
    about = "Ingest JSON and CSV objects landing in object storage into a document store or a warehouse table"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Receive storage notifications over HTTP
    Serve {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Process a single notification read from a file ("-" for stdin)
    Handle {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Notification JSON (CloudEvent, background-function envelope, or bare object resource)
        #[clap(long)]
        event: PathBuf,
    },
    /// Read or add records in the document collection
    Records {
        #[clap(subcommand)]
        action: RecordsCommand,
    },
}

#[derive(Subcommand)]
pub enum RecordsCommand {
    /// Print every record in the collection as JSON lines
    List {
        #[clap(long)]
        config: PathBuf,
    },
    /// Add a record with a random ID and today's registration date
    Add {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        name: String,
        #[clap(long)]
        email: String,
    },
}

fn read_event(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read notification from stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("Failed to read notification file {:?}", path))
}

/// Async CLI entrypoint shared by main() and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { config } => {
            let config = load_config(config)?;
            let backends = gcp::connect(&config)?;
            serve(&config, backends)
                .await
                .context("Notification receiver stopped with an error")
        }
        Commands::Handle { config, event } => {
            let config = load_config(config)?;
            let body = read_event(&event)?;
            let notification = StorageNotification::from_request(None, &body)?;
            let backends = gcp::connect(&config)?;
            let handler = EventHandler::new(backends, config.pipeline.clone());
            match handler.handle(&notification).await {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Ingestion failed for gs://{}/{}: {}", notification.bucket, notification.object_key, e);
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::Records { action } => match action {
            RecordsCommand::List { config } => {
                let config = load_config(config)?;
                let backends = gcp::connect(&config)?;
                let records = list_records(backends.documents.as_ref(), &config.pipeline.collection).await?;
                for record in records {
                    println!("{}", serde_json::to_string(&record)?);
                }
                Ok(())
            }
            RecordsCommand::Add {
                config,
                name,
                email,
            } => {
                let config = load_config(config)?;
                let backends = gcp::connect(&config)?;
                let (id, fields) = add_record(
                    backends.documents.as_ref(),
                    &config.pipeline.collection,
                    &name,
                    &email,
                )
                .await?;
                println!("Data saved with id {id}: {}", serde_json::Value::Object(fields));
                Ok(())
            }
        },
    }
}
