use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Context;
use crl_service::{
    crl::{CrlIssuingPointRecord, CrlNumber},
    pruning::PruningScheduler,
    setup::AppContext,
};
use tracing::info;

/// CRL issuing point administration and record pruning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "crl-service")]
pub struct Cli {
    /// Settings file to load instead of config/settings
    #[arg(short, long, value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Repository administration
    #[command(subcommand)]
    Database(DatabaseCommand),

    /// Manage CRL issuing points
    #[command(subcommand)]
    IssuingPoint(IssuingPointCommand),

    /// Run the pruning job once
    Prune,

    /// Run the pruning scheduler until interrupted
    Serve,
}

#[derive(Subcommand, Debug)]
pub enum DatabaseCommand {
    /// Check connectivity and create the schema marker
    Init,

    /// Index maintenance
    #[command(subcommand)]
    Index(IndexCommand),
}

#[derive(Subcommand, Debug)]
pub enum IndexCommand {
    /// Rebuild the issuing point index from stored records
    Rebuild,
}

#[derive(Subcommand, Debug)]
pub enum IssuingPointCommand {
    /// List issuing point ids
    List,

    /// Print an issuing point record as JSON
    Show { id: String },

    /// Create an issuing point
    Add {
        id: String,

        /// Initial CRL number, decimal or 0x hex
        #[arg(long, default_value = "0")]
        crl_number: CrlNumber,

        /// DER encoded CA certificate
        #[arg(long, value_name = "PATH")]
        ca_cert: Option<PathBuf>,
    },

    /// Delete an issuing point
    Remove { id: String },
}

impl Command {
    pub async fn run(self, context: AppContext) -> color_eyre::Result<()> {
        match self {
            Command::Database(DatabaseCommand::Init) => {
                context.database.init().await?;
                context.database.init_database().await?;
                info!("Database initialized");
            }
            Command::Database(DatabaseCommand::Index(IndexCommand::Rebuild)) => {
                let count = context.database.rebuild_indexes().await?;
                info!(count, "Issuing point index rebuilt");
            }
            Command::IssuingPoint(command) => command.run(&context).await?,
            Command::Prune => {
                let report = context.pruning_job()?.run().await?;
                println!(
                    "deleted {} certificates and {} requests, {} failures",
                    report.certificates_deleted, report.requests_deleted, report.failures
                );
            }
            Command::Serve => serve(&context).await?,
        }
        Ok(())
    }
}

impl IssuingPointCommand {
    async fn run(self, context: &AppContext) -> color_eyre::Result<()> {
        let repository = &context.crl_repository;
        match self {
            IssuingPointCommand::List => {
                for id in repository.issuing_point_names().await? {
                    println!("{id}");
                }
            }
            IssuingPointCommand::Show { id } => {
                let record = repository.read_issuing_point(&id).await?;
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            IssuingPointCommand::Add {
                id,
                crl_number,
                ca_cert,
            } => {
                context.require_persistent("issuing-point add")?;
                let mut record = CrlIssuingPointRecord::new(id, crl_number, 0, None, None);
                if let Some(path) = ca_cert {
                    let der = tokio::fs::read(&path)
                        .await
                        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
                    record = record.with_ca_cert(der);
                }
                info!(id = %record.id, "Adding issuing point");
                repository.add_issuing_point(record).await?;
            }
            IssuingPointCommand::Remove { id } => {
                context.require_persistent("issuing-point remove")?;
                repository.delete_issuing_point(&id).await?;
                info!(%id, "Issuing point removed");
            }
        }
        Ok(())
    }
}

async fn serve(context: &AppContext) -> color_eyre::Result<()> {
    let scheduler = PruningScheduler::new(Arc::new(context.pruning_job()?))?;
    let handle = scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .wrap_err("Failed to listen for shutdown signal")?;
    scheduler.stop();
    handle.await?;
    Ok(())
}
