// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Coordinator entry point.

use clap::Parser;
use eyre::Context;
use gpbackup_orchestrator::{
    cluster::Cluster,
    coordinator::Coordinator,
    settings::{validate_timestamp, Settings},
};
use tracing_subscriber::EnvFilter;

/// The coordinator command line options.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Parallel backup and restore coordinator",
    long_about = None,
    rename_all = "kebab-case"
)]
pub struct Opts {
    /// The path to the settings file describing the segment topology.
    #[arg(long, value_name = "FILE", default_value = "gpbackup.yaml", global = true)]
    settings_path: String,

    /// The type of operation to run.
    #[command(subcommand)]
    operation: Operation,
}

/// The type of operation to run.
#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Operation {
    /// Back up the given tables into per-segment backup directories.
    Backup {
        /// The oids of the tables to stream.
        #[arg(long, value_name = "OID", value_delimiter = ',')]
        tables: Vec<u32>,

        /// Compress the streamed data with gzip.
        #[arg(long)]
        compress: bool,

        /// Route the streamed data through plugin sink pipes.
        #[arg(long)]
        plugin: bool,

        /// Override root directory for backup artifacts. Defaults to each
        /// segment's own data directory.
        #[arg(long, value_name = "DIR")]
        backup_dir: Option<String>,
    },
    /// Verify that an existing backup set is restorable on every segment.
    Restore {
        /// The 14-digit key of the backup set.
        #[arg(long, value_name = "TIMESTAMP")]
        timestamp: String,

        /// The oids of the tables the backup set contains.
        #[arg(long, value_name = "OID", value_delimiter = ',')]
        tables: Vec<u32>,

        /// Override root directory the backup set was written under.
        #[arg(long, value_name = "DIR")]
        backup_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    let settings = Settings::load(&opts.settings_path).wrap_err("Failed to load settings")?;

    match opts.operation {
        Operation::Backup {
            tables,
            compress,
            plugin,
            backup_dir,
        } => {
            let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
            let coordinator =
                build_coordinator(&settings, backup_dir, &timestamp, &tables, compress, plugin);
            coordinator.spawn_signal_handler();

            tracing::info!(%timestamp, num_tables = tables.len(), "starting backup");
            coordinator
                .run_backup(&tables)
                .await
                .wrap_err("Backup failed")?;
            tracing::info!(
                report = %coordinator.cluster().report_path(),
                "backup complete"
            );
        }
        Operation::Restore {
            timestamp,
            tables,
            backup_dir,
        } => {
            validate_timestamp(&timestamp)?;
            let coordinator =
                build_coordinator(&settings, backup_dir, &timestamp, &tables, false, false);
            coordinator.spawn_signal_handler();

            tracing::info!(%timestamp, "verifying backup set");
            coordinator
                .run_restore(&tables)
                .await
                .wrap_err("Restore verification failed")?;
            tracing::info!("backup set verified");
        }
    }
    Ok(())
}

fn build_coordinator(
    settings: &Settings,
    backup_dir: Option<String>,
    timestamp: &str,
    tables: &[u32],
    compress: bool,
    plugin: bool,
) -> Coordinator {
    let user_dir = backup_dir.or_else(|| settings.backup_dir.clone());
    let mut cluster = Cluster::new(settings.segments.clone(), user_dir.as_deref(), timestamp);
    cluster.populate_metadata_pipe_paths();
    cluster.populate_table_pipe_paths(tables);
    Coordinator::new(cluster, compress, plugin)
}
