use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use panorama_core::{ConfigError, TableSelection};

/// Extract, load and catalog Open edX data in an S3 datalake.
#[derive(Parser, Debug)]
#[command(name = "panorama", version, about = "Panorama ELT for Open edX")]
pub struct CliArgs {
    /// Log at debug level regardless of RUST_LOG
    #[arg(long, global = true)]
    pub debug: bool,

    /// Settings file
    #[arg(
        long,
        global = true,
        env = "PANORAMA_SETTINGS_FILE",
        default_value = "panorama_settings.yaml"
    )]
    pub settings: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract tables from the datasources and upload them to the datalake
    ExtractAndLoad {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Ignore the incremental window and reload every partition
        #[arg(long)]
        force: bool,
    },
    /// Create the external tables in the datalake catalog
    CreateDatalakeTables(SelectionArgs),
    /// Drop the datalake tables and their views
    DropDatalakeTables(SelectionArgs),
    /// Create or replace the typed views over the datalake tables
    CreateTableViews(SelectionArgs),
    /// Replace each datasource's table list with the tables it reports
    SetTables(SelectionArgs),
    /// Query the live fields of every table and store them in the settings
    SetTablesFields(SelectionArgs),
    /// Check the datalake and every datasource can be reached
    TestConnections,
}

#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// Every datasource and table
    #[arg(short = 'a', long)]
    pub all: bool,

    /// Only this datasource
    #[arg(short = 'd', long)]
    pub datasource: Option<String>,

    /// Comma-separated table names
    #[arg(short = 't', long)]
    pub tables: Option<String>,
}

impl SelectionArgs {
    pub fn selection(&self) -> Result<TableSelection, ConfigError> {
        TableSelection::from_flags(self.all, self.datasource.as_deref(), self.tables.as_deref())
    }
}
