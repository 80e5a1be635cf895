mod cli;
mod driver;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use panorama_core::{load_dotenv, Settings, TableSelection};
use panorama_datalake::Datalake;

use crate::cli::{CliArgs, Command, SelectionArgs};
use crate::driver::Ddl;

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = CliArgs::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut settings = Settings::load(&args.settings)
        .with_context(|| format!("failed to load settings from {}", args.settings.display()))?;
    settings.log_summary();

    let mut datalake = Datalake::connect(&settings)
        .await
        .context("failed to set up the datalake client")?;

    match args.command {
        Command::ExtractAndLoad { selection, force } => {
            let selection = select(&settings, &selection)?;
            let mut sources = driver::connect_selected(&settings, &selection).await?;
            let (report, summary) =
                driver::extract_and_load(&mut sources, &mut datalake, &selection, force).await?;
            println!("{}", report);
            println!("{}", summary);
            if report.has_failures() {
                bail!("{} uploads or datasources failed", report.failures().count());
            }
        }
        Command::CreateDatalakeTables(selection) => {
            ddl(&settings, &mut datalake, &selection, Ddl::CreateTables).await?;
        }
        Command::DropDatalakeTables(selection) => {
            ddl(&settings, &mut datalake, &selection, Ddl::DropTables).await?;
        }
        Command::CreateTableViews(selection) => {
            ddl(&settings, &mut datalake, &selection, Ddl::CreateViews).await?;
        }
        Command::SetTables(selection) => {
            let selection = select(&settings, &selection)?;
            let sources = driver::connect_selected(&settings, &selection).await?;
            driver::set_tables(&mut settings, &sources).await?;
            save(&settings, &args.settings)?;
        }
        Command::SetTablesFields(selection) => {
            let selection = select(&settings, &selection)?;
            let mut sources = driver::connect_selected(&settings, &selection).await?;
            driver::set_tables_fields(&mut settings, &mut sources, &selection).await?;
            save(&settings, &args.settings)?;
        }
        Command::TestConnections => {
            let checks = driver::test_connections(&settings, &datalake).await;
            let mut failed = 0;
            for (name, check) in &checks {
                if !check.is_ok() {
                    failed += 1;
                    error!(datasource = %name, status = %check.status, "connection failed");
                }
                println!("{} - {}", name, check);
            }
            if failed > 0 {
                bail!("{} connection checks failed", failed);
            }
        }
    }

    Ok(())
}

fn select(settings: &Settings, args: &SelectionArgs) -> Result<TableSelection> {
    let selection = args.selection().context("invalid table selection")?;
    settings.check_selection(&selection)?;
    Ok(selection)
}

async fn ddl(settings: &Settings, datalake: &mut Datalake, args: &SelectionArgs, action: Ddl) -> Result<()> {
    let selection = select(settings, args)?;
    let summary = driver::run_ddl(settings, datalake, &selection, action).await?;
    println!("{}", summary);
    Ok(())
}

fn save(settings: &Settings, path: &std::path::Path) -> Result<()> {
    settings
        .save(path)
        .with_context(|| format!("failed to save settings to {}", path.display()))?;
    info!(path = %path.display(), "settings saved");
    Ok(())
}
