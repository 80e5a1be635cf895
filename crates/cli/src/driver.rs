//! Runs one command end to end: connect the selected datasources, drive
//! them against the datalake, then wait for the catalog statements.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use panorama_core::{
    DatasourceKind, DatasourceSettings, RunReport, Settings, TableSelection, TableSettings,
};
use panorama_datalake::{Datalake, ExecutionSummary};
use panorama_extract::{
    ConnectionCheck, CourseStructuresDatasource, CsvDatasource, Datasource, ExtractError,
    MySqlDatasource, XlsDatasource,
};

/// Open the datasource described by `settings`.
pub async fn connect(settings: &DatasourceSettings, work_dir: PathBuf) -> Result<Box<dyn Datasource>, ExtractError> {
    let ds: Box<dyn Datasource> = match settings.kind {
        DatasourceKind::Mysql => Box::new(MySqlDatasource::connect(settings, work_dir).await?),
        DatasourceKind::OpenedxCourseStructures => {
            Box::new(CourseStructuresDatasource::connect(settings, work_dir).await?)
        }
        DatasourceKind::Csv => Box::new(CsvDatasource::new(settings)?),
        DatasourceKind::Xls => Box::new(XlsDatasource::new(settings, work_dir)?),
    };
    Ok(ds)
}

/// Connect every selected datasource. A connection error is fatal.
pub async fn connect_selected(settings: &Settings, selection: &TableSelection) -> Result<Vec<Box<dyn Datasource>>> {
    let work_dir = settings.datalake.work_dir();
    let mut out = Vec::new();
    for ds in settings.datasources.iter().filter(|d| selection.includes_datasource(&d.name)) {
        let connected = connect(ds, work_dir.clone())
            .await
            .with_context(|| format!("failed to connect datasource '{}'", ds.name))?;
        out.push(connected);
    }
    if out.is_empty() {
        warn!("no datasource matches the selection");
    }
    Ok(out)
}

// ── extract-and-load ────────────────────────────────────────────

/// Drive every datasource in turn. A datasource that aborts is recorded as
/// failed and the run moves on to the next one.
pub async fn extract_and_load(
    datasources: &mut [Box<dyn Datasource>],
    datalake: &mut Datalake,
    selection: &TableSelection,
    force: bool,
) -> Result<(RunReport, ExecutionSummary)> {
    let mut report = RunReport::new();
    for ds in datasources.iter_mut() {
        let name = ds.name().to_string();
        info!(datasource = %name, force, "extract and load");
        if let Err(e) = ds.extract_and_load(datalake, selection, force, &mut report).await {
            error!(datasource = %name, error = %e, "datasource aborted; continuing with the next one");
            report.failed(&name, "*", None, &e);
        }
    }
    let summary = datalake.await_executions().await;
    Ok((report, summary))
}

// ── Catalog DDL ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ddl {
    CreateTables,
    DropTables,
    CreateViews,
}

fn selected_tables<'a>(
    settings: &'a Settings,
    selection: &'a TableSelection,
) -> impl Iterator<Item = (&'a DatasourceSettings, &'a TableSettings)> + 'a {
    settings
        .datasources
        .iter()
        .filter(move |d| selection.includes_datasource(&d.name))
        .flat_map(|d| d.tables.iter().map(move |t| (d, t)))
        .filter(move |(_, t)| selection.includes_table(&t.name))
}

/// Issue one DDL action for every selected table with declared fields.
pub async fn run_ddl(
    settings: &Settings,
    datalake: &mut Datalake,
    selection: &TableSelection,
    action: Ddl,
) -> Result<ExecutionSummary> {
    for (ds, table) in selected_tables(settings, selection) {
        // Dropping needs no schema.
        let fields = match (action, table.declared_fields()) {
            (Ddl::DropTables, f) => f.unwrap_or(&[]),
            (_, Some(f)) => f,
            (_, None) => {
                warn!(datasource = %ds.name, table = %table.name, "no fields declared; skipping");
                continue;
            }
        };

        let submitted = match action {
            Ddl::CreateTables => datalake.create_table(table, fields).await,
            Ddl::CreateViews => datalake.create_view(table, fields).await,
            Ddl::DropTables => match datalake.drop_table(table).await {
                Ok(_) => datalake.drop_view(table).await,
                Err(e) => Err(e),
            },
        };
        submitted.with_context(|| format!("{:?} failed for table '{}'", action, table.name))?;
        info!(datasource = %ds.name, table = %table.name, action = ?action, "statement submitted");
    }
    Ok(datalake.await_executions().await)
}

// ── Settings maintenance ────────────────────────────────────────

/// Replace each datasource's table list with the tables it reports,
/// keeping the settings of tables already configured.
pub async fn set_tables(settings: &mut Settings, datasources: &[Box<dyn Datasource>]) -> Result<()> {
    for ds in datasources {
        let reported = ds
            .tables()
            .await
            .with_context(|| format!("failed to list tables of '{}'", ds.name()))?;
        let Some(entry) = settings.datasources.iter_mut().find(|d| d.name == ds.name()) else {
            continue;
        };
        let tables: Vec<TableSettings> = reported
            .iter()
            .map(|name| {
                entry
                    .table(name)
                    .cloned()
                    .unwrap_or_else(|| TableSettings::named(name.as_str()))
            })
            .collect();
        info!(datasource = %entry.name, tables = tables.len(), "tables set");
        entry.tables = tables;
    }
    Ok(())
}

/// Store the live fields of every selected table in the settings.
pub async fn set_tables_fields(
    settings: &mut Settings,
    datasources: &mut [Box<dyn Datasource>],
    selection: &TableSelection,
) -> Result<()> {
    for ds in datasources.iter_mut() {
        let Some(entry) = settings.datasources.iter_mut().find(|d| d.name == ds.name()) else {
            continue;
        };
        for table in entry.tables.iter_mut().filter(|t| selection.includes_table(&t.name)) {
            let fields = ds
                .fields(&table.name, true)
                .await
                .with_context(|| format!("failed to query fields of '{}'", table.name))?;
            info!(datasource = %entry.name, table = %table.name, fields = fields.len(), "fields set");
            table.fields = Some(fields);
        }
    }
    Ok(())
}

// ── test-connections ────────────────────────────────────────────

/// Probe the datalake and every configured datasource. A datasource that
/// cannot even be opened is reported as a failed check.
pub async fn test_connections(settings: &Settings, datalake: &Datalake) -> Vec<(String, ConnectionCheck)> {
    let lake = match datalake.test_connection().await {
        Ok(()) => ConnectionCheck::ok("S3"),
        Err(e) => ConnectionCheck::failed("S3", e),
    };
    let mut checks = vec![("datalake".to_string(), lake)];

    let work_dir = settings.datalake.work_dir();
    for ds in &settings.datasources {
        match connect(ds, work_dir.clone()).await {
            Ok(source) => {
                for check in source.test_connection().await {
                    checks.push((ds.name.clone(), check));
                }
            }
            Err(e) => checks.push((ds.name.clone(), ConnectionCheck::failed("connect", e))),
        }
    }
    checks
}
