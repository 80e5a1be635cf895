//! Local file datasources: a single delimited file, or a workbook with one
//! table per sheet.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use tracing::{debug, error, info, warn};

use panorama_core::{CellValue, DatasourceSettings, FieldSpec, RunReport, TableSelection, TableSettings};
use panorama_datalake::Datalake;

use crate::datasource::{write_and_upload, ConnectionCheck, Datasource};
use crate::error::ExtractError;
use crate::writer::DELIMITER;

fn file_check(label: &str, location: &Path) -> ConnectionCheck {
    if location.is_file() {
        ConnectionCheck::ok(label)
    } else {
        ConnectionCheck::failed(label, format!("File {} not found", location.display()))
    }
}

fn declared_fields(tables: &[TableSettings], table: &str) -> Option<Vec<FieldSpec>> {
    tables
        .iter()
        .find(|t| t.name == table)
        .and_then(|t| t.declared_fields())
        .map(|f| f.to_vec())
}

// ── CSV ───────────────────────────────────────────────────────

/// A delimited file uploaded as-is as a single table.
pub struct CsvDatasource {
    name: String,
    location: PathBuf,
    tables: Vec<TableSettings>,
}

fn count_lines(path: &Path) -> std::io::Result<usize> {
    let mut n = 0;
    for line in BufReader::new(File::open(path)?).lines() {
        line?;
        n += 1;
    }
    Ok(n)
}

impl CsvDatasource {
    pub fn new(settings: &DatasourceSettings) -> Result<Self, ExtractError> {
        Ok(Self {
            name: settings.name.clone(),
            location: settings.location()?.to_path_buf(),
            tables: settings.tables.clone(),
        })
    }

    /// First configured table name, otherwise the file stem.
    pub fn table_name(&self) -> String {
        if let Some(t) = self.tables.first() {
            return t.name.clone();
        }
        self.location
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    fn read_header(&self) -> Result<Vec<FieldSpec>, ExtractError> {
        let mut header = String::new();
        BufReader::new(File::open(&self.location)?).read_line(&mut header)?;
        Ok(header
            .split(DELIMITER)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(FieldSpec::string)
            .collect())
    }
}

#[async_trait]
impl Datasource for CsvDatasource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> Vec<ConnectionCheck> {
        vec![file_check("CSV", &self.location)]
    }

    async fn tables(&self) -> Result<Vec<String>, ExtractError> {
        Ok(vec![self.table_name()])
    }

    async fn fields(&mut self, table: &str, force_query: bool) -> Result<Vec<FieldSpec>, ExtractError> {
        if !force_query {
            if let Some(fields) = declared_fields(&self.tables, table) {
                return Ok(fields);
            }
        }
        self.read_header()
    }

    async fn extract_and_load(
        &mut self,
        datalake: &mut Datalake,
        selection: &TableSelection,
        _force: bool,
        report: &mut RunReport,
    ) -> Result<(), ExtractError> {
        let table = self.table_name();
        if !selection.includes_table(&table) {
            return Ok(());
        }

        let rows = match count_lines(&self.location) {
            Ok(n) => n.saturating_sub(1),
            Err(e) => {
                error!(datasource = %self.name, path = %self.location.display(), error = %e, "cannot read file");
                report.failed(&self.name, &table, None, &e);
                return Ok(());
            }
        };

        match datalake
            .upload_table_from_file(&self.location, &table, None, false)
            .await
        {
            Ok(key) => {
                info!(datasource = %self.name, table = %table, key = %key, "file uploaded");
                report.uploaded(&self.name, &table, None, rows);
            }
            Err(e) => {
                error!(datasource = %self.name, table = %table, error = %e, "upload failed");
                report.failed(&self.name, &table, None, &e);
            }
        }
        Ok(())
    }
}

// ── Spreadsheets ──────────────────────────────────────────────

/// Header names from the first row, up to the first empty cell.
pub fn header_fields(range: &Range<Data>) -> Vec<String> {
    let Some(first) = range.rows().next() else {
        return Vec::new();
    };
    first
        .iter()
        .take_while(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect()
}

pub fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Boolean(*b),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(dt) => CellValue::DateTime(dt),
            None => CellValue::Text(cell.to_string()),
        },
        other => CellValue::Text(other.to_string()),
    }
}

/// Data rows below the header, `width` cells each, stopping at the first
/// fully empty row.
pub fn sheet_rows(range: &Range<Data>, width: usize) -> Vec<Vec<CellValue>> {
    range
        .rows()
        .skip(1)
        .map(|row| {
            (0..width)
                .map(|i| row.get(i).map(cell_value).unwrap_or(CellValue::Null))
                .collect::<Vec<_>>()
        })
        .take_while(|cells| cells.iter().any(|c| !c.is_null()))
        .collect()
}

/// A workbook whose sheets are tables.
pub struct XlsDatasource {
    name: String,
    location: PathBuf,
    tables: Vec<TableSettings>,
    work_dir: PathBuf,
}

impl XlsDatasource {
    pub fn new(settings: &DatasourceSettings, work_dir: PathBuf) -> Result<Self, ExtractError> {
        Ok(Self {
            name: settings.name.clone(),
            location: settings.location()?.to_path_buf(),
            tables: settings.tables.clone(),
            work_dir,
        })
    }

    fn sheet(&self, table: &str) -> Result<Range<Data>, ExtractError> {
        let mut workbook = open_workbook_auto(&self.location)?;
        Ok(workbook.worksheet_range(table)?)
    }

    async fn extract_sheet(
        &self,
        datalake: &mut Datalake,
        table: &str,
    ) -> Result<usize, ExtractError> {
        let range = self.sheet(table)?;
        let header = header_fields(&range);
        if header.is_empty() {
            return Err(ExtractError::Table {
                table: table.to_string(),
                reason: "sheet has no header row".into(),
            });
        }
        let rows = sheet_rows(&range, header.len());
        debug!(table = %table, rows = rows.len(), "sheet read");
        write_and_upload(datalake, &self.work_dir, table, &header, &rows, None, true).await
    }
}

#[async_trait]
impl Datasource for XlsDatasource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> Vec<ConnectionCheck> {
        vec![file_check("XLS", &self.location)]
    }

    async fn tables(&self) -> Result<Vec<String>, ExtractError> {
        let workbook = open_workbook_auto(&self.location)?;
        Ok(workbook.sheet_names())
    }

    async fn fields(&mut self, table: &str, force_query: bool) -> Result<Vec<FieldSpec>, ExtractError> {
        if !force_query {
            if let Some(fields) = declared_fields(&self.tables, table) {
                return Ok(fields);
            }
        }
        Ok(header_fields(&self.sheet(table)?)
            .into_iter()
            .map(FieldSpec::string)
            .collect())
    }

    async fn extract_and_load(
        &mut self,
        datalake: &mut Datalake,
        selection: &TableSelection,
        _force: bool,
        report: &mut RunReport,
    ) -> Result<(), ExtractError> {
        if self.tables.is_empty() {
            warn!(datasource = %self.name, "no tables configured");
        }
        let names: Vec<String> = self
            .tables
            .iter()
            .filter(|t| selection.includes_table(&t.name))
            .map(|t| t.name.clone())
            .collect();

        for table in &names {
            info!(datasource = %self.name, table = %table, "extracting sheet");
            match self.extract_sheet(datalake, table).await {
                Ok(n) => report.uploaded(&self.name, table, None, n),
                Err(e) => {
                    error!(datasource = %self.name, table = %table, error = %e, "sheet failed");
                    report.failed(&self.name, table, None, &e);
                }
            }
        }
        Ok(())
    }
}
