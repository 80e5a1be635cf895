use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use panorama_core::{CellValue, FieldSpec, RunReport, TableSelection};
use panorama_datalake::{Datalake, PartitionValues};

use crate::error::ExtractError;
use crate::writer;

/// Result of probing one backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCheck {
    pub label: String,
    pub status: String,
}

impl ConnectionCheck {
    pub fn ok(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: "OK".into(),
        }
    }

    pub fn failed(label: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            label: label.into(),
            status: reason.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

impl fmt::Display for ConnectionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.status)
    }
}

/// A configured source of tables.
#[async_trait]
pub trait Datasource: Send + Sync {
    fn name(&self) -> &str;

    async fn test_connection(&self) -> Vec<ConnectionCheck>;

    /// Tables the source itself reports, regardless of settings.
    async fn tables(&self) -> Result<Vec<String>, ExtractError>;

    /// Declared fields of `table`, or the live ones when none are declared
    /// or `force_query` is set.
    async fn fields(&mut self, table: &str, force_query: bool) -> Result<Vec<FieldSpec>, ExtractError>;

    /// Extract the selected tables and upload them. Per-table failures are
    /// recorded in `report`; an `Err` means the datasource could not run at all.
    async fn extract_and_load(
        &mut self,
        datalake: &mut Datalake,
        selection: &TableSelection,
        force: bool,
        report: &mut RunReport,
    ) -> Result<(), ExtractError>;
}

/// `{work_dir}/{table}.csv`
pub fn work_file(work_dir: &Path, table: &str) -> PathBuf {
    work_dir.join(format!("{}.csv", table))
}

/// Write one delimited file, upload it, and remove the local copy whether
/// or not the upload succeeded. Returns the number of rows uploaded.
pub async fn write_and_upload(
    datalake: &mut Datalake,
    work_dir: &Path,
    table: &str,
    header: &[String],
    rows: &[Vec<CellValue>],
    field_partitions: Option<&PartitionValues>,
    update_partitions: bool,
) -> Result<usize, ExtractError> {
    let path = work_file(work_dir, table);
    let n = writer::write_file(&path, header, rows)?;

    let uploaded = datalake
        .upload_table_from_file(&path, table, field_partitions, update_partitions)
        .await;

    if let Err(e) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), error = %e, "could not remove work file");
    } else {
        debug!(path = %path.display(), "work file removed");
    }

    uploaded?;
    Ok(n)
}
