//! Relational tables, extracted whole or one partition tuple at a time.
//!
//! A table without partition settings is dumped in full and uploaded once.
//! A partitioned table is split into the distinct tuples of its partition
//! fields that changed within the configured window (all tuples when
//! forced), and each tuple is fetched, uploaded and registered on its own.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use panorama_core::{
    quote_ident, CellValue, DatasourceSettings, FieldSpec, PartitionSettings, RunReport, TableSelection,
    TableSettings,
};
use panorama_datalake::partition::describe;
use panorama_datalake::{Datalake, PartitionValues};

use crate::datasource::{write_and_upload, ConnectionCheck, Datasource};
use crate::error::ExtractError;
use crate::source::{MySqlSource, RelationalSource};

/// Partition value used when the source value is NULL.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// MySQL string literal.
pub fn quote_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `select [distinct] fields from table [where ...]`
pub fn select_sql(table: &str, fields: &[String], filter: Option<&str>, distinct: bool) -> String {
    let columns = if fields.is_empty() {
        "*".to_string()
    } else {
        fields.iter().map(|f| quote_ident(f)).collect::<Vec<_>>().join(",")
    };
    let mut sql = format!(
        "select {}{} from {}",
        if distinct { "distinct " } else { "" },
        columns,
        quote_ident(table)
    );
    if let Some(f) = filter {
        sql.push_str(" where ");
        sql.push_str(f);
    }
    sql
}

/// Filter conjunction matching one partition tuple.
pub fn tuple_filter(fields: &[String], values: &[CellValue]) -> String {
    fields
        .iter()
        .zip(values)
        .map(|(f, v)| match v {
            CellValue::Null => format!("{} IS NULL", quote_ident(f)),
            other => format!("{} = {}", quote_ident(f), quote_value(&other.to_string())),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub fn tuple_partitions(fields: &[String], values: &[CellValue]) -> PartitionValues {
    fields
        .iter()
        .zip(values)
        .map(|(f, v)| {
            let value = match v {
                CellValue::Null => NULL_PARTITION.to_string(),
                other => other.to_string(),
            };
            (f.clone(), value)
        })
        .collect()
}

pub struct MySqlDatasource {
    name: String,
    database: String,
    source: Arc<dyn RelationalSource>,
    tables: Vec<TableSettings>,
    work_dir: PathBuf,
    live_fields: HashMap<String, Vec<FieldSpec>>,
}

impl MySqlDatasource {
    pub async fn connect(settings: &DatasourceSettings, work_dir: PathBuf) -> Result<Self, ExtractError> {
        let conn = settings.mysql_connection();
        let source = MySqlSource::connect(&conn).await?;
        Ok(Self::new(settings, Arc::new(source), work_dir))
    }

    pub fn new(settings: &DatasourceSettings, source: Arc<dyn RelationalSource>, work_dir: PathBuf) -> Self {
        Self {
            name: settings.name.clone(),
            database: settings.mysql_connection().database,
            source,
            tables: settings.tables.clone(),
            work_dir,
            live_fields: HashMap::new(),
        }
    }

    async fn query_fields(&self, table: &str) -> Result<Vec<FieldSpec>, ExtractError> {
        let sql = format!(
            "select COLUMN_NAME, DATA_TYPE from INFORMATION_SCHEMA.COLUMNS \
             where TABLE_NAME = {} and TABLE_SCHEMA = {} order by ORDINAL_POSITION",
            quote_value(table),
            quote_value(&self.database)
        );
        let rows = self.source.query(&sql).await?;
        let fields: Vec<FieldSpec> = rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                match (cells.next(), cells.next()) {
                    (Some(name), Some(kind)) if !name.is_null() => {
                        Some(FieldSpec::new(name.to_string(), kind.to_string()))
                    }
                    _ => None,
                }
            })
            .collect();
        debug!(table = %table, fields = fields.len(), "live fields queried");
        Ok(fields)
    }

    async fn extract_table(
        &mut self,
        datalake: &mut Datalake,
        table: &TableSettings,
        force: bool,
        report: &mut RunReport,
    ) -> Result<(), ExtractError> {
        let fields: Vec<String> = self
            .fields(&table.name, false)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();
        if fields.is_empty() {
            return Err(ExtractError::Table {
                table: table.name.clone(),
                reason: "no fields found".into(),
            });
        }

        match &table.partitions {
            None => {
                let rows = self.source.query(&select_sql(&table.name, &fields, None, false)).await?;
                let n = write_and_upload(datalake, &self.work_dir, &table.name, &fields, &rows, None, true)
                    .await?;
                info!(table = %table.name, rows = n, "table uploaded");
                report.uploaded(&self.name, &table.name, None, n);
            }
            Some(partitions) => {
                self.extract_partitions(datalake, table, partitions, &fields, force, report)
                    .await?;
            }
        }
        Ok(())
    }

    async fn extract_partitions(
        &self,
        datalake: &mut Datalake,
        table: &TableSettings,
        partitions: &PartitionSettings,
        fields: &[String],
        force: bool,
        report: &mut RunReport,
    ) -> Result<(), ExtractError> {
        let partition_fields = &partitions.partition_fields;
        let data_fields: Vec<String> = fields
            .iter()
            .filter(|f| !partition_fields.contains(f))
            .cloned()
            .collect();

        let window = if force {
            info!(table = %table.name, "forcing a full dump");
            None
        } else {
            partitions.window_predicate()
        };
        if let Some(ref w) = window {
            debug!(table = %table.name, window = %w, "incremental update");
        }

        let tuples = self
            .source
            .query(&select_sql(&table.name, partition_fields, window.as_deref(), true))
            .await?;
        info!(table = %table.name, partitions = tuples.len(), "partitions found to update");

        let total = tuples.len();
        for (i, tuple) in tuples.iter().enumerate() {
            let values = tuple_partitions(partition_fields, tuple);
            let label = describe(&values);
            info!(table = %table.name, partition = %label, "getting partition {}/{}", i + 1, total);

            let filter = tuple_filter(partition_fields, tuple);
            let loaded = match self
                .source
                .query(&select_sql(&table.name, &data_fields, Some(&filter), false))
                .await
            {
                Ok(rows) => {
                    write_and_upload(
                        datalake,
                        &self.work_dir,
                        &table.name,
                        &data_fields,
                        &rows,
                        Some(&values),
                        true,
                    )
                    .await
                }
                Err(e) => Err(e),
            };

            match loaded {
                Ok(n) => report.uploaded(&self.name, &table.name, Some(label), n),
                Err(e) => {
                    error!(table = %table.name, partition = %label, error = %e, "partition failed");
                    report.failed(&self.name, &table.name, Some(label), &e);
                    let remaining = total - i - 1;
                    if remaining > 0 {
                        warn!(table = %table.name, remaining, "skipping remaining partitions");
                    }
                    break;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Datasource for MySqlDatasource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> Vec<ConnectionCheck> {
        let check = match self.source.query("SHOW DATABASES").await {
            Ok(rows) => {
                let found = rows
                    .iter()
                    .any(|r| r.first().map(|c| c.to_string()) == Some(self.database.clone()));
                if found {
                    ConnectionCheck::ok("MySQL")
                } else {
                    ConnectionCheck::failed("MySQL", "DB not found")
                }
            }
            Err(e) => ConnectionCheck::failed("MySQL", e),
        };
        vec![check]
    }

    async fn tables(&self) -> Result<Vec<String>, ExtractError> {
        let rows = self.source.query("SHOW TABLES").await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.into_iter().next())
            .map(|c| c.to_string())
            .collect())
    }

    async fn fields(&mut self, table: &str, force_query: bool) -> Result<Vec<FieldSpec>, ExtractError> {
        if !force_query {
            let declared = self
                .tables
                .iter()
                .find(|t| t.name == table)
                .and_then(|t| t.declared_fields());
            if let Some(fields) = declared {
                return Ok(fields.to_vec());
            }
            if let Some(fields) = self.live_fields.get(table) {
                return Ok(fields.clone());
            }
        }

        let fields = self.query_fields(table).await?;
        self.live_fields.insert(table.to_string(), fields.clone());
        Ok(fields)
    }

    async fn extract_and_load(
        &mut self,
        datalake: &mut Datalake,
        selection: &TableSelection,
        force: bool,
        report: &mut RunReport,
    ) -> Result<(), ExtractError> {
        let tables: Vec<TableSettings> = self
            .tables
            .iter()
            .filter(|t| selection.includes_table(&t.name))
            .cloned()
            .collect();

        for table in &tables {
            info!(datasource = %self.name, table = %table.name, "extracting");
            if let Err(e) = self.extract_table(datalake, table, force, report).await {
                error!(datasource = %self.name, table = %table.name, error = %e, "table failed");
                report.failed(&self.name, &table.name, None, &e);
            }
        }
        Ok(())
    }
}
