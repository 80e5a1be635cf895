//! The catalog client: object uploads plus fire-and-poll catalog statements.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path as LocalPath;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, info, warn};

use panorama_core::{default_table_name, DatalakeSettings, FieldSpec, Settings, TableSettings};

use crate::backend;
use crate::ddl;
use crate::error::DatalakeError;
use crate::partition::{PartitionPath, PartitionValues};
use crate::query::{AthenaQueryService, QueryService, QueryState};

/// Count of awaited statements per last known state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    counts: BTreeMap<QueryState, usize>,
}

impl ExecutionSummary {
    pub fn get(&self, state: QueryState) -> usize {
        self.counts.get(&state).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// `true` when nothing is still queued or running.
    pub fn is_settled(&self) -> bool {
        self.counts.keys().all(|s| !s.is_pending())
    }

    pub fn counts(&self) -> &BTreeMap<QueryState, usize> {
        &self.counts
    }
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return f.write_str("no statements");
        }
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(state, n)| format!("{}: {}", state, n))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

pub struct Datalake {
    store: Arc<dyn ObjectStore>,
    queries: Arc<dyn QueryService>,
    bucket: String,
    base_prefix: Option<String>,
    base_partitions: PartitionValues,
    database: Option<String>,
    workgroup: Option<String>,
    /// Explicit catalog names keyed by source table name.
    table_names: HashMap<String, String>,
    max_polls: u32,
    poll_interval: Duration,
    /// Submitted statement ids, in submission order.
    executions: Vec<String>,
}

impl Datalake {
    /// Connect to S3 and Athena from the settings file.
    pub async fn connect(settings: &Settings) -> Result<Self, DatalakeError> {
        let store = backend::s3_store(&settings.datalake)?;
        let queries: Arc<dyn QueryService> =
            Arc::new(AthenaQueryService::new(&settings.datalake).await?);
        Ok(Self::new(&settings.datalake, store, queries)?
            .with_table_names(settings.datalake_table_names()))
    }

    pub fn new(
        settings: &DatalakeSettings,
        store: Arc<dyn ObjectStore>,
        queries: Arc<dyn QueryService>,
    ) -> Result<Self, DatalakeError> {
        let bucket = settings
            .bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| DatalakeError::NotConfigured("datalake.bucket not set".into()))?;

        Ok(Self {
            store,
            queries,
            bucket,
            base_prefix: settings.base_prefix().map(String::from),
            base_partitions: settings.base_partitions_map(),
            database: settings.datalake_database.clone(),
            workgroup: settings.datalake_workgroup.clone(),
            table_names: HashMap::new(),
            max_polls: settings.max_polls,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            executions: Vec::new(),
        })
    }

    pub fn with_table_names(mut self, names: HashMap<String, String>) -> Self {
        self.table_names = names;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn base_prefix(&self) -> Option<&str> {
        self.base_prefix.as_deref()
    }

    pub fn base_partitions(&self) -> &PartitionValues {
        &self.base_partitions
    }

    /// Statement ids submitted since the last [`Self::await_executions`].
    pub fn pending_executions(&self) -> &[String] {
        &self.executions
    }

    /// Catalog table name for a source table.
    pub fn datalake_table_name(&self, table: &str) -> String {
        self.table_names
            .get(table)
            .cloned()
            .unwrap_or_else(|| default_table_name(self.base_prefix(), table))
    }

    pub fn partition_path(&self, table: &str, field_partitions: Option<&PartitionValues>) -> PartitionPath {
        PartitionPath::build(self.base_prefix(), table, &self.base_partitions, field_partitions)
    }

    /// `s3://bucket/[prefix/]table/`, the root every partition lives under.
    pub fn table_location(&self, table: &str) -> String {
        PartitionPath::build(self.base_prefix(), table, &PartitionValues::new(), None)
            .location(&self.bucket)
    }

    // ── Objects ─────────────────────────────────────────────────

    pub async fn upload_object(&self, local: &LocalPath, key: &str) -> Result<(), DatalakeError> {
        let data = Bytes::from(tokio::fs::read(local).await?);
        let size = data.len();
        let location = Path::parse(key)?;
        self.store.put(&location, PutPayload::from(data)).await?;
        debug!(key = %key, bytes = size, "object uploaded");
        Ok(())
    }

    /// Upload a per-table file under its partition prefix.
    ///
    /// The object keeps the local file name. With `update_partitions` the
    /// partition is registered in the catalog right after the upload.
    /// Returns the object key.
    pub async fn upload_table_from_file(
        &mut self,
        local: &LocalPath,
        table: &str,
        field_partitions: Option<&PartitionValues>,
        update_partitions: bool,
    ) -> Result<String, DatalakeError> {
        let filename = local
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .ok_or_else(|| DatalakeError::NotAFile(local.display().to_string()))?;

        let path = self.partition_path(table, field_partitions);
        let key = path.object_key(&filename);
        self.upload_object(local, &key).await?;
        info!(table = %table, key = %key, "uploaded to s3://{}", self.bucket);

        if update_partitions {
            self.register_path(table, &path).await?;
        }
        Ok(key)
    }

    // ── Statements ──────────────────────────────────────────────

    /// Submit a statement without waiting for it.
    ///
    /// Returns `None` when no catalog database/workgroup is configured.
    pub async fn run_statement(&mut self, sql: &str) -> Result<Option<String>, DatalakeError> {
        let (database, workgroup) = match (self.database.as_deref(), self.workgroup.as_deref()) {
            (Some(db), Some(wg)) => (db, wg),
            _ => {
                warn!("datalake database or workgroup not set; statement not sent");
                return Ok(None);
            }
        };

        debug!(sql = %sql, "submitting statement");
        let id = self.queries.start_query(sql, database, workgroup).await?;
        self.executions.push(id.clone());
        Ok(Some(id))
    }

    /// Register the partition for `table` + `field_partitions`, if any.
    pub async fn register_partition(
        &mut self,
        table: &str,
        field_partitions: Option<&PartitionValues>,
    ) -> Result<Option<String>, DatalakeError> {
        let path = self.partition_path(table, field_partitions);
        self.register_path(table, &path).await
    }

    async fn register_path(
        &mut self,
        table: &str,
        path: &PartitionPath,
    ) -> Result<Option<String>, DatalakeError> {
        if !path.is_partitioned() {
            debug!(table = %table, "no partitions to register");
            return Ok(None);
        }
        let sql = ddl::add_partition(
            &self.datalake_table_name(table),
            &path.clause,
            &path.location(&self.bucket),
        );
        self.run_statement(&sql).await
    }

    /// Poll every submitted statement until none is queued or running, or
    /// `max_polls` rounds have passed. Clears the pending list.
    pub async fn await_executions(&mut self) -> ExecutionSummary {
        let ids = std::mem::take(&mut self.executions);
        let mut states = vec![QueryState::Queued; ids.len()];
        let rounds = self.max_polls.max(1);

        for round in 0..rounds {
            for (id, state) in ids.iter().zip(states.iter_mut()) {
                if !state.is_pending() {
                    continue;
                }
                *state = match self.queries.query_state(id).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(query_id = %id, error = %e, "could not read statement state");
                        QueryState::Unknown
                    }
                };
            }

            let pending = states.iter().filter(|s| s.is_pending()).count();
            if pending == 0 {
                break;
            }
            debug!(round = round + 1, pending, "statements still pending");
            if round + 1 < rounds {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        let mut summary = ExecutionSummary::default();
        for state in states {
            *summary.counts.entry(state).or_insert(0) += 1;
        }
        if !summary.is_settled() {
            warn!(summary = %summary, "stopped polling with statements still pending");
        }
        summary
    }

    // ── Table DDL ───────────────────────────────────────────────

    /// `CREATE EXTERNAL TABLE` for a table with known fields.
    pub async fn create_table(
        &mut self,
        table: &TableSettings,
        fields: &[FieldSpec],
    ) -> Result<Option<String>, DatalakeError> {
        let partition_fields = table.partition_fields();
        let columns: Vec<String> = fields
            .iter()
            .filter(|f| !partition_fields.contains(&f.name))
            .map(|f| f.name.clone())
            .collect();
        let partition_columns: Vec<String> = self
            .base_partitions
            .keys()
            .cloned()
            .chain(partition_fields.iter().cloned())
            .collect();

        let sql = ddl::create_table(
            &table.datalake_table(self.base_prefix()),
            &columns,
            &partition_columns,
            &self.table_location(&table.name),
        );
        self.run_statement(&sql).await
    }

    pub async fn drop_table(&mut self, table: &TableSettings) -> Result<Option<String>, DatalakeError> {
        let sql = ddl::drop_table(&table.datalake_table(self.base_prefix()));
        self.run_statement(&sql).await
    }

    pub async fn drop_view(&mut self, table: &TableSettings) -> Result<Option<String>, DatalakeError> {
        let sql = ddl::drop_view(&table.datalake_view(self.base_prefix()));
        self.run_statement(&sql).await
    }

    pub async fn create_view(
        &mut self,
        table: &TableSettings,
        fields: &[FieldSpec],
    ) -> Result<Option<String>, DatalakeError> {
        let sql = ddl::create_view(
            &table.datalake_view(self.base_prefix()),
            &table.datalake_table(self.base_prefix()),
            fields,
        );
        self.run_statement(&sql).await
    }

    /// Check the bucket answers a listing.
    pub async fn test_connection(&self) -> Result<(), DatalakeError> {
        let prefix = self.base_prefix().map(Path::parse).transpose()?;
        self.store.list_with_delimiter(prefix.as_ref()).await?;
        Ok(())
    }
}
