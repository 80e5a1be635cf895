use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bson::Document;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;

use panorama_core::{CellValue, DatalakeSettings, DatasourceSettings};
use panorama_datalake::{Datalake, RecordingQueryService};
use panorama_extract::{DocumentSource, ExtractError, RelationalSource};

pub const DATALAKE: &str = r#"
bucket: panorama-raw
base_prefix: openedx
datalake_database: panorama
datalake_workgroup: etl
base_partitions:
  - key: lms
    value: lms.example.org
max_polls: 3
"#;

pub struct TestLake {
    pub datalake: Datalake,
    pub store: Arc<InMemory>,
    pub queries: Arc<RecordingQueryService>,
    pub work_dir: tempfile::TempDir,
}

impl TestLake {
    pub fn new() -> Self {
        let settings: DatalakeSettings = serde_yaml::from_str(DATALAKE).unwrap();
        let store = Arc::new(InMemory::new());
        let queries = Arc::new(RecordingQueryService::new());
        let datalake = Datalake::new(&settings, store.clone(), queries.clone())
            .unwrap()
            .with_poll_interval(Duration::ZERO);
        Self {
            datalake,
            store,
            queries,
            work_dir: tempfile::tempdir().unwrap(),
        }
    }

    pub async fn object_text(&self, key: &str) -> String {
        let bytes = self
            .store
            .get(&Path::parse(key).unwrap())
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Every object key in the store, sorted.
    pub async fn keys(&self) -> Vec<String> {
        use futures::TryStreamExt;
        let mut keys: Vec<String> = self
            .store
            .list(None)
            .map_ok(|m| m.location.to_string())
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        keys
    }

    pub fn work_files(&self) -> usize {
        std::fs::read_dir(self.work_dir.path()).unwrap().count()
    }
}

pub fn datasource(yaml: &str) -> DatasourceSettings {
    serde_yaml::from_str(yaml).unwrap()
}

pub fn text(v: &str) -> CellValue {
    CellValue::from(v)
}

// ── Relational fake ─────────────────────────────────────────────

enum Reply {
    Rows(Vec<Vec<CellValue>>),
    Fail(String),
}

/// Answers each query with the first rule whose pattern is a substring of
/// the SQL; unmatched queries return no rows. Every query is recorded.
#[derive(Default)]
pub struct FakeRelational {
    rules: Mutex<Vec<(String, Reply)>>,
    log: Mutex<Vec<String>>,
}

impl FakeRelational {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, rows: Vec<Vec<CellValue>>) -> Self {
        self.rules.lock().unwrap().push((pattern.to_string(), Reply::Rows(rows)));
        self
    }

    pub fn fail_on(self, pattern: &str, message: &str) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn queries_containing(&self, pattern: &str) -> Vec<String> {
        self.queries().into_iter().filter(|q| q.contains(pattern)).collect()
    }
}

#[async_trait]
impl RelationalSource for FakeRelational {
    async fn query(&self, sql: &str) -> Result<Vec<Vec<CellValue>>, ExtractError> {
        self.log.lock().unwrap().push(sql.to_string());
        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|(p, _)| sql.contains(p.as_str())) {
            Some((_, Reply::Rows(rows))) => Ok(rows.clone()),
            Some((_, Reply::Fail(msg))) => Err(ExtractError::Table {
                table: "fake".into(),
                reason: msg.clone(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

// ── Document fake ───────────────────────────────────────────────

/// Returns every document stored under a collection, ignoring the filter.
#[derive(Default)]
pub struct FakeDocuments {
    collections: HashMap<String, Vec<Document>>,
    filters: Mutex<Vec<(String, Document)>>,
}

impl FakeDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, collection: &str, docs: Vec<Document>) -> Self {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        self
    }

    pub fn filters(&self) -> Vec<(String, Document)> {
        self.filters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentSource for FakeDocuments {
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, ExtractError> {
        self.filters
            .lock()
            .unwrap()
            .push((collection.to_string(), filter));
        Ok(self.collections.get(collection).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), ExtractError> {
        Ok(())
    }
}
