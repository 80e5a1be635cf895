//! Course outlines rebuilt from the split modulestore.
//!
//! The published version of every course points at one structure document
//! holding a flat list of blocks. Blocks only know their children, so the
//! parent and the names of every enclosing chapter/sequential/vertical are
//! threaded down from the course root before the blocks are written out as
//! one row each.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use panorama_core::{ActiveVersionSource, CellValue, DatasourceSettings, FieldSpec, RunReport, TableSelection};
use panorama_datalake::Datalake;

use crate::datasource::{write_and_upload, ConnectionCheck, Datasource};
use crate::error::ExtractError;
use crate::source::{DocumentSource, MongoSource, MySqlSource, RelationalSource};

pub const TABLE: &str = "course_structures";

pub const ACTIVE_VERSIONS_COLLECTION: &str = "modulestore.active_versions";
pub const STRUCTURES_COLLECTION: &str = "modulestore.structures";
pub const COURSE_INDEX_TABLE: &str = "split_modulestore_django_splitmodulestorecourseindex";

/// Output columns, in order.
pub const FIELDS: [&str; 15] = [
    "module_location",
    "course_id",
    "organization",
    "course_code",
    "course_edition",
    "parent",
    "block_type",
    "block_id",
    "display_name",
    "course_name",
    "chapter",
    "sequential",
    "vertical",
    "library",
    "component",
];

const STRUCTURAL_KINDS: [&str; 5] = ["course", "chapter", "sequential", "vertical", "library_content"];

pub fn is_structural(block_type: &str) -> bool {
    STRUCTURAL_KINDS.contains(&block_type)
}

// ── Course references ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CourseRef {
    pub org: String,
    pub course: String,
    pub run: String,
}

impl CourseRef {
    pub fn new(org: impl Into<String>, course: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            course: course.into(),
            run: run.into(),
        }
    }

    /// Parse `course-v1:org+course+run`. The prefix is optional.
    pub fn parse(course_id: &str) -> Option<Self> {
        let key = course_id.strip_prefix("course-v1:").unwrap_or(course_id);
        let parts: Vec<&str> = key.split('+').collect();
        match parts.as_slice() {
            [org, course, run] if !org.is_empty() && !course.is_empty() && !run.is_empty() => {
                Some(Self::new(*org, *course, *run))
            }
            _ => None,
        }
    }

    pub fn course_id(&self) -> String {
        format!("course-v1:{}+{}+{}", self.org, self.course, self.run)
    }

    /// Module location of a block; the course root uses the course id.
    pub fn location(&self, block_type: &str, block_id: &str) -> String {
        if block_type == "course" {
            self.course_id()
        } else {
            self.block_location(block_type, block_id)
        }
    }

    pub fn block_location(&self, block_type: &str, block_id: &str) -> String {
        format!(
            "block-v1:{}+{}+{}+type@{}+block@{}",
            self.org, self.course, self.run, block_type, block_id
        )
    }
}

/// Published structure id to course.
pub type ActiveVersions = IndexMap<ObjectId, CourseRef>;

// ── Active version resolution ─────────────────────────────────

#[async_trait]
pub trait ActiveVersionResolver: Send + Sync {
    async fn resolve(&self) -> Result<ActiveVersions, ExtractError>;

    fn source_name(&self) -> &'static str;
}

/// Active versions from the split-modulestore course index table.
pub struct SplitModulestoreIndex {
    source: Arc<dyn RelationalSource>,
}

impl SplitModulestoreIndex {
    pub fn new(source: Arc<dyn RelationalSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ActiveVersionResolver for SplitModulestoreIndex {
    async fn resolve(&self) -> Result<ActiveVersions, ExtractError> {
        let sql = format!("select published_version, course_id from {}", COURSE_INDEX_TABLE);
        let rows = self.source.query(&sql).await?;

        let mut versions = ActiveVersions::new();
        for row in rows {
            let (version, course_id) = match row.as_slice() {
                [v, c] => (v, c),
                _ => continue,
            };
            // Libraries and unpublished courses carry no published version.
            if version.is_null() {
                continue;
            }
            let oid = match ObjectId::parse_str(version.to_string()) {
                Ok(oid) => oid,
                Err(e) => {
                    warn!(version = %version, error = %e, "invalid published version");
                    continue;
                }
            };
            match CourseRef::parse(&course_id.to_string()) {
                Some(course) => {
                    versions.insert(oid, course);
                }
                None => warn!(course_id = %course_id, "malformed course id"),
            }
        }
        info!(count = versions.len(), "active versions found");
        Ok(versions)
    }

    fn source_name(&self) -> &'static str {
        "mysql"
    }
}

/// Active versions from the legacy `active_versions` collection.
pub struct MongoActiveVersions {
    source: Arc<dyn DocumentSource>,
}

impl MongoActiveVersions {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ActiveVersionResolver for MongoActiveVersions {
    async fn resolve(&self) -> Result<ActiveVersions, ExtractError> {
        // Records without a published branch are libraries.
        let filter = doc! { "versions.published-branch": { "$exists": true } };
        let records = self.source.find(ACTIVE_VERSIONS_COLLECTION, filter).await?;

        let mut versions = ActiveVersions::new();
        for record in records {
            let branch = record
                .get_document("versions")
                .and_then(|v| v.get_object_id("published-branch"));
            let oid = match branch {
                Ok(oid) => oid,
                Err(_) => {
                    error!(record = %record, "no published branch in record");
                    continue;
                }
            };
            match (record.get_str("org"), record.get_str("course"), record.get_str("run")) {
                (Ok(org), Ok(course), Ok(run)) => {
                    versions.insert(oid, CourseRef::new(org, course, run));
                }
                _ => warn!(branch = %oid, "active version without org/course/run"),
            }
        }
        info!(count = versions.len(), "active versions found");
        Ok(versions)
    }

    fn source_name(&self) -> &'static str {
        "mongodb"
    }
}

// ── Raw structures ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RawStructure {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default)]
    pub blocks: Vec<RawBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    pub block_id: String,
    pub block_type: String,
    #[serde(default)]
    pub fields: RawFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFields {
    #[serde(default)]
    pub display_name: Option<String>,
    /// `(block_type, block_id)` pairs in display order.
    #[serde(default)]
    pub children: Vec<(String, String)>,
}

pub fn parse_structures(docs: Vec<Document>) -> Result<Vec<RawStructure>, ExtractError> {
    docs.into_iter()
        .map(|d| bson::from_document(d).map_err(ExtractError::from))
        .collect()
}

// ── Blocks ────────────────────────────────────────────────────

/// Display names of the enclosing blocks, one per structural kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub course: Option<String>,
    pub chapter: Option<String>,
    pub sequential: Option<String>,
    pub vertical: Option<String>,
    pub library: Option<String>,
}

impl Lineage {
    /// Record `name` for a parent of kind `block_type`; non-structural
    /// kinds carry no lineage.
    pub fn set(&mut self, block_type: &str, name: Option<String>) {
        let slot = match block_type {
            "course" => &mut self.course,
            "chapter" => &mut self.chapter,
            "sequential" => &mut self.sequential,
            "vertical" => &mut self.vertical,
            "library_content" => &mut self.library,
            _ => return,
        };
        *slot = name;
    }

    /// Overwrite with every name `outer` carries.
    pub fn inherit(&mut self, outer: &Lineage) {
        let slots = [
            (&mut self.course, &outer.course),
            (&mut self.chapter, &outer.chapter),
            (&mut self.sequential, &outer.sequential),
            (&mut self.vertical, &outer.vertical),
            (&mut self.library, &outer.library),
        ];
        for (slot, name) in slots {
            if name.is_some() {
                slot.clone_from(name);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub course: CourseRef,
    pub block_type: String,
    pub block_id: String,
    pub display_name: Option<String>,
    pub children: Vec<(String, String)>,
    pub parent: Option<String>,
    pub lineage: Lineage,
    pub component_name: Option<String>,
}

impl Block {
    /// One output row, in [`FIELDS`] order.
    pub fn to_row(&self, location: &str) -> Vec<CellValue> {
        let text = |v: &Option<String>| CellValue::from(v.clone());
        vec![
            CellValue::from(location),
            CellValue::from(self.course.course_id()),
            CellValue::from(self.course.org.as_str()),
            CellValue::from(self.course.course.as_str()),
            CellValue::from(self.course.run.as_str()),
            text(&self.parent),
            CellValue::from(self.block_type.as_str()),
            CellValue::from(self.block_id.as_str()),
            text(&self.display_name),
            text(&self.lineage.course),
            text(&self.lineage.chapter),
            text(&self.lineage.sequential),
            text(&self.lineage.vertical),
            text(&self.lineage.library),
            text(&self.component_name),
        ]
    }
}

/// Blocks keyed by module location, in structure then block order.
pub type BlockMap = IndexMap<String, Block>;

#[derive(Debug, Default)]
pub struct Reconstruction {
    pub blocks: BlockMap,
    /// Degraded-but-continuing conditions found on the way.
    pub anomalies: Vec<String>,
}

impl Reconstruction {
    pub fn rows(&self) -> Vec<Vec<CellValue>> {
        self.blocks
            .iter()
            .map(|(location, block)| block.to_row(location))
            .collect()
    }
}

/// Flatten every structure into blocks and thread ancestry from each
/// course root.
pub fn reconstruct(
    structures: &[RawStructure],
    active: &ActiveVersions,
) -> Result<Reconstruction, ExtractError> {
    let mut out = Reconstruction::default();

    for structure in structures {
        let course = match active.get(&structure.id) {
            Some(c) => c,
            None => {
                warn!(structure = %structure.id, "structure has no active version");
                out.anomalies
                    .push(format!("structure {} has no active version", structure.id));
                continue;
            }
        };

        for raw in &structure.blocks {
            let location = course.location(&raw.block_type, &raw.block_id);
            debug!(
                location = %location,
                children = raw.fields.children.len(),
                "block"
            );
            out.blocks.insert(
                location,
                Block {
                    course: course.clone(),
                    block_type: raw.block_type.clone(),
                    block_id: raw.block_id.clone(),
                    display_name: raw.fields.display_name.clone(),
                    children: raw.fields.children.clone(),
                    parent: None,
                    lineage: Lineage::default(),
                    component_name: None,
                },
            );
        }

        let root = course.course_id();
        if out.blocks.contains_key(&root) {
            thread_ancestry(&mut out.blocks, &root, &mut out.anomalies)?;
        } else {
            error!(course = %root, structure = %structure.id, "no course block found");
            out.anomalies
                .push(format!("no course block found for {} in structure {}", root, structure.id));
        }
    }

    info!(blocks = out.blocks.len(), "blocks reconstructed");
    Ok(out)
}

/// Depth-first walk from `root`, in declared child order.
///
/// Each child records the parent's name under the parent's kind, then takes
/// every name the parent itself carries, so the outermost ancestor of a kind
/// wins. Childless non-structural blocks are components. A block reached
/// again from its own descendants is a cycle; one reached again through
/// another path (listed twice, or under two parents) keeps its first parent.
pub fn thread_ancestry(
    blocks: &mut BlockMap,
    root: &str,
    anomalies: &mut Vec<String>,
) -> Result<(), ExtractError> {
    let mut visited: HashSet<String> = HashSet::new();
    // Locations from the root down to the block being visited.
    let mut path: Vec<String> = Vec::new();
    let mut stack: Vec<(String, Option<String>, usize)> = vec![(root.to_string(), None, 0)];

    while let Some((location, parent, depth)) = stack.pop() {
        path.truncate(depth);
        if path.contains(&location) {
            return Err(ExtractError::CycleDetected { location });
        }
        if !visited.insert(location.clone()) {
            let from = parent.unwrap_or_default();
            warn!(block = %location, parent = %from, "block reached twice");
            anomalies.push(format!("block {} reached again from {}", location, from));
            continue;
        }

        if let Some(parent) = parent {
            let (kind, name, inherited) = match blocks.get(&parent) {
                Some(p) => (p.block_type.clone(), p.display_name.clone(), p.lineage.clone()),
                None => continue,
            };
            if let Some(block) = blocks.get_mut(&location) {
                block.lineage.set(&kind, name);
                block.lineage.inherit(&inherited);
                block.parent = Some(parent);
            }
        }

        let Some(block) = blocks.get_mut(&location) else {
            continue;
        };

        if block.children.is_empty() {
            if !is_structural(&block.block_type) {
                block.component_name = block.display_name.clone();
            }
            continue;
        }

        let children: Vec<String> = block
            .children
            .iter()
            .map(|(kind, id)| block.course.block_location(kind, id))
            .collect();
        path.push(location.clone());

        for child in children.into_iter().rev() {
            if blocks.contains_key(&child) {
                stack.push((child, Some(location.clone()), depth + 1));
            } else {
                error!(parent = %location, child = %child, "child block not found");
                anomalies.push(format!("block {} not found (child of {})", child, location));
            }
        }
    }
    Ok(())
}

// ── Datasource ────────────────────────────────────────────────

pub struct CourseStructuresDatasource {
    name: String,
    documents: Arc<dyn DocumentSource>,
    resolver: Box<dyn ActiveVersionResolver>,
    /// Set when active versions come from MySQL.
    relational: Option<Arc<dyn RelationalSource>>,
    work_dir: PathBuf,
}

impl CourseStructuresDatasource {
    pub async fn connect(settings: &DatasourceSettings, work_dir: PathBuf) -> Result<Self, ExtractError> {
        let documents: Arc<dyn DocumentSource> =
            Arc::new(MongoSource::connect(&settings.mongodb_connection()).await?);

        let (resolver, relational): (Box<dyn ActiveVersionResolver>, Option<Arc<dyn RelationalSource>>) =
            match settings.active_version_source()? {
                ActiveVersionSource::Mysql => {
                    let mysql: Arc<dyn RelationalSource> =
                        Arc::new(MySqlSource::connect(&settings.mysql_connection()).await?);
                    (Box::new(SplitModulestoreIndex::new(mysql.clone())), Some(mysql))
                }
                ActiveVersionSource::Mongodb => {
                    (Box::new(MongoActiveVersions::new(documents.clone())), None)
                }
            };
        info!(datasource = %settings.name, source = resolver.source_name(), "active versions source");

        Ok(Self::new(&settings.name, documents, resolver, relational, work_dir))
    }

    pub fn new(
        name: &str,
        documents: Arc<dyn DocumentSource>,
        resolver: Box<dyn ActiveVersionResolver>,
        relational: Option<Arc<dyn RelationalSource>>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            name: name.to_string(),
            documents,
            resolver,
            relational,
            work_dir,
        }
    }

    /// Resolve, fetch and rebuild the course outlines without uploading.
    pub async fn reconstruct(&self, report: &mut RunReport) -> Result<Reconstruction, ExtractError> {
        let active = match self.resolver.resolve().await {
            Ok(a) if !a.is_empty() => a,
            Ok(_) => {
                warn!(datasource = %self.name, "no active versions found");
                return Err(ExtractError::NoActiveVersions);
            }
            Err(e) => {
                error!(datasource = %self.name, error = %e, "could not resolve active versions");
                return Err(e);
            }
        };

        let ids: Vec<Bson> = active.keys().map(|oid| Bson::ObjectId(*oid)).collect();
        let docs = self
            .documents
            .find(STRUCTURES_COLLECTION, doc! { "_id": { "$in": ids } })
            .await?;
        let structures = parse_structures(docs)?;
        debug!(structures = structures.len(), "structures fetched");

        if structures.len() != active.len() {
            let msg = format!(
                "found {} active versions but {} course structures",
                active.len(),
                structures.len()
            );
            warn!(datasource = %self.name, "{}", msg);
            report.anomaly(&self.name, msg);
        }

        let rebuilt = reconstruct(&structures, &active)?;
        for a in &rebuilt.anomalies {
            report.anomaly(&self.name, a.clone());
        }
        Ok(rebuilt)
    }
}

#[async_trait]
impl Datasource for CourseStructuresDatasource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> Vec<ConnectionCheck> {
        let mut checks = vec![match self.documents.ping().await {
            Ok(()) => ConnectionCheck::ok("MongoDB"),
            Err(e) => ConnectionCheck::failed("MongoDB", e),
        }];
        if let Some(ref mysql) = self.relational {
            checks.push(match mysql.query("select 1").await {
                Ok(_) => ConnectionCheck::ok("MySQL"),
                Err(e) => ConnectionCheck::failed("MySQL", e),
            });
        }
        checks
    }

    async fn tables(&self) -> Result<Vec<String>, ExtractError> {
        Ok(vec![TABLE.to_string()])
    }

    async fn fields(&mut self, _table: &str, _force_query: bool) -> Result<Vec<FieldSpec>, ExtractError> {
        Ok(FIELDS.iter().map(|f| FieldSpec::new(*f, "varchar")).collect())
    }

    async fn extract_and_load(
        &mut self,
        datalake: &mut Datalake,
        selection: &TableSelection,
        _force: bool,
        report: &mut RunReport,
    ) -> Result<(), ExtractError> {
        if !selection.includes_table(TABLE) {
            return Ok(());
        }

        let rebuilt = self.reconstruct(report).await?;
        let header: Vec<String> = FIELDS.iter().map(|f| f.to_string()).collect();
        let rows = rebuilt.rows();

        match write_and_upload(datalake, &self.work_dir, TABLE, &header, &rows, None, true).await {
            Ok(n) => {
                info!(datasource = %self.name, rows = n, "course structures uploaded");
                report.uploaded(&self.name, TABLE, None, n);
            }
            Err(e) => {
                error!(datasource = %self.name, error = %e, "course structures upload failed");
                report.failed(&self.name, TABLE, None, &e);
            }
        }
        Ok(())
    }
}
