use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::selection::TableSelection;
use crate::table::TableSettings;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_polls() -> u32 {
    20
}

fn default_poll_interval_ms() -> u64 {
    1000
}

// ── Top-level settings ────────────────────────────────────────

/// The whole settings file. Built once at process entry and passed down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub datalake: DatalakeSettings,
    #[serde(default)]
    pub datasources: Vec<DatasourceSettings>,
}

impl Settings {
    /// Read and validate a YAML settings file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_yaml(&yaml)?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write the settings back, keeping field order.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.datalake.validate()?;
        for ds in &self.datasources {
            ds.validate()?;
        }
        Ok(())
    }

    pub fn datasource(&self, name: &str) -> Option<&DatasourceSettings> {
        self.datasources.iter().find(|d| d.name == name)
    }

    /// Reject a selection naming a datasource that is not configured.
    pub fn check_selection(&self, selection: &TableSelection) -> Result<(), ConfigError> {
        match selection.datasource.as_deref() {
            Some(name) if self.datasource(name).is_none() => {
                Err(ConfigError::UnknownDatasource(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Explicit catalog table names keyed by source table name.
    pub fn datalake_table_names(&self) -> HashMap<String, String> {
        self.datasources
            .iter()
            .flat_map(|ds| ds.tables.iter())
            .filter_map(|t| {
                t.datalake_table_name
                    .as_ref()
                    .map(|n| (t.name.clone(), n.clone()))
            })
            .collect()
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        let dl = &self.datalake;
        tracing::info!("Settings loaded:");
        tracing::info!(
            "  datalake:    bucket={}, prefix={}, region={}",
            dl.bucket.as_deref().unwrap_or("(none)"),
            dl.base_prefix.as_deref().unwrap_or("(none)"),
            dl.aws_region
        );
        tracing::info!(
            "  catalog:     database={}, workgroup={}",
            dl.datalake_database.as_deref().unwrap_or("(none)"),
            dl.datalake_workgroup.as_deref().unwrap_or("(none)")
        );
        for ds in &self.datasources {
            tracing::info!(
                "  datasource:  {} ({:?}, {} tables)",
                ds.name,
                ds.kind,
                ds.tables.len()
            );
        }
    }
}

// ── Datalake ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasePartition {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatalakeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_secret_access_key: Option<String>,
    #[serde(default = "default_region")]
    pub aws_region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datalake_database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datalake_workgroup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default)]
    pub base_partitions: Vec<BasePartition>,
    /// S3-compatible endpoint (MinIO, localstack).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Where per-table files are written before upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl DatalakeSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.bucket.as_deref() {
            Some(b) if !b.trim().is_empty() => {}
            _ => return Err(ConfigError::Missing("datalake.bucket".into())),
        }
        for bp in &self.base_partitions {
            if bp.key.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "datalake.base_partitions".into(),
                    reason: "partition key cannot be empty".into(),
                });
            }
        }
        Ok(())
    }

    /// Base partitions in configuration order.
    pub fn base_partitions_map(&self) -> IndexMap<String, String> {
        self.base_partitions
            .iter()
            .map(|bp| (bp.key.clone(), bp.value.clone()))
            .collect()
    }

    pub fn base_prefix(&self) -> Option<&str> {
        self.base_prefix.as_deref().filter(|p| !p.is_empty())
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

// ── Datasources ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasourceKind {
    Mysql,
    OpenedxCourseStructures,
    Csv,
    Xls,
}

/// Where the course-structures datasource reads the published versions from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveVersionSource {
    /// `split_modulestore_django_splitmodulestorecourseindex` in MySQL.
    Mysql,
    /// `modulestore.active_versions` in MongoDB.
    #[default]
    Mongodb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceSettings {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DatasourceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql_database: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongodb_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongodb_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongodb_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongodb_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongodb_database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_versions: Option<ActiveVersionSource>,

    /// Local file for `csv` / `xls` datasources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,

    #[serde(default)]
    pub tables: Vec<TableSettings>,
}

impl DatasourceSettings {
    pub fn new(name: impl Into<String>, kind: DatasourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            mysql_host: None,
            mysql_port: None,
            mysql_username: None,
            mysql_password: None,
            mysql_database: None,
            mongodb_host: None,
            mongodb_port: None,
            mongodb_username: None,
            mongodb_password: None,
            mongodb_database: None,
            active_versions: None,
            location: None,
            tables: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Missing("datasources[].name".into()));
        }
        match self.kind {
            DatasourceKind::Csv | DatasourceKind::Xls => {
                self.location()?;
            }
            DatasourceKind::OpenedxCourseStructures => {
                self.active_version_source()?;
            }
            DatasourceKind::Mysql => {}
        }
        for t in &self.tables {
            t.validate()?;
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableSettings> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn mysql_connection(&self) -> MysqlConnection {
        MysqlConnection {
            host: self.mysql_host.clone().unwrap_or_else(|| "127.0.0.1".into()),
            port: self.mysql_port.unwrap_or(3306),
            username: self.mysql_username.clone().unwrap_or_else(|| "root".into()),
            password: self.mysql_password.clone(),
            database: self.mysql_database.clone().unwrap_or_else(|| "edxapp".into()),
        }
    }

    pub fn mongodb_connection(&self) -> MongoConnection {
        MongoConnection {
            host: self.mongodb_host.clone().unwrap_or_else(|| "127.0.0.1".into()),
            port: self.mongodb_port.unwrap_or(27017),
            username: self.mongodb_username.clone(),
            password: self.mongodb_password.clone(),
            database: self.mongodb_database.clone().unwrap_or_else(|| "edxapp".into()),
        }
    }

    /// Active-version strategy; `mysql` requires `mysql_host` to be set.
    pub fn active_version_source(&self) -> Result<ActiveVersionSource, ConfigError> {
        let source = self.active_versions.unwrap_or_default();
        if source == ActiveVersionSource::Mysql && self.mysql_host.is_none() {
            return Err(ConfigError::Missing(format!(
                "{}.mysql_host (required by active_versions: mysql)",
                self.name
            )));
        }
        Ok(source)
    }

    pub fn location(&self) -> Result<&Path, ConfigError> {
        self.location
            .as_deref()
            .ok_or_else(|| ConfigError::Missing(format!("{}.location", self.name)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlConnection {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoConnection {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
}

// ── Tests ────────────────────────────────────────────────────────
