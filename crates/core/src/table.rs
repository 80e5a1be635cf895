//! Per-table settings shared by every datasource.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A declared field: name plus the source's native type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
}

fn default_field_type() -> String {
    "string".to_string()
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
        }
    }

    /// A field of the generic `string` type (used for header-sniffed sources).
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, default_field_type())
    }
}

/// Incremental partitioning of a table.
///
/// `interval` is written in the source's own interval syntax
/// (e.g. `2 hour` for MySQL) and requires a `timestamp_field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSettings {
    pub partition_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_field: Option<String>,
}

impl PartitionSettings {
    /// Incremental window predicate, or `None` when the whole table is in scope.
    pub fn window_predicate(&self) -> Option<String> {
        match (&self.interval, &self.timestamp_field) {
            (Some(interval), Some(ts)) => Some(format!(
                "{} >= date_sub(now(), interval {})",
                quote_ident(ts),
                interval
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSettings {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<PartitionSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datalake_table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datalake_table_view: Option<String>,
}

impl TableSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: None,
            partitions: None,
            datalake_table_name: None,
            datalake_table_view: None,
        }
    }

    /// Declared fields, treating an empty list the same as none.
    pub fn declared_fields(&self) -> Option<&[FieldSpec]> {
        self.fields.as_deref().filter(|f| !f.is_empty())
    }

    pub fn partition_fields(&self) -> &[String] {
        self.partitions
            .as_ref()
            .map(|p| p.partition_fields.as_slice())
            .unwrap_or(&[])
    }

    /// Catalog table name: explicit setting or the prefixed default.
    pub fn datalake_table(&self, base_prefix: Option<&str>) -> String {
        self.datalake_table_name
            .clone()
            .unwrap_or_else(|| default_table_name(base_prefix, &self.name))
    }

    /// Catalog view name: explicit setting or the prefixed default.
    pub fn datalake_view(&self, base_prefix: Option<&str>) -> String {
        self.datalake_table_view
            .clone()
            .unwrap_or_else(|| default_view_name(base_prefix, &self.name))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Missing("tables[].name".into()));
        }
        if let Some(p) = &self.partitions {
            if p.partition_fields.is_empty() {
                return Err(ConfigError::Invalid {
                    key: format!("{}.partitions.partition_fields", self.name),
                    reason: "at least one partition field is required".into(),
                });
            }
            if p.interval.is_some() && p.timestamp_field.is_none() {
                return Err(ConfigError::Invalid {
                    key: format!("{}.partitions.timestamp_field", self.name),
                    reason: "an interval needs a timestamp field".into(),
                });
            }
        }
        Ok(())
    }
}

/// MySQL identifier, backquoted with embedded backquotes doubled.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn default_table_name(base_prefix: Option<&str>, table: &str) -> String {
    match base_prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}_raw_{}", prefix, table),
        None => format!("raw_{}", table),
    }
}

pub fn default_view_name(base_prefix: Option<&str>, table: &str) -> String {
    match base_prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}_table_{}", prefix, table),
        None => format!("table_{}", table),
    }
}
