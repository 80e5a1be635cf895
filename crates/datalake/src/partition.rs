//! Hive-style partition layout for uploaded objects.
//!
//! Every object lives under
//! `[base_prefix/]table/[base_k=v/]*[field_k=v/]*filename`. Values are
//! percent-encoded in the storage key and kept raw (SQL-quoted) in the
//! catalog partition clause. Base partitions always come first; within each
//! group the configured order is kept.

use std::borrow::Cow;

use indexmap::IndexMap;

/// Ordered partition key/value pairs.
pub type PartitionValues = IndexMap<String, String>;

/// Percent-encode a partition value for use in a storage key.
pub fn encode_value(value: &str) -> Cow<'_, str> {
    urlencoding::encode(value)
}

/// Quote a value as a single-quoted SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `k=v/k=v` with raw values, for logs and run reports.
pub fn describe(values: &PartitionValues) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPath {
    /// Storage key prefix, without leading or trailing `/`.
    pub prefix: String,
    /// `k = 'v', ...`; empty when neither base nor field partitions exist.
    pub clause: String,
}

impl PartitionPath {
    pub fn build(
        base_prefix: Option<&str>,
        table: &str,
        base: &PartitionValues,
        field: Option<&PartitionValues>,
    ) -> Self {
        let mut segments: Vec<String> = Vec::new();
        if let Some(prefix) = base_prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            segments.push(prefix.to_string());
        }
        segments.push(table.to_string());

        let mut clauses: Vec<String> = Vec::new();
        let field_iter = field.into_iter().flat_map(|f| f.iter());
        for (key, value) in base.iter().chain(field_iter) {
            segments.push(format!("{}={}", key, encode_value(value)));
            clauses.push(format!("{} = {}", key, quote_literal(value)));
        }

        Self {
            prefix: segments.join("/"),
            clause: clauses.join(", "),
        }
    }

    pub fn is_partitioned(&self) -> bool {
        !self.clause.is_empty()
    }

    pub fn object_key(&self, filename: &str) -> String {
        format!("{}/{}", self.prefix, filename)
    }

    /// `s3://bucket/prefix/` form used in `LOCATION` clauses.
    pub fn location(&self, bucket: &str) -> String {
        format!("s3://{}/{}/", bucket, self.prefix)
    }
}
