//! Catalog DDL templates.
//!
//! Tables are external CSV tables read through `OpenCSVSerde` with a
//! backslash escape character, matching what the delimited writer emits.
//! Views cast every column from its raw string form to a typed column.

use panorama_core::FieldSpec;

/// Coarse grouping of source type names for the view casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    DateTime,
    Date,
    Time,
    String,
    Other,
}

impl TypeFamily {
    /// Classify a source type name such as `int(11) unsigned` or `VARCHAR`.
    pub fn classify(type_name: &str) -> Self {
        let lower = type_name.trim().to_ascii_lowercase();
        let base = lower
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or("");
        match base {
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "year"
            | "boolean" | "bool" => TypeFamily::Integer,
            "float" | "double" | "decimal" | "numeric" | "real" => TypeFamily::Float,
            "datetime" | "timestamp" => TypeFamily::DateTime,
            "date" => TypeFamily::Date,
            "time" => TypeFamily::Time,
            "varchar" | "char" | "text" | "tinytext" | "mediumtext" | "longtext" | "string"
            | "enum" | "set" | "json" => TypeFamily::String,
            _ => TypeFamily::Other,
        }
    }
}

/// Typed select expression for one raw column.
pub fn cast_expression(field: &FieldSpec) -> String {
    let col = format!("\"{}\"", field.name);
    let raw = format!("NULLIF({}, '')", col);
    let expr = match TypeFamily::classify(&field.field_type) {
        TypeFamily::Integer => format!("CAST({} AS BIGINT)", raw),
        TypeFamily::Float => format!("CAST({} AS DOUBLE)", raw),
        TypeFamily::DateTime => format!("date_parse({}, '%Y-%m-%d %H:%i:%s.%f')", raw),
        TypeFamily::Date => format!("CAST(date_parse({}, '%Y-%m-%d') AS DATE)", raw),
        TypeFamily::Time => format!("date_parse({}, '%H:%i:%s.%f')", raw),
        TypeFamily::String => format!("NULLIF({}, 'NULL')", raw),
        TypeFamily::Other => col.clone(),
    };
    format!("{} AS {}", expr, col)
}

pub fn create_table(
    datalake_table: &str,
    columns: &[String],
    partition_columns: &[String],
    location: &str,
) -> String {
    let column_defs = columns
        .iter()
        .map(|c| format!("`{}` string", c))
        .collect::<Vec<_>>()
        .join(", ");

    let partitions_section = if partition_columns.is_empty() {
        String::new()
    } else {
        let defs = partition_columns
            .iter()
            .map(|c| format!("`{}` string", c))
            .collect::<Vec<_>>()
            .join(", ");
        format!("PARTITIONED BY ({}) ", defs)
    };

    format!(
        "CREATE EXTERNAL TABLE IF NOT EXISTS `{table}` ({columns}) \
         {partitions}\
         ROW FORMAT SERDE 'org.apache.hadoop.hive.serde2.OpenCSVSerde' \
         WITH SERDEPROPERTIES ('escapeChar'='\\\\', 'quoteChar'='\"', 'separatorChar'=',') \
         STORED AS INPUTFORMAT 'org.apache.hadoop.mapred.TextInputFormat' \
         OUTPUTFORMAT 'org.apache.hadoop.hive.ql.io.HiveIgnoreKeyTextOutputFormat' \
         LOCATION '{location}' \
         TBLPROPERTIES ('areColumnsQuoted'='false', 'classification'='csv', \
         'columnsOrdered'='true', 'compressionType'='none', 'delimiter'=',', \
         'skip.header.line.count'='1', 'typeOfData'='file')",
        table = datalake_table,
        columns = column_defs,
        partitions = partitions_section,
        location = location,
    )
}

pub fn add_partition(datalake_table: &str, clause: &str, location: &str) -> String {
    format!(
        "ALTER TABLE `{}` ADD IF NOT EXISTS PARTITION ({}) LOCATION '{}'",
        datalake_table, clause, location
    )
}

pub fn drop_table(datalake_table: &str) -> String {
    format!("DROP TABLE IF EXISTS `{}`", datalake_table)
}

pub fn drop_view(view: &str) -> String {
    format!("DROP VIEW IF EXISTS \"{}\"", view)
}

pub fn create_view(view: &str, datalake_table: &str, fields: &[FieldSpec]) -> String {
    let selects = fields
        .iter()
        .map(cast_expression)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE OR REPLACE VIEW \"{}\" AS SELECT {} FROM \"{}\"",
        view, selects, datalake_table
    )
}
