use thiserror::Error;

use panorama_core::ConfigError;
use panorama_datalake::DatalakeError;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("MySQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("malformed document: {0}")]
    Document(#[from] bson::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("datalake error: {0}")]
    Datalake(#[from] DatalakeError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// A block was reached twice while threading ancestry.
    #[error("cycle detected in course structure at {location}")]
    CycleDetected { location: String },

    #[error("no active course versions found")]
    NoActiveVersions,

    #[error("table {table}: {reason}")]
    Table { table: String, reason: String },
}
