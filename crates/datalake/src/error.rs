use thiserror::Error;

/// Errors from object uploads and catalog statements.
#[derive(Error, Debug)]
pub enum DatalakeError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("invalid object key: {0}")]
    InvalidKey(#[from] object_store::path::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An AWS SDK error (stringified).
    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("not configured: {0}")]
    NotConfigured(String),
}
