use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("datasource not found: {0}")]
    UnknownDatasource(String),
}
