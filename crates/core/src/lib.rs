pub mod config;
pub mod error;
pub mod report;
pub mod selection;
pub mod table;
pub mod value;

pub use config::{
    load_dotenv, ActiveVersionSource, BasePartition, DatalakeSettings, DatasourceKind, DatasourceSettings,
    MongoConnection, MysqlConnection, Settings,
};
pub use error::ConfigError;
pub use report::{Anomaly, Outcome, RunReport, TableOutcome};
pub use selection::TableSelection;
pub use table::{
    default_table_name, default_view_name, quote_ident, FieldSpec, PartitionSettings, TableSettings,
};
pub use value::CellValue;
