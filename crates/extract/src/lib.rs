pub mod datasource;
pub mod error;
pub mod files;
pub mod source;
pub mod structures;
pub mod tabular;
pub mod writer;

pub use datasource::{write_and_upload, ConnectionCheck, Datasource};
pub use error::ExtractError;
pub use files::{CsvDatasource, XlsDatasource};
pub use source::{DocumentSource, MongoSource, MySqlSource, RelationalSource};
pub use structures::{
    reconstruct, ActiveVersionResolver, ActiveVersions, CourseRef, CourseStructuresDatasource,
    MongoActiveVersions, Reconstruction, SplitModulestoreIndex,
};
pub use tabular::MySqlDatasource;
