pub mod backend;
pub mod client;
pub mod ddl;
pub mod error;
pub mod memory;
pub mod partition;
pub mod query;

pub use client::{Datalake, ExecutionSummary};
pub use error::DatalakeError;
pub use memory::RecordingQueryService;
pub use partition::{PartitionPath, PartitionValues};
pub use query::{AthenaQueryService, QueryService, QueryState};
