//! Asynchronous catalog query execution.
//!
//! Statements are fire-and-poll: [`QueryService::start_query`] returns an
//! execution id immediately and [`QueryService::query_state`] reports the
//! last known state for it.

use std::fmt;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState};
use tracing::{debug, info};

use panorama_core::DatalakeSettings;

use crate::error::DatalakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// A state the service reported that this client does not know.
    Unknown,
}

impl QueryState {
    /// Still waiting on the service.
    pub fn is_pending(self) -> bool {
        matches!(self, QueryState::Queued | QueryState::Running)
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryState::Queued => "QUEUED",
            QueryState::Running => "RUNNING",
            QueryState::Succeeded => "SUCCEEDED",
            QueryState::Failed => "FAILED",
            QueryState::Cancelled => "CANCELLED",
            QueryState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl From<&QueryExecutionState> for QueryState {
    fn from(state: &QueryExecutionState) -> Self {
        match state {
            QueryExecutionState::Queued => QueryState::Queued,
            QueryExecutionState::Running => QueryState::Running,
            QueryExecutionState::Succeeded => QueryState::Succeeded,
            QueryExecutionState::Failed => QueryState::Failed,
            QueryExecutionState::Cancelled => QueryState::Cancelled,
            _ => QueryState::Unknown,
        }
    }
}

/// The catalog's query-execution capability.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn start_query(
        &self,
        sql: &str,
        database: &str,
        workgroup: &str,
    ) -> Result<String, DatalakeError>;

    async fn query_state(&self, execution_id: &str) -> Result<QueryState, DatalakeError>;
}

/// [`QueryService`] backed by AWS Athena.
pub struct AthenaQueryService {
    client: aws_sdk_athena::Client,
}

impl AthenaQueryService {
    /// Build the SDK client for the configured region.
    ///
    /// Static credentials from the settings take precedence; otherwise the
    /// default AWS provider chain is used.
    pub async fn new(settings: &DatalakeSettings) -> Result<Self, DatalakeError> {
        let region = aws_sdk_athena::config::Region::new(settings.aws_region.clone());
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);

        if let (Some(key), Some(secret)) = (
            settings.aws_access_key.as_ref(),
            settings.aws_secret_access_key.as_ref(),
        ) {
            let creds = aws_sdk_athena::config::Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "panorama-settings",
            );
            loader = loader.credentials_provider(creds);
        }

        let aws_cfg = loader.load().await;
        let client = aws_sdk_athena::Client::new(&aws_cfg);

        info!(region = %settings.aws_region, "Athena query service initialised");
        Ok(Self { client })
    }
}

#[async_trait]
impl QueryService for AthenaQueryService {
    async fn start_query(
        &self,
        sql: &str,
        database: &str,
        workgroup: &str,
    ) -> Result<String, DatalakeError> {
        let resp = self
            .client
            .start_query_execution()
            .query_string(sql)
            .client_request_token(uuid::Uuid::new_v4().to_string())
            .query_execution_context(QueryExecutionContext::builder().database(database).build())
            .work_group(workgroup)
            .send()
            .await
            .map_err(|e| DatalakeError::AwsSdk(e.to_string()))?;

        let id = resp
            .query_execution_id()
            .ok_or_else(|| DatalakeError::AwsSdk("No query execution ID returned".into()))?
            .to_string();

        debug!(query_id = %id, "Query execution started");
        Ok(id)
    }

    async fn query_state(&self, execution_id: &str) -> Result<QueryState, DatalakeError> {
        let resp = self
            .client
            .get_query_execution()
            .query_execution_id(execution_id)
            .send()
            .await
            .map_err(|e| DatalakeError::AwsSdk(e.to_string()))?;

        let state = resp
            .query_execution()
            .and_then(|qe| qe.status())
            .and_then(|s| s.state())
            .map(QueryState::from)
            .unwrap_or(QueryState::Queued);

        Ok(state)
    }
}
