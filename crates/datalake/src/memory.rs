//! In-process [`QueryService`] that records statements instead of running
//! them. Used by tests and by dry runs against an in-memory object store.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::DatalakeError;
use crate::query::{QueryService, QueryState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    pub id: String,
    pub sql: String,
    pub database: String,
    pub workgroup: String,
}

pub struct RecordingQueryService {
    queries: Mutex<Vec<RecordedQuery>>,
    /// States handed out, in order, on successive `query_state` calls.
    script: Mutex<Vec<QueryState>>,
    settled: QueryState,
    polls: Mutex<usize>,
}

impl Default for RecordingQueryService {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingQueryService {
    /// Every statement reports `SUCCEEDED`.
    pub fn new() -> Self {
        Self::settling_at(QueryState::Succeeded)
    }

    /// Every statement reports `state` forever.
    pub fn settling_at(state: QueryState) -> Self {
        Self {
            queries: Mutex::new(Vec::new()),
            script: Mutex::new(Vec::new()),
            settled: state,
            polls: Mutex::new(0),
        }
    }

    /// Report the scripted states first, then `settled`.
    pub fn scripted(states: Vec<QueryState>, settled: QueryState) -> Self {
        let svc = Self::settling_at(settled);
        *svc.script.lock().unwrap_or_else(|e| e.into_inner()) = states;
        svc
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.queries().into_iter().map(|q| q.sql).collect()
    }

    /// Number of `query_state` calls served.
    pub fn polls(&self) -> usize {
        *self.polls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl QueryService for RecordingQueryService {
    async fn start_query(
        &self,
        sql: &str,
        database: &str,
        workgroup: &str,
    ) -> Result<String, DatalakeError> {
        let mut queries = self.queries.lock().unwrap_or_else(|e| e.into_inner());
        let id = format!("exec-{}", queries.len() + 1);
        queries.push(RecordedQuery {
            id: id.clone(),
            sql: sql.to_string(),
            database: database.to_string(),
            workgroup: workgroup.to_string(),
        });
        Ok(id)
    }

    async fn query_state(&self, _execution_id: &str) -> Result<QueryState, DatalakeError> {
        *self.polls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        if script.is_empty() {
            Ok(self.settled)
        } else {
            Ok(script.remove(0))
        }
    }
}
